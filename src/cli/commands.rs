use crate::codec::Value;
use crate::node::Node;

use colored::*;
use indoc::indoc;
use log::{debug, error};
use std::str::FromStr;
use uuid::Uuid;

/// 命令执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// 成功
    Success(String),
    /// 信息
    Info(String),
    /// 警告
    Warning(String),
    /// 错误
    Error(String),
    /// 退出
    Exit,
}

/// 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Set,
    Get,
    Rem,
    Info,
}

/// `set` 命令解析值参数的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// 能解析为JSON字面量时按JSON，否则按文本
    Auto,
    Text,
    Uuid,
    Hex,
}

impl FromStr for ValueFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ValueFormat::Auto),
            "text" => Ok(ValueFormat::Text),
            "uuid" => Ok(ValueFormat::Uuid),
            "hex" => Ok(ValueFormat::Hex),
            _ => Err(format!("Unknown value format: {}", s)),
        }
    }
}

/// 解析命令行输入的值
pub fn parse_value(raw: &str, format: ValueFormat) -> Result<Value, String> {
    match format {
        ValueFormat::Text => Ok(Value::Text(raw.to_string())),
        ValueFormat::Uuid => Uuid::parse_str(raw)
            .map(Value::Uuid)
            .map_err(|e| format!("Invalid UUID {}: {}", raw, e)),
        ValueFormat::Hex => {
            let digits = raw.strip_prefix("0x").unwrap_or(raw);
            hex::decode(digits)
                .map(Value::Bytes)
                .map_err(|e| format!("Invalid hex {}: {}", raw, e))
        }
        ValueFormat::Auto => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(doc) => Value::try_from(doc).map_err(|e| e.to_string()),
            Err(_) => Ok(Value::Text(raw.to_string())),
        },
    }
}

/// 命令上下文
pub struct CommandContext<'a> {
    pub node: &'a Node,
    pub args: Vec<String>,
    pub format: ValueFormat,
}

impl Command {
    /// 执行命令
    pub fn execute(&self, context: CommandContext<'_>) -> CommandResult {
        match self {
            Command::Help => Self::help(),
            Command::Exit => CommandResult::Exit,
            Command::Set => Self::set(context),
            Command::Get => Self::get(context),
            Command::Rem => Self::rem(context),
            Command::Info => CommandResult::Info(context.node.info()),
        }
    }

    /// 帮助命令
    fn help() -> CommandResult {
        let help_text = indoc! {"
            Available commands:

            set <key> <value> [--as auto|text|uuid|hex]  - Store a value
            get <key>                                    - Look up a value
            rem <key>                                    - Delete a value
            info                                         - Show node state
            help                                         - Show this help message
            exit, quit                                   - Exit the application

            With --as auto (the default) a JSON literal keeps its kind:
            42 is an integer, true a boolean, {\"a\": 1} a document.
            Anything else is stored as text.
        "};

        CommandResult::Info(help_text.to_string())
    }

    /// 存储命令
    fn set(context: CommandContext<'_>) -> CommandResult {
        if context.args.len() < 2 {
            return CommandResult::Error("Usage: set <key> <value> [--as auto|text|uuid|hex]".to_string());
        }

        let key = &context.args[0];
        let value = match parse_value(&context.args[1], context.format) {
            Ok(value) => value,
            Err(e) => return CommandResult::Error(e),
        };

        debug!("Setting {} to {} value {}", key, value.kind(), value);

        match context.node.set(key, value) {
            Ok(true) => CommandResult::Success(format!("Stored {}", key.cyan())),
            Ok(false) => CommandResult::Warning(format!("No node accepted {}", key)),
            Err(e) => {
                error!("Failed to set {}: {}", key, e);
                CommandResult::Error(format!("Failed to set {}: {}", key, e))
            }
        }
    }

    /// 查找命令
    fn get(context: CommandContext<'_>) -> CommandResult {
        let key = match context.args.first() {
            Some(key) => key,
            None => return CommandResult::Error("Usage: get <key>".to_string()),
        };

        match context.node.get(key) {
            Ok(Some(value)) => CommandResult::Info(format!("{} ({})", value, value.kind().dimmed())),
            Ok(None) => CommandResult::Warning(format!("{} not found", key)),
            Err(e) => {
                error!("Failed to get {}: {}", key, e);
                CommandResult::Error(format!("Failed to get {}: {}", key, e))
            }
        }
    }

    /// 删除命令
    fn rem(context: CommandContext<'_>) -> CommandResult {
        let key = match context.args.first() {
            Some(key) => key,
            None => return CommandResult::Error("Usage: rem <key>".to_string()),
        };

        match context.node.remove(key) {
            Ok(()) => CommandResult::Success(format!("Removed {}", key.cyan())),
            Err(e) => {
                error!("Failed to remove {}: {}", key, e);
                CommandResult::Error(format!("Failed to remove {}: {}", key, e))
            }
        }
    }
}
