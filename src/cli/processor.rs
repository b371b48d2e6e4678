use crate::node::Node;
use crate::utils::version;

use super::commands::{Command, CommandContext, CommandResult, ValueFormat};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command as ClapCommand};
use colored::*;
use log::{debug, error};
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::HashMap;
use std::fs::create_dir_all;
use std::path::PathBuf;

/// 创建clap应用程序，定义所有可用的命令和参数
fn create_cli_app() -> ClapCommand {
    ClapCommand::new("grid-node shell")
        .version(version())
        .about("Grid node key/value shell")
        .no_binary_name(true)
        .disable_help_subcommand(true)
        .subcommand(ClapCommand::new("help").about("显示帮助信息"))
        .subcommand(ClapCommand::new("exit").about("退出应用程序"))
        .subcommand(ClapCommand::new("quit").about("退出应用程序"))
        .subcommand(
            ClapCommand::new("set")
                .about("存储值")
                .arg(Arg::new("key").help("键").required(true).index(1))
                .arg(
                    Arg::new("value")
                        .help("值")
                        .required(true)
                        .allow_hyphen_values(true)
                        .index(2),
                )
                .arg(
                    Arg::new("as")
                        .long("as")
                        .help("值的类型")
                        .value_parser(["auto", "text", "uuid", "hex"])
                        .default_value("auto"),
                ),
        )
        .subcommand(
            ClapCommand::new("get")
                .about("查找值")
                .arg(Arg::new("key").help("键").required(true).index(1)),
        )
        .subcommand(
            ClapCommand::new("rem")
                .about("删除值")
                .arg(Arg::new("key").help("键").required(true).index(1)),
        )
        .subcommand(ClapCommand::new("info").about("显示节点状态"))
}

/// 命令处理器
pub struct CommandProcessor<'a> {
    node: &'a Node,
    commands: HashMap<&'static str, Command>,
    app: ClapCommand,
    history_path: PathBuf,
}

impl<'a> CommandProcessor<'a> {
    /// 创建新的命令处理器
    pub fn new(node: &'a Node) -> Self {
        let mut commands = HashMap::new();

        // 注册命令
        commands.insert("help", Command::Help);
        commands.insert("exit", Command::Exit);
        commands.insert("quit", Command::Exit);
        commands.insert("set", Command::Set);
        commands.insert("get", Command::Get);
        commands.insert("rem", Command::Rem);
        commands.insert("info", Command::Info);

        // 设置历史记录文件路径
        let mut history_path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        history_path.push("grid-node");
        history_path.push("history.txt");

        // 确保目录存在
        if let Some(parent) = history_path.parent() {
            let _ = create_dir_all(parent);
        }

        Self {
            node,
            commands,
            app: create_cli_app(),
            history_path,
        }
    }

    /// 运行交互式命令循环，直到用户退出
    pub fn run(&mut self) -> Result<()> {
        println!("{}", self.get_welcome_message());

        let mut editor = self.create_editor()?;
        let prompt = format!("{} ", "grid>".green());

        loop {
            match editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    if let Err(e) = editor.save_history(&self.history_path) {
                        debug!("Failed to save command history: {}", e);
                    }

                    match self.process_line(line) {
                        Ok(CommandResult::Exit) => {
                            println!("Exiting...");
                            break;
                        }
                        Ok(result) => print_result(result),
                        Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    error!("Error reading line: {}", err);
                    break;
                }
            }
        }

        Ok(())
    }

    /// 解析并执行一行输入
    pub fn process_line(&self, line: &str) -> Result<CommandResult> {
        let args = shlex::split(line).ok_or_else(|| anyhow!("Unbalanced quotes in: {}", line))?;

        let matches = self
            .app
            .clone()
            .try_get_matches_from(args)
            .map_err(|e| anyhow!("Command parsing error: {}", e))?;

        match matches.subcommand() {
            Some((name, sub_matches)) => self.handle_subcommand(name, sub_matches),
            None => self.execute("help", vec![], ValueFormat::Auto),
        }
    }

    /// 处理子命令
    fn handle_subcommand(&self, name: &str, matches: &ArgMatches) -> Result<CommandResult> {
        let key = matches.try_get_one::<String>("key").ok().flatten().cloned();

        match name {
            "set" => {
                let value = matches
                    .get_one::<String>("value")
                    .cloned()
                    .ok_or_else(|| anyhow!("Missing value"))?;
                let format = matches
                    .get_one::<String>("as")
                    .map(|format| format.parse::<ValueFormat>())
                    .transpose()
                    .map_err(|e| anyhow!(e))?
                    .unwrap_or(ValueFormat::Auto);
                let args = key.into_iter().chain(std::iter::once(value)).collect();
                self.execute(name, args, format)
            }
            _ => self.execute(name, key.into_iter().collect(), ValueFormat::Auto),
        }
    }

    /// 执行命令
    fn execute(&self, name: &str, args: Vec<String>, format: ValueFormat) -> Result<CommandResult> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| anyhow!("Unknown command: {}", name))?;

        let context = CommandContext {
            node: self.node,
            args,
            format,
        };

        Ok(command.execute(context))
    }

    /// 创建命令行编辑器
    fn create_editor(&self) -> rustyline::Result<DefaultEditor> {
        let mut editor = DefaultEditor::new()?;

        // 加载历史记录
        let _ = editor.load_history(&self.history_path);

        editor.set_auto_add_history(true);
        editor.set_edit_mode(rustyline::EditMode::Emacs);
        editor.set_color_mode(rustyline::ColorMode::Enabled);

        Ok(editor)
    }

    /// 获取欢迎信息
    fn get_welcome_message(&self) -> String {
        format!(
            "\n{}\n{}\n\nType {} for a list of available commands.\n\nNode:\n  ID: {}\n  Address: {}\n",
            format!("grid-node v{}", version()).green().bold(),
            "A Kademlia key/value node".cyan(),
            "help".yellow(),
            self.node.id().green(),
            self.node.local_addr()
        )
    }
}

/// 显示命令结果
fn print_result(result: CommandResult) {
    match result {
        CommandResult::Success(message) => println!("{} {}", "Success:".green().bold(), message),
        CommandResult::Info(message) => println!("{}", message),
        CommandResult::Warning(message) => println!("{} {}", "Warning:".yellow().bold(), message),
        CommandResult::Error(message) => eprintln!("{} {}", "Error:".red().bold(), message),
        CommandResult::Exit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::node::NodeOptions;

    fn test_node() -> Node {
        Node::new(NodeOptions {
            port: 0,
            debug: false,
            ..NodeOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_set_get_rem() {
        let node = test_node();
        let processor = CommandProcessor::new(&node);

        let result = processor.process_line("set greeting 'hello world'").unwrap();
        assert!(matches!(result, CommandResult::Success(_)));
        assert_eq!(node.get("greeting").unwrap(), Some(Value::Text("hello world".to_string())));

        processor.process_line("set answer 42").unwrap();
        assert_eq!(node.get("answer").unwrap(), Some(Value::Int(42)));

        processor.process_line("set raw 42 --as text").unwrap();
        assert_eq!(node.get("raw").unwrap(), Some(Value::Text("42".to_string())));

        processor.process_line("set blob 0x0102 --as hex").unwrap();
        assert_eq!(node.get("blob").unwrap(), Some(Value::Bytes(vec![1, 2])));

        let result = processor.process_line("get answer").unwrap();
        assert!(matches!(result, CommandResult::Info(text) if text.starts_with("42")));

        processor.process_line("rem answer").unwrap();
        assert!(matches!(processor.process_line("get answer").unwrap(), CommandResult::Warning(_)));
    }

    #[test]
    fn test_exit_and_errors() {
        let node = test_node();
        let processor = CommandProcessor::new(&node);

        assert_eq!(processor.process_line("quit").unwrap(), CommandResult::Exit);
        assert_eq!(processor.process_line("exit").unwrap(), CommandResult::Exit);
        assert!(processor.process_line("frobnicate").is_err());
        assert!(processor.process_line("set onlykey").is_err());
        assert!(processor.process_line("set k v --as yaml").is_err());
        assert!(processor.process_line("set k 'unterminated").is_err());
        assert!(matches!(processor.process_line("set k null").unwrap(), CommandResult::Error(_)));
    }

    #[test]
    fn test_info() {
        let node = test_node();
        let processor = CommandProcessor::new(&node);

        let result = processor.process_line("info").unwrap();
        assert!(matches!(result, CommandResult::Info(text) if text.starts_with(node.id())));
    }
}
