use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 未指定时在工作目录中查找的配置文件
pub const DEFAULT_SETTINGS_FILE: &str = ".settings.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// 进程级配置
///
/// 启动时构建一次，以引用传给需要的地方。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 节点设置
    pub node: NodeSettings,

    /// 日志设置
    pub logging: LoggingSettings,

    /// 当前版本不认识的键，原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 节点设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// 监听端口
    pub port: u16,

    /// 存储条目的生存时间（秒）
    pub ttl_secs: u64,

    /// 调试模式：记录每个操作并报告慢操作
    pub debug: bool,

    /// k-bucket大小
    pub k_value: usize,

    /// 并行查询的节点数
    pub alpha_value: usize,

    /// RPC超时（毫秒）
    pub request_timeout_ms: u64,

    /// 路由表刷新间隔（秒）
    pub refresh_interval_secs: u64,

    /// 是否重新发布旧条目
    pub republish: bool,

    /// 引导节点，格式: <host>:<port>
    pub bootstrap: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            port: 8690,
            ttl_secs: 604_800, // 一周
            debug: true,
            k_value: 20,
            alpha_value: 3,
            request_timeout_ms: 5000,
            refresh_interval_secs: 3600,
            republish: false,
            bootstrap: None,
        }
    }
}

/// 日志设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 日志级别
    pub level: String,

    /// 是否同时写入日志文件
    pub logfile: bool,

    /// 日志文件路径
    pub logfile_path: PathBuf,

    /// 日志文件轮转间隔（秒）
    pub rotate_interval_secs: u64,

    /// 保留的旧日志文件数
    pub backup_count: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            logfile: false,
            logfile_path: PathBuf::from("kad-node.log"),
            rotate_interval_secs: 60,
            backup_count: 1,
        }
    }
}

impl Settings {
    /// 从文件加载配置，文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut file = File::open(path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let settings = serde_json::from_str(&content)?;

        Ok(settings)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;

        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }
}
