use crate::utils::config::LoggingSettings;
use chrono::{DateTime, Local};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Failed to open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("Logger already initialized: {0}")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// 设置日志记录器
///
/// 日志格式如 `2024-05-01 12:00:00,123 - grid_node::node - INFO - message`。
/// `RUST_LOG` 优先，否则使用 `level`（或配置中的级别）。
/// 启用 `logfile` 时每行同时写入按时间轮转的文件。
pub fn setup_logger(settings: &LoggingSettings, level: Option<LevelFilter>) -> Result<(), LoggerError> {
    let level = match level {
        Some(level) => level,
        None => parse_log_level(&settings.level)?,
    };

    // 从环境变量获取日志级别
    let env = Env::default().default_filter_or(level_to_string(level));
    let mut builder = Builder::from_env(env);

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.target(),
            record.level(),
            record.args()
        )
    });

    if settings.logfile {
        let file = TimedRotatingFile::open(
            &settings.logfile_path,
            Duration::from_secs(settings.rotate_interval_secs),
            settings.backup_count,
        )
        .map_err(|source| LoggerError::LogFile {
            path: settings.logfile_path.clone(),
            source,
        })?;

        builder.target(Target::Pipe(Box::new(Tee {
            console: io::stderr(),
            file,
        })));
    }

    builder.try_init()?;

    Ok(())
}

/// 将日志级别转换为字符串
fn level_to_string(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// 从字符串解析日志级别
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter, LoggerError> {
    match level_str.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" | "critical" | "fatal" => Ok(LevelFilter::Error),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(LoggerError::InvalidLevel(level_str.to_string())),
    }
}

/// 每行同时写入控制台和日志文件
struct Tee<W> {
    console: W,
    file: TimedRotatingFile,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}

/// 按固定间隔轮转的日志文件
///
/// 轮转时当前文件重命名为 `<name>.<timestamp>` 并新建文件，
/// 只保留最新的 `backup_count` 个备份。
/// `backup_count` 为0时保留全部备份。
pub struct TimedRotatingFile {
    path: PathBuf,
    interval: Duration,
    backup_count: usize,
    file: File,
    rollover_at: DateTime<Local>,
}

impl TimedRotatingFile {
    pub fn open(path: &Path, interval: Duration, backup_count: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            interval,
            backup_count,
            file,
            rollover_at: next_rollover(Local::now(), interval),
        })
    }

    /// 已轮转的日志文件，按时间从旧到新
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = match self.path.file_name() {
            Some(name) => format!("{}.", name.to_string_lossy()),
            None => return Ok(Vec::new()),
        };

        let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();

        // 时间戳后缀按字典序即按时间排序
        backups.sort();
        Ok(backups)
    }

    fn rotate(&mut self, now: DateTime<Local>) -> io::Result<()> {
        self.file.flush()?;

        let suffix = now.format("%Y-%m-%d_%H-%M-%S");
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".{}", suffix));
        fs::rename(&self.path, &backup)?;

        let backups = self.backups()?;
        if self.backup_count > 0 && backups.len() > self.backup_count {
            for old in &backups[..backups.len() - self.backup_count] {
                fs::remove_file(old)?;
            }
        }

        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.rollover_at = next_rollover(now, self.interval);

        Ok(())
    }
}

impl Write for TimedRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let now = Local::now();
        if now >= self.rollover_at {
            self.rotate(now)?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn next_rollover(from: DateTime<Local>, interval: Duration) -> DateTime<Local> {
    let interval = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(365));
    from + interval
}
