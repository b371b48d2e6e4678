use grid_node::cli::CommandProcessor;
use grid_node::node::{Node, NodeOptions};
use grid_node::utils::{parse_log_level, setup_logger, Settings, DEFAULT_SETTINGS_FILE};

use clap::{ArgAction, Parser};
use colored::*;
use log::{info, LevelFilter};
use std::path::PathBuf;

/// 命令行参数
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[clap(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// 节点ID，默认随机生成
    #[clap(long)]
    id: Option<String>,

    /// 监听端口
    #[clap(short, long)]
    port: Option<u16>,

    /// 引导节点，格式: <host>:<port>
    #[clap(short, long)]
    bootstrap: Option<String>,

    /// 存储条目的生存时间（秒）
    #[clap(long)]
    ttl: Option<u64>,

    /// 日志级别
    #[clap(long)]
    log_level: Option<String>,

    /// 启用详细日志
    #[clap(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置文件，命令行参数覆盖配置
    let mut settings = Settings::load(&args.settings)?;
    if let Some(port) = args.port {
        settings.node.port = port;
    }
    if let Some(ttl) = args.ttl {
        settings.node.ttl_secs = ttl;
    }
    if args.bootstrap.is_some() {
        settings.node.bootstrap = args.bootstrap.clone();
    }

    // 初始化日志
    let level = if args.verbose {
        Some(LevelFilter::Debug)
    } else {
        args.log_level.as_deref().map(parse_log_level).transpose()?
    };
    setup_logger(&settings.logging, level)?;

    let mut options = NodeOptions::from_settings(&settings)?;
    options.id = args.id;

    info!("{}", format!("Starting grid node on port {}...", options.port).green().bold());

    let mut node = Node::new(options)?;
    node.info();

    let result = CommandProcessor::new(&node).run();

    node.shutdown();

    result
}
