pub mod config;
pub mod logger;

pub use config::{ConfigError, LoggingSettings, NodeSettings, Settings, DEFAULT_SETTINGS_FILE};
pub use logger::{parse_log_level, setup_logger, LoggerError, TimedRotatingFile};

/// 获取应用程序版本
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 生成随机节点ID：128位随机整数的十进制表示
pub fn random_node_id() -> String {
    use rand::Rng;
    let id: u128 = rand::thread_rng().gen();
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_node_id() {
        let id1 = random_node_id();
        let id2 = random_node_id();

        // 两次生成的ID应该不同
        assert_ne!(id1, id2);

        assert!(id1.parse::<u128>().is_ok());
        assert!(id1.len() <= 39);
    }
}
