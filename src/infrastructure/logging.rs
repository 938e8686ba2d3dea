//! 日志系统配置模块
//! 支持结构化日志与日志级别配置

use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别；重复初始化返回错误而不是 panic。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.format == "json" {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()
    } else {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.ansi),
            )
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// 简化初始化（使用默认配置）
pub fn init_default_logging() {
    let config = LoggingConfig::default();
    if let Err(e) = init_logging(&config) {
        eprintln!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "text".to_string(),
            with_target: false,
            ansi: false,
        };
        let first = init_logging(&config);
        let second = init_logging(&config);
        // 测试进程中可能已有全局订阅者，至少第二次必然失败
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
