//! 配置管理模块
//! 支持从配置文件与环境变量加载配置（环境变量优先级最高）

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    domain::NetworkType,
    hardware::transport::{Platform, TransportKind},
};

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub chain_status: ChainStatusConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub with_target: bool,
    pub ansi: bool,
}

/// 链节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network_type: NetworkType,
    pub chain_id: String,
    pub rpc_url: String,
    /// Conflux 地址编码使用
    #[serde(default)]
    pub net_id: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

/// 硬件钱包配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub platform: Platform,
    /// 覆盖平台默认的传输方式
    pub transport: Option<TransportKind>,
    pub retry_delay_ms: u64,
    /// 覆盖平台默认的重试截止时间
    pub timeout_ms: Option<u64>,
    pub idle_timeout_ms: u64,
    pub account_limit: u32,
    pub device_name_prefix: String,
}

/// 链高度缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainStatusConfig {
    pub ttl_ms: u64,
}

/// JSON-RPC 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            with_target: true,
            ansi: true,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Android,
            transport: None,
            retry_delay_ms: 1000,
            timeout_ms: None,
            idle_timeout_ms: 60_000,
            account_limit: 127,
            device_name_prefix: "CT".into(),
        }
    }
}

impl HardwareConfig {
    /// 实际使用的传输方式
    pub fn effective_transport(&self) -> TransportKind {
        self.transport
            .unwrap_or_else(|| self.platform.default_transport())
    }

    /// 实际使用的重试截止时间（毫秒）
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms
            .unwrap_or_else(|| self.platform.default_timeout_ms())
    }
}

impl Default for ChainStatusConfig {
    fn default() -> Self {
        Self { ttl_ms: 1000 }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// 仅使用默认值与环境变量
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 依次加载 .env、配置文件、IRONSIGN_* 环境变量
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("IRONSIGN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("IRONSIGN_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(platform) = std::env::var("IRONSIGN_HARDWARE_PLATFORM") {
            self.hardware.platform = platform
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid IRONSIGN_HARDWARE_PLATFORM: {}", e))?;
        }
        if let Ok(transport) = std::env::var("IRONSIGN_HARDWARE_TRANSPORT") {
            self.hardware.transport = Some(
                transport
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid IRONSIGN_HARDWARE_TRANSPORT: {}", e))?,
            );
        }
        if let Some(limit) = env_parse("IRONSIGN_HARDWARE_ACCOUNT_LIMIT") {
            self.hardware.account_limit = limit;
        }
        if let Some(ttl) = env_parse("IRONSIGN_CHAIN_STATUS_TTL_MS") {
            self.chain_status.ttl_ms = ttl;
        }
        if let Some(timeout) = env_parse("IRONSIGN_RPC_TIMEOUT_SECS") {
            self.rpc.timeout_secs = timeout;
        }
        if let Some(retries) = env_parse("IRONSIGN_RPC_MAX_RETRIES") {
            self.rpc.max_retries = retries;
        }
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        for chain in &self.chains {
            if chain.rpc_url.trim().is_empty() {
                anyhow::bail!(
                    "Chain {} ({}) has an empty rpc_url",
                    chain.chain_id,
                    chain.network_type
                );
            }
            if chain.network_type == NetworkType::Conflux && chain.net_id.unwrap_or(0) == 0 {
                anyhow::bail!(
                    "Conflux chain {} requires a positive net_id",
                    chain.chain_id
                );
            }
        }

        if self.hardware.account_limit == 0 || self.hardware.account_limit > 255 {
            anyhow::bail!("hardware.account_limit must be within 1..=255");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_status.ttl_ms, 1000);
        assert_eq!(config.hardware.account_limit, 127);
        assert_eq!(config.hardware.effective_transport(), TransportKind::Apdu);
        assert_eq!(config.hardware.effective_timeout_ms(), 30_000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[hardware]
platform = "ios"

[[chains]]
network_type = "ethereum"
chain_id = "0x1"
rpc_url = "http://localhost:8545"

[[chains]]
network_type = "conflux"
chain_id = "0x405"
rpc_url = "http://localhost:12537"
net_id = 1029
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[1].net_id, Some(1029));
        assert_eq!(config.hardware.effective_transport(), TransportKind::Ble);
        assert_eq!(config.hardware.effective_timeout_ms(), 60_000);
        // 未出现的段落使用默认值
        assert_eq!(config.rpc.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chains.push(ChainConfig {
            network_type: NetworkType::Conflux,
            chain_id: "0x1".into(),
            rpc_url: "http://localhost".into(),
            net_id: None,
            name: None,
        });
        assert!(config.validate().is_err());
    }
}
