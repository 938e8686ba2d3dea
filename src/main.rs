//! IronSign 启动入口
//!
//! 加载配置、初始化日志、组装上下文并探测各链节点高度。
//! 签名流水线作为库嵌入宿主使用，这里只做启动自检。

use std::sync::Arc;

use anyhow::{Context, Result};
use ironsign::{
    config::Config,
    domain::ChainRef,
    infrastructure::logging::init_logging,
    repository::InMemoryWalletRepository,
    service::InMemoryKeyStore,
    AppContext, AppDependencies,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging)?;
    tracing::info!(config_path = ?config_path, chains = config.chains.len(), "Starting IronSign");

    let ctx = AppContext::new(
        config,
        AppDependencies {
            repository: Arc::new(InMemoryWalletRepository::new()),
            key_store: Arc::new(InMemoryKeyStore::new()),
            card_factory: None,
            event_bus: None,
        },
    )?;

    for provider in ctx.chains.get_all() {
        let chain = ChainRef::new(provider.network_type(), provider.chain_id());
        match ctx.chain_status.get_chain_height(&chain).await {
            Ok(height) => tracing::info!(
                chain_id = %chain.chain_id,
                network_type = %chain.network_type,
                height,
                "Chain reachable"
            ),
            Err(e) => tracing::warn!(
                chain_id = %chain.chain_id,
                network_type = %chain.network_type,
                error = %e,
                "Chain unreachable"
            ),
        }
    }

    tracing::info!("IronSign ready");
    Ok(())
}
