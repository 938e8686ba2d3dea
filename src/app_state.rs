//! 应用上下文
//!
//! 启动时按配置组装链提供方、硬件适配器与各服务，之后只读共享。
//! 持久化、凭据库与卡片会话由宿主注入。

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::{
    chains::{ChainRegistry, ConfluxChainProvider, EthereumChainProvider},
    config::{ChainConfig, Config},
    domain::NetworkType,
    hardware::{card::CardFactory, BsimHardwareWallet, BsimOptions, HardwareWalletRegistry},
    infrastructure::{
        event_bus::{EventBus, InMemoryEventBus},
        rpc::{HttpJsonRpcClient, JsonRpcClient},
    },
    repository::WalletRepository,
    service::{
        chain_status::ChainStatusService,
        signature_record::SignatureRecordService,
        signing::{KeyStore, SigningService},
        transaction::TransactionService,
    },
};

/// 宿主提供的外部依赖
pub struct AppDependencies {
    pub repository: Arc<dyn WalletRepository>,
    pub key_store: Arc<dyn KeyStore>,
    /// 未提供时不注册 BSIM 适配器
    pub card_factory: Option<Arc<dyn CardFactory>>,
    pub event_bus: Option<Arc<dyn EventBus>>,
}

/// 共享的服务集合
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub repository: Arc<dyn WalletRepository>,
    pub chains: Arc<ChainRegistry>,
    pub hardware: Arc<HardwareWalletRegistry>,
    pub event_bus: Arc<dyn EventBus>,
    pub chain_status: Arc<ChainStatusService>,
    pub signature_records: Arc<SignatureRecordService>,
    pub signing: Arc<SigningService>,
    pub transactions: Arc<TransactionService>,
}

impl AppContext {
    pub fn new(config: Config, deps: AppDependencies) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let chains = Arc::new(build_chain_registry(&config)?);
        let hardware = Arc::new(build_hardware_registry(&config, deps.card_factory)?);
        let event_bus = deps
            .event_bus
            .unwrap_or_else(|| Arc::new(InMemoryEventBus::new()));

        let chain_status = Arc::new(ChainStatusService::with_ttl(
            chains.clone(),
            Duration::from_millis(config.chain_status.ttl_ms),
        ));
        let signature_records = Arc::new(SignatureRecordService::new(
            deps.repository.clone(),
            chain_status.clone(),
        ));
        let signing = Arc::new(SigningService::new(
            deps.repository.clone(),
            deps.key_store,
            hardware.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            deps.repository.clone(),
            chains.clone(),
            signing.clone(),
            signature_records.clone(),
            event_bus.clone(),
        ));

        tracing::info!(
            chains = chains.len(),
            hardware_adapters = hardware.len(),
            "Application context initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            repository: deps.repository,
            chains,
            hardware,
            event_bus,
            chain_status,
            signature_records,
            signing,
            transactions,
        })
    }
}

/// 每条链配置一个 HTTP JSON-RPC 通道与对应链族的提供方
pub fn build_chain_registry(config: &Config) -> Result<ChainRegistry> {
    let mut registry = ChainRegistry::new();
    for chain in &config.chains {
        let rpc: Arc<dyn JsonRpcClient> = Arc::new(HttpJsonRpcClient::new(chain.rpc_url.clone(), &config.rpc));
        register_chain(&mut registry, chain, rpc)
            .with_context(|| format!("Failed to register chain {} ({})", chain.chain_id, chain.network_type))?;
    }
    Ok(registry)
}

fn register_chain(registry: &mut ChainRegistry, chain: &ChainConfig, rpc: Arc<dyn JsonRpcClient>) -> Result<()> {
    match chain.network_type {
        NetworkType::Ethereum => {
            registry.register(Arc::new(EthereumChainProvider::new(chain.chain_id.clone(), rpc)?))?;
        }
        NetworkType::Conflux => {
            let net_id = chain.net_id.unwrap_or_default();
            registry.register(Arc::new(ConfluxChainProvider::new(chain.chain_id.clone(), net_id, rpc)?))?;
        }
    }
    Ok(())
}

pub fn build_hardware_registry(
    config: &Config,
    card_factory: Option<Arc<dyn CardFactory>>,
) -> Result<HardwareWalletRegistry> {
    let mut registry = HardwareWalletRegistry::new();
    if let Some(factory) = card_factory {
        let adapter = BsimHardwareWallet::new(factory, BsimOptions::from(&config.hardware));
        registry
            .register("bsim", None, Arc::new(adapter))
            .context("Failed to register BSIM adapter")?;
    } else {
        tracing::info!("No card factory provided, BSIM adapter disabled");
    }
    Ok(registry)
}
