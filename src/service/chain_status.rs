//! 链高度查询服务
//!
//! 读穿透缓存，键为 `{networkType}:{chainId 小写}:{查询类型}`，固定 TTL。
//! 同一键在请求未完成时的并发调用共享同一个上游请求。
//! 缓存与在途请求表由一把互斥锁保护，锁只在读写表时持有，不跨越 RPC 调用。

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde_json::{json, Value};
use tokio::{sync::Mutex, time::Instant};

use crate::{
    chains::ChainRegistry,
    domain::{ChainRef, NetworkType},
    error::{CoreError, CoreResult},
    infrastructure::{rpc::JsonRpcClient, rpc_validator::to_u64},
};

pub const DEFAULT_STATUS_TTL: Duration = Duration::from_millis(1000);

/// Conflux 默认纪元标签
pub const DEFAULT_EPOCH_TAG: &str = "latest_state";

type InFlight = Shared<BoxFuture<'static, CoreResult<u64>>>;

struct CacheEntry {
    value: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct StatusState {
    cache: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
}

pub struct ChainStatusService {
    registry: Arc<ChainRegistry>,
    ttl: Duration,
    state: Arc<Mutex<StatusState>>,
}

impl ChainStatusService {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self::with_ttl(registry, DEFAULT_STATUS_TTL)
    }

    pub fn with_ttl(registry: Arc<ChainRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            state: Arc::new(Mutex::new(StatusState::default())),
        }
    }

    /// EVM 区块高度（eth_blockNumber）
    pub async fn get_block_number(&self, chain: &ChainRef) -> CoreResult<u64> {
        if chain.network_type != NetworkType::Ethereum {
            return Err(CoreError::UnsupportedNetwork(format!(
                "getBlockNumber is only available on ethereum networks, got {}",
                chain.network_type
            )));
        }
        let rpc = self.rpc_for(chain)?;
        let key = cache_key(chain, "evm:blockNumber");
        self.query(key, rpc, "eth_blockNumber", json!([])).await
    }

    /// Conflux 纪元高度（cfx_epochNumber），不同标签分别缓存
    pub async fn get_epoch_height(&self, chain: &ChainRef, tag: Option<&str>) -> CoreResult<u64> {
        if chain.network_type != NetworkType::Conflux {
            return Err(CoreError::UnsupportedNetwork(format!(
                "getEpochHeight is only available on conflux networks, got {}",
                chain.network_type
            )));
        }
        let tag = tag.unwrap_or(DEFAULT_EPOCH_TAG);
        let rpc = self.rpc_for(chain)?;
        let key = cache_key(chain, &format!("cfx:epochHeight:{}", tag));
        self.query(key, rpc, "cfx_epochNumber", json!([tag])).await
    }

    /// 按链族取当前高度
    pub async fn get_chain_height(&self, chain: &ChainRef) -> CoreResult<u64> {
        match chain.network_type {
            NetworkType::Ethereum => self.get_block_number(chain).await,
            NetworkType::Conflux => self.get_epoch_height(chain, None).await,
        }
    }

    fn rpc_for(&self, chain: &ChainRef) -> CoreResult<Arc<dyn JsonRpcClient>> {
        let provider = self
            .registry
            .require(&chain.chain_id, Some(chain.network_type))?;
        Ok(provider.rpc())
    }

    async fn query(
        &self,
        key: String,
        rpc: Arc<dyn JsonRpcClient>,
        method: &'static str,
        params: Value,
    ) -> CoreResult<u64> {
        let fetch = {
            let mut state = self.state.lock().await;

            if let Some(entry) = state.cache.get(&key) {
                if Instant::now() < entry.expires_at {
                    tracing::debug!(key = %key, value = entry.value, "Chain status cache hit");
                    return Ok(entry.value);
                }
            }

            match state.in_flight.get(&key) {
                Some(pending) => {
                    tracing::debug!(key = %key, "Joining in-flight chain status request");
                    pending.clone()
                }
                None => {
                    tracing::debug!(key = %key, method = method, "Chain status cache miss");
                    let fetch = self.fetch(key.clone(), rpc, method, params);
                    state.in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// 上游请求；完成时由任意一个等待者写回缓存并移出在途表
    fn fetch(&self, key: String, rpc: Arc<dyn JsonRpcClient>, method: &'static str, params: Value) -> InFlight {
        let state = self.state.clone();
        let ttl = self.ttl;
        async move {
            let result = match rpc.request(method, params).await {
                Ok(value) => to_u64(&value, method),
                Err(e) => Err(e),
            };

            let mut state = state.lock().await;
            state.in_flight.remove(&key);
            if let Ok(value) = result {
                state.cache.insert(
                    key,
                    CacheEntry {
                        value,
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            result
        }
        .boxed()
        .shared()
    }
}

fn cache_key(chain: &ChainRef, kind: &str) -> String {
    format!(
        "{}:{}:{}",
        chain.network_type,
        chain.chain_id.trim().to_lowercase(),
        kind
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::{ConfluxChainProvider, EthereumChainProvider},
        infrastructure::rpc::mock::MockRpcClient,
    };

    fn service(eth_rpc: Arc<MockRpcClient>, cfx_rpc: Arc<MockRpcClient>) -> ChainStatusService {
        let mut registry = ChainRegistry::new();
        registry
            .register(Arc::new(EthereumChainProvider::new("0x1", eth_rpc).unwrap()))
            .unwrap();
        registry
            .register(Arc::new(ConfluxChainProvider::new("0x405", 1029, cfx_rpc).unwrap()))
            .unwrap();
        ChainStatusService::new(Arc::new(registry))
    }

    fn eth() -> ChainRef {
        ChainRef::new(NetworkType::Ethereum, "0x1")
    }

    fn cfx() -> ChainRef {
        ChainRef::new(NetworkType::Conflux, "0x405")
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_request() {
        let eth_rpc = Arc::new(
            MockRpcClient::new()
                .with_delay(Duration::from_millis(100))
                .reply("eth_blockNumber", json!("0x10")),
        );
        let svc = service(eth_rpc.clone(), Arc::new(MockRpcClient::new()));

        let chain = eth();
        let (a, b) = tokio::join!(svc.get_block_number(&chain), svc.get_block_number(&chain));
        assert_eq!(a.unwrap(), 16);
        assert_eq!(b.unwrap(), 16);
        assert_eq!(eth_rpc.calls("eth_blockNumber").len(), 1);

        // TTL 内命中缓存
        svc.get_block_number(&ChainRef::new(NetworkType::Ethereum, "0X1")).await.unwrap();
        assert_eq!(eth_rpc.calls("eth_blockNumber").len(), 1);

        tokio::time::advance(Duration::from_millis(1001)).await;
        eth_rpc.set("eth_blockNumber", json!("0x11"));
        assert_eq!(svc.get_block_number(&chain).await.unwrap(), 17);
        assert_eq!(eth_rpc.calls("eth_blockNumber").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_epoch_tags_cache_independently() {
        let cfx_rpc = Arc::new(MockRpcClient::new().reply("cfx_epochNumber", json!(42)));
        let svc = service(Arc::new(MockRpcClient::new()), cfx_rpc.clone());

        assert_eq!(svc.get_epoch_height(&cfx(), None).await.unwrap(), 42);
        svc.get_epoch_height(&cfx(), Some("latest_mined")).await.unwrap();
        svc.get_epoch_height(&cfx(), None).await.unwrap();

        let calls = cfx_rpc.calls("cfx_epochNumber");
        assert_eq!(calls, vec![json!(["latest_state"]), json!(["latest_mined"])]);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let eth_rpc = Arc::new(MockRpcClient::new().reply("eth_blockNumber", json!("not-a-number")));
        let svc = service(eth_rpc.clone(), Arc::new(MockRpcClient::new()));

        let err = svc.get_block_number(&eth()).await.unwrap_err();
        assert_eq!(err.code(), "CHAIN_RPC_INVALID_RESPONSE");

        eth_rpc.set("eth_blockNumber", json!("12"));
        assert_eq!(svc.get_block_number(&eth()).await.unwrap(), 12);
        assert_eq!(eth_rpc.calls("eth_blockNumber").len(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_and_wrong_family() {
        let svc = service(Arc::new(MockRpcClient::new()), Arc::new(MockRpcClient::new()));

        let err = svc
            .get_block_number(&ChainRef::new(NetworkType::Ethereum, "0x89"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CHAIN_PROVIDER_NOT_FOUND");

        let err = svc.get_block_number(&cfx()).await.unwrap_err();
        assert_eq!(err.code(), "TX_UNSUPPORTED_NETWORK");
        assert!(svc.get_epoch_height(&eth(), None).await.is_err());
    }
}
