//! 链提供方注册表
//!
//! 以 (networkType, chainId 小写) 为键。chainId 按字符串比较，不做数值归一化，
//! 因此 "1" 与 "0x1" 是两条不同的链。

use std::sync::Arc;

use super::provider::ChainProvider;
use crate::{
    domain::NetworkType,
    error::{CoreError, CoreResult},
};

#[derive(Default)]
pub struct ChainRegistry {
    /// 注册顺序即迭代顺序
    providers: Vec<Arc<dyn ChainProvider>>,
}

fn same_chain_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ChainProvider>) -> CoreResult<()> {
        let network_type = provider.network_type();
        let chain_id = provider.chain_id().to_string();
        if self.find_exact(&chain_id, network_type).is_some() {
            return Err(CoreError::DuplicateChain {
                network_type,
                chain_id,
            });
        }

        tracing::info!(
            network_type = %network_type,
            chain_id = %chain_id,
            rpc = %provider.rpc().endpoint(),
            "Chain provider registered"
        );
        self.providers.push(provider);
        Ok(())
    }

    fn find_exact(&self, chain_id: &str, network_type: NetworkType) -> Option<&Arc<dyn ChainProvider>> {
        self.providers
            .iter()
            .find(|p| p.network_type() == network_type && same_chain_id(p.chain_id(), chain_id))
    }

    /// 查找提供方
    ///
    /// 指定 `network_type` 时精确匹配；否则按 chainId 扫描，
    /// 多个链族共用同一 chainId 时返回 `AmbiguousChain`。
    pub fn get(
        &self,
        chain_id: &str,
        network_type: Option<NetworkType>,
    ) -> CoreResult<Option<Arc<dyn ChainProvider>>> {
        if let Some(network_type) = network_type {
            return Ok(self.find_exact(chain_id, network_type).cloned());
        }

        let matches: Vec<&Arc<dyn ChainProvider>> = self
            .providers
            .iter()
            .filter(|p| same_chain_id(p.chain_id(), chain_id))
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some((*only).clone())),
            many => Err(CoreError::AmbiguousChain {
                chain_id: chain_id.to_string(),
                candidates: many.iter().map(|p| p.network_type()).collect(),
            }),
        }
    }

    /// 同 `get`，缺失时返回 `ChainProviderNotFound`
    pub fn require(&self, chain_id: &str, network_type: Option<NetworkType>) -> CoreResult<Arc<dyn ChainProvider>> {
        self.get(chain_id, network_type)?
            .ok_or_else(|| CoreError::ChainProviderNotFound {
                chain_id: chain_id.to_string(),
                network_type,
            })
    }

    /// 某链族的全部提供方，按注册顺序
    pub fn get_by_type(&self, network_type: NetworkType) -> Vec<Arc<dyn ChainProvider>> {
        self.providers
            .iter()
            .filter(|p| p.network_type() == network_type)
            .cloned()
            .collect()
    }

    /// 未指定链族且存在歧义时视为存在
    pub fn has(&self, chain_id: &str, network_type: Option<NetworkType>) -> bool {
        match self.get(chain_id, network_type) {
            Ok(found) => found.is_some(),
            Err(_) => true,
        }
    }

    /// 返回副本，修改不影响注册表
    pub fn get_all(&self) -> Vec<Arc<dyn ChainProvider>> {
        self.providers.clone()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::{ConfluxChainProvider, EthereumChainProvider},
        infrastructure::rpc::mock::MockRpcClient,
    };

    fn eth(chain_id: &str) -> Arc<dyn ChainProvider> {
        Arc::new(EthereumChainProvider::new(chain_id, Arc::new(MockRpcClient::new())).unwrap())
    }

    fn cfx(chain_id: &str) -> Arc<dyn ChainProvider> {
        Arc::new(ConfluxChainProvider::new(chain_id, 1, Arc::new(MockRpcClient::new())).unwrap())
    }

    #[test]
    fn test_duplicate_is_case_insensitive() {
        let mut registry = ChainRegistry::new();
        registry.register(eth("0xAA36A7")).unwrap();
        let err = registry.register(eth("0xaa36a7")).unwrap_err();
        assert_eq!(err.code(), "CHAIN_DUPLICATE");
        assert_eq!(err.to_string(), "Chain already registered: ethereum (0xaa36a7)");

        // 同一 chainId 的不同链族可以共存
        registry.register(cfx("0xaa36a7")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_without_type_detects_ambiguity() {
        let mut registry = ChainRegistry::new();
        registry.register(eth("0x1")).unwrap();
        registry.register(cfx("0x1")).unwrap();

        let err = registry.get("0x1", None).err().unwrap();
        assert_eq!(err.code(), "CHAIN_AMBIGUOUS");
        assert!(registry.has("0x1", None));

        let found = registry.get("0X1", Some(NetworkType::Conflux)).unwrap().unwrap();
        assert_eq!(found.network_type(), NetworkType::Conflux);
    }

    #[test]
    fn test_distinct_chain_ids_are_not_ambiguous() {
        let mut registry = ChainRegistry::new();
        registry.register(eth("1")).unwrap();
        registry.register(cfx("0x1")).unwrap();

        let found = registry.get("1", None).unwrap().unwrap();
        assert_eq!(found.network_type(), NetworkType::Ethereum);
        assert!(registry.get("56", None).unwrap().is_none());
        assert!(!registry.has("56", None));
    }

    #[test]
    fn test_require_reports_missing_chain() {
        let registry = ChainRegistry::new();
        let err = registry.require("0x1", Some(NetworkType::Ethereum)).err().unwrap();
        assert_eq!(err.code(), "CHAIN_PROVIDER_NOT_FOUND");
    }

    #[test]
    fn test_get_by_type_and_defensive_copy() {
        let mut registry = ChainRegistry::new();
        registry.register(eth("0x1")).unwrap();
        registry.register(cfx("0x405")).unwrap();
        registry.register(eth("0x89")).unwrap();

        let evm: Vec<String> = registry
            .get_by_type(NetworkType::Ethereum)
            .iter()
            .map(|p| p.chain_id().to_string())
            .collect();
        assert_eq!(evm, vec!["0x1", "0x89"]);

        let mut all = registry.get_all();
        all.clear();
        assert_eq!(registry.len(), 3);
    }
}
