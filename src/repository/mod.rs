//! 持久化抽象层
//!
//! 关系型存储由宿主提供；核心只依赖 [`WalletRepository`] 这一组读写操作。

pub mod memory;

use async_trait::async_trait;

pub use memory::InMemoryWalletRepository;

use crate::{
    domain::{
        AccountRecord, AddressRecord, NetworkRecord, NewTxBatch, SignatureRecord, TxExtraRecord,
        TxPayloadRecord, TxRecord, VaultRecord,
    },
    error::CoreResult,
};

/// 交易及其载荷、附加信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDetails {
    pub tx: TxRecord,
    pub payload: TxPayloadRecord,
    pub extra: TxExtraRecord,
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_address(&self, address_id: &str) -> CoreResult<Option<AddressRecord>>;

    /// 同一网络下的全部本地地址
    async fn list_addresses_by_network(&self, network_id: &str) -> CoreResult<Vec<AddressRecord>>;

    /// 全部本地地址（跨网络）
    async fn list_all_addresses(&self) -> CoreResult<Vec<AddressRecord>>;

    async fn find_network(&self, network_id: &str) -> CoreResult<Option<NetworkRecord>>;

    async fn find_account(&self, account_id: &str) -> CoreResult<Option<AccountRecord>>;

    async fn find_vault(&self, vault_id: &str) -> CoreResult<Option<VaultRecord>>;

    /// 原子写入 Tx + TxPayload + TxExtra
    async fn create_tx_batch(&self, batch: NewTxBatch) -> CoreResult<TxRecord>;

    async fn find_tx(&self, tx_id: &str) -> CoreResult<Option<TxDetails>>;

    /// 某地址的全部交易，按发送时间倒序
    async fn list_txs_by_address(&self, address_id: &str) -> CoreResult<Vec<TxDetails>>;

    async fn create_signature(&self, record: SignatureRecord) -> CoreResult<SignatureRecord>;

    async fn link_signature_tx(&self, signature_id: &str, tx_id: &str) -> CoreResult<()>;

    async fn list_signatures_by_address(&self, address_id: &str) -> CoreResult<Vec<SignatureRecord>>;
}
