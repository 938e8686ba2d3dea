//! 内存实现，供测试与嵌入式宿主使用

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{TxDetails, WalletRepository};
use crate::{
    domain::{
        AccountRecord, AddressRecord, NetworkRecord, NewTxBatch, SignatureRecord, TxRecord,
        VaultRecord,
    },
    error::{CoreError, CoreResult},
};

#[derive(Default)]
struct Tables {
    addresses: HashMap<String, AddressRecord>,
    networks: HashMap<String, NetworkRecord>,
    accounts: HashMap<String, AccountRecord>,
    vaults: HashMap<String, VaultRecord>,
    txs: Vec<TxDetails>,
    signatures: Vec<SignatureRecord>,
}

#[derive(Default)]
pub struct InMemoryWalletRepository {
    tables: RwLock<Tables>,
    /// 置位后写操作返回存储错误，用于测试失败路径
    fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_network(&self, network: NetworkRecord) {
        self.tables
            .write()
            .await
            .networks
            .insert(network.id.clone(), network);
    }

    pub async fn insert_address(&self, address: AddressRecord) {
        self.tables
            .write()
            .await
            .addresses
            .insert(address.id.clone(), address);
    }

    pub async fn insert_account(&self, account: AccountRecord) {
        self.tables
            .write()
            .await
            .accounts
            .insert(account.id.clone(), account);
    }

    pub async fn insert_vault(&self, vault: VaultRecord) {
        self.tables.write().await.vaults.insert(vault.id.clone(), vault);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Storage("write rejected".to_string()));
        }
        Ok(())
    }

    pub async fn tx_count(&self) -> usize {
        self.tables.read().await.txs.len()
    }

    pub async fn all_signatures(&self) -> Vec<SignatureRecord> {
        self.tables.read().await.signatures.clone()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn find_address(&self, address_id: &str) -> CoreResult<Option<AddressRecord>> {
        Ok(self.tables.read().await.addresses.get(address_id).cloned())
    }

    async fn list_addresses_by_network(&self, network_id: &str) -> CoreResult<Vec<AddressRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .addresses
            .values()
            .filter(|a| a.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn list_all_addresses(&self) -> CoreResult<Vec<AddressRecord>> {
        Ok(self.tables.read().await.addresses.values().cloned().collect())
    }

    async fn find_network(&self, network_id: &str) -> CoreResult<Option<NetworkRecord>> {
        Ok(self.tables.read().await.networks.get(network_id).cloned())
    }

    async fn find_account(&self, account_id: &str) -> CoreResult<Option<AccountRecord>> {
        Ok(self.tables.read().await.accounts.get(account_id).cloned())
    }

    async fn find_vault(&self, vault_id: &str) -> CoreResult<Option<VaultRecord>> {
        Ok(self.tables.read().await.vaults.get(vault_id).cloned())
    }

    async fn create_tx_batch(&self, batch: NewTxBatch) -> CoreResult<TxRecord> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let tx = batch.tx.clone();
        tables.txs.push(TxDetails {
            tx: batch.tx,
            payload: batch.payload,
            extra: batch.extra,
        });
        Ok(tx)
    }

    async fn find_tx(&self, tx_id: &str) -> CoreResult<Option<TxDetails>> {
        Ok(self
            .tables
            .read()
            .await
            .txs
            .iter()
            .find(|d| d.tx.id == tx_id)
            .cloned())
    }

    async fn list_txs_by_address(&self, address_id: &str) -> CoreResult<Vec<TxDetails>> {
        let mut txs: Vec<TxDetails> = self
            .tables
            .read()
            .await
            .txs
            .iter()
            .filter(|d| d.tx.address_id == address_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.tx.send_at.cmp(&a.tx.send_at));
        Ok(txs)
    }

    async fn create_signature(&self, record: SignatureRecord) -> CoreResult<SignatureRecord> {
        self.check_writable()?;
        self.tables.write().await.signatures.push(record.clone());
        Ok(record)
    }

    async fn link_signature_tx(&self, signature_id: &str, tx_id: &str) -> CoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .signatures
            .iter_mut()
            .find(|s| s.id == signature_id)
            .ok_or_else(|| CoreError::not_found("Signature", signature_id))?;
        record.tx_id = Some(tx_id.to_string());
        Ok(())
    }

    async fn list_signatures_by_address(&self, address_id: &str) -> CoreResult<Vec<SignatureRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .signatures
            .iter()
            .filter(|s| s.address_id == address_id)
            .cloned()
            .collect())
    }
}
