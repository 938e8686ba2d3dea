//! 集成测试辅助
//!
//! 脚本化 JSON-RPC、内存 BSIM 卡片与预置数据的仓储。

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ironsign::{
    chains::{ChainRegistry, EthereumChainProvider},
    domain::{AccountRecord, AddressRecord, NetworkRecord, NetworkType, VaultRecord, VaultType},
    error::{CoreError, CoreResult},
    hardware::{
        card::{BsimCard, CardError, CardFactory, CardResult, PubkeyRecord, SignatureComponents, EVM_COIN_TYPE},
        BsimHardwareWallet, BsimOptions, ConnectOptions, HardwareWallet, HardwareWalletRegistry, Platform,
        TransportKind,
    },
    infrastructure::{
        event_bus::{EventBus, HardwareSignEvent, InMemoryEventBus},
        rpc::JsonRpcClient,
    },
    repository::InMemoryWalletRepository,
    service::{
        ChainStatusService, InMemoryKeyStore, SignatureRecordService, SigningService, TransactionService,
    },
};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};

pub const SECRET: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// SECRET 对应的地址
pub const FROM: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const TO: &str = "0x0000000000000000000000000000000000000001";
pub const ADDRESS_ID: &str = "addr-1";

pub fn tx_hash() -> String {
    format!("0x{}", "cd".repeat(32))
}

// ━━━━━━━━━━ JSON-RPC ━━━━━━━━━━

#[derive(Default)]
pub struct ScriptedRpc {
    replies: Mutex<HashMap<String, Result<Value, String>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, method: &str, value: Value) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Ok(value));
        self
    }

    pub fn fail(self, method: &str, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Err(message.to_string()));
        self
    }

    /// 一组足够完成 legacy EVM 发送的应答
    pub fn evm_defaults() -> Self {
        Self::new()
            .reply("eth_getTransactionCount", json!("0x0"))
            .reply("eth_estimateGas", json!("0x5208"))
            .reply("eth_gasPrice", json!("0x3b9aca00"))
            .reply("eth_getBlockByNumber", json!({"number": "0x20"}))
            .reply("eth_blockNumber", json!("0x20"))
            .reply("eth_sendRawTransaction", json!(tx_hash()))
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

#[async_trait]
impl JsonRpcClient for ScriptedRpc {
    async fn request(&self, method: &str, params: Value) -> CoreResult<Value> {
        self.calls.lock().unwrap().push((method.to_string(), params));
        match self.replies.lock().unwrap().get(method).cloned() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(CoreError::Rpc {
                method: method.to_string(),
                code: Some(-32000),
                message,
            }),
            None => Err(CoreError::Rpc {
                method: method.to_string(),
                code: Some(-32601),
                message: "method not found".to_string(),
            }),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted://rpc"
    }
}

// ━━━━━━━━━━ BSIM 卡片 ━━━━━━━━━━

pub struct MemoryCard {
    key: SigningKey,
    slots: Mutex<Vec<u8>>,
    pub signed_slots: Mutex<Vec<u8>>,
    /// 签名返回的卡片状态码
    sign_failure: Option<&'static str>,
}

impl MemoryCard {
    pub fn new(slots: Vec<u8>) -> Self {
        Self {
            key: SigningKey::from_slice(&hex::decode(SECRET).unwrap()).unwrap(),
            slots: Mutex::new(slots),
            signed_slots: Mutex::new(Vec::new()),
            sign_failure: None,
        }
    }

    pub fn failing_with(mut self, status: &'static str) -> Self {
        self.sign_failure = Some(status);
        self
    }
}

#[async_trait]
impl BsimCard for MemoryCard {
    async fn get_version(&self) -> CardResult<String> {
        Ok("0100".into())
    }

    async fn get_iccid(&self) -> CardResult<String> {
        Ok("89860000000000000001".into())
    }

    async fn verify_bpin(&self) -> CardResult<()> {
        Ok(())
    }

    async fn update_bpin(&self) -> CardResult<()> {
        Ok(())
    }

    async fn derive_key(&self, _coin_type: u32, _algorithm: u8) -> CardResult<()> {
        let mut slots = self.slots.lock().unwrap();
        let next = slots.iter().max().copied().unwrap_or(0) + 1;
        slots.push(next);
        Ok(())
    }

    async fn export_pubkeys(&self) -> CardResult<Vec<PubkeyRecord>> {
        let point = self.key.verifying_key().to_encoded_point(false);
        let key = hex::encode_upper(&point.as_bytes()[1..]);
        Ok(self
            .slots
            .lock()
            .unwrap()
            .iter()
            .map(|slot| PubkeyRecord {
                coin_type: EVM_COIN_TYPE,
                index: *slot,
                alg: 1,
                key: key.clone(),
            })
            .collect())
    }

    async fn sign_message(&self, hash: &[u8], _coin_type: u32, index: u8) -> CardResult<SignatureComponents> {
        if let Some(code) = self.sign_failure {
            return Err(CardError::Status {
                code: code.into(),
                message: format!("card status {}", code),
            });
        }
        self.signed_slots.lock().unwrap().push(index);
        let (signature, _) = self.key.sign_prehash_recoverable(hash).unwrap();
        Ok(SignatureComponents {
            r: hex::encode_upper(signature.r().to_bytes()),
            s: hex::encode_upper(signature.s().to_bytes()),
        })
    }

    async fn export_seed(&self, _key2: &str) -> CardResult<String> {
        Ok("C1PHER".into())
    }

    async fn restore_seed(&self, _key2: &str, _cipher_hex: &str) -> CardResult<()> {
        Ok(())
    }
}

pub struct MemoryCardFactory {
    pub card: Arc<MemoryCard>,
    pub created: AtomicUsize,
}

impl MemoryCardFactory {
    pub fn new(card: MemoryCard) -> Arc<Self> {
        Arc::new(Self {
            card: Arc::new(card),
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl CardFactory for MemoryCardFactory {
    fn create(&self, _transport: TransportKind, _device_identifier: Option<&str>) -> Arc<dyn BsimCard> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.card.clone()
    }
}

/// 短重试窗口，配合暂停时钟使用
pub fn fast_options() -> BsimOptions {
    BsimOptions {
        retry_delay: Duration::from_millis(10),
        timeout: Duration::from_millis(50),
        ..BsimOptions::for_platform(Platform::Android)
    }
}

pub async fn connected_wallet(card: MemoryCard) -> (Arc<BsimHardwareWallet>, Arc<MemoryCardFactory>) {
    let factory = MemoryCardFactory::new(card);
    let wallet = Arc::new(BsimHardwareWallet::new(factory.clone(), fast_options()));
    wallet.connect(ConnectOptions::default()).await.unwrap();
    (wallet, factory)
}

// ━━━━━━━━━━ 仓储与流水线 ━━━━━━━━━━

pub async fn seeded_repo(vault_type: VaultType, account_index: u32) -> Arc<InMemoryWalletRepository> {
    let repo = Arc::new(InMemoryWalletRepository::new());
    repo.insert_network(NetworkRecord {
        id: "net-1".into(),
        name: "Ethereum".into(),
        chain_id: "0x1".into(),
        network_type: NetworkType::Ethereum,
        net_id: 0,
        hd_path: "m/44'/60'/0'/0".into(),
    })
    .await;
    repo.insert_vault(VaultRecord {
        id: "vault-1".into(),
        vault_type,
        hardware_device_id: None,
        is_backup: false,
    })
    .await;
    repo.insert_account(AccountRecord {
        id: "acc-1".into(),
        vault_id: "vault-1".into(),
        index: account_index,
    })
    .await;
    repo.insert_address(AddressRecord {
        id: ADDRESS_ID.into(),
        account_id: "acc-1".into(),
        network_id: "net-1".into(),
        hex: FROM.into(),
        base32: FROM.into(),
    })
    .await;
    repo
}

pub struct Pipeline {
    pub service: TransactionService,
    pub repo: Arc<InMemoryWalletRepository>,
    pub rpc: Arc<ScriptedRpc>,
    pub events: Arc<InMemoryEventBus>,
}

impl Pipeline {
    /// 按发布顺序返回事件
    pub async fn events(&self) -> Vec<HardwareSignEvent> {
        let mut history = self.events.get_event_history(100, 0).await.unwrap();
        history.reverse();
        history.into_iter().map(|e| e.event).collect()
    }
}

pub async fn pipeline(
    repo: Arc<InMemoryWalletRepository>,
    rpc: ScriptedRpc,
    hardware: Option<Arc<dyn HardwareWallet>>,
) -> Pipeline {
    let rpc = Arc::new(rpc);
    let mut chains = ChainRegistry::new();
    chains
        .register(Arc::new(EthereumChainProvider::new("0x1", rpc.clone()).unwrap()))
        .unwrap();
    let chains = Arc::new(chains);

    let mut adapters = HardwareWalletRegistry::new();
    if let Some(adapter) = hardware {
        adapters.register("bsim", None, adapter).unwrap();
    }

    let keys = Arc::new(InMemoryKeyStore::new());
    keys.insert_hex(ADDRESS_ID, SECRET).await.unwrap();

    let signing = Arc::new(SigningService::new(repo.clone(), keys, Arc::new(adapters)));
    let status = Arc::new(ChainStatusService::new(chains.clone()));
    let records = Arc::new(SignatureRecordService::new(repo.clone(), status));
    let events = Arc::new(InMemoryEventBus::new());

    let service = TransactionService::new(repo.clone(), chains, signing, records, events.clone());
    Pipeline {
        service,
        repo,
        rpc,
        events,
    }
}
