//! 签名方解析
//!
//! 按账户所属保险库决定签名方式：
//! - HD / 私钥保险库：从外部凭据库取私钥，得到 [`SoftwareSigner`]
//! - BSIM 保险库：绑定硬件注册表中的适配器，得到 [`HardwareSigner`]
//!
//! 私钥只在签名瞬间以 `Zeroizing` 形式存在，不落日志。

use std::{collections::HashMap, str::FromStr, sync::Arc};

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer as _},
    types::{transaction::eip2718::TypedTransaction, Signature, H256},
};
use k256::ecdsa::SigningKey;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    domain::{
        AccountRecord, AddressRecord, HardwareSignResult, NetworkRecord, NetworkType,
        SigningContext, SigningPayload, VaultType,
    },
    error::{CoreError, CoreResult},
    hardware::{HardwareWallet, HardwareWalletRegistry},
    repository::WalletRepository,
    utils::address::address_from_verifying_point,
};

/// 外部凭据库，只暴露按地址取私钥
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_private_key(&self, vault_id: &str, address_id: &str) -> CoreResult<Zeroizing<[u8; 32]>>;
}

/// 软件签名方
pub struct SoftwareSigner {
    private_key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSigner").finish_non_exhaustive()
    }
}

impl SoftwareSigner {
    pub fn new(private_key: Zeroizing<[u8; 32]>) -> Self {
        Self { private_key }
    }

    /// 0x 十六进制私钥
    pub fn from_hex(private_key: &str) -> CoreResult<Self> {
        let bytes = Zeroizing::new(crate::utils::units::decode_hex(private_key)?);
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Signing("Private key must be 32 bytes".to_string()))?;
        Ok(Self::new(Zeroizing::new(key)))
    }

    pub fn get_private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    fn wallet(&self) -> CoreResult<LocalWallet> {
        LocalWallet::from_bytes(self.private_key.as_slice())
            .map_err(|_| CoreError::Signing("Invalid secp256k1 private key".to_string()))
    }

    /// 小写 0x 地址
    pub fn address(&self) -> CoreResult<String> {
        let key = SigningKey::from_slice(self.private_key.as_slice())
            .map_err(|_| CoreError::Signing("Invalid secp256k1 private key".to_string()))?;
        let public = k256::PublicKey::from(key.verifying_key());
        Ok(address_from_verifying_point(&public))
    }

    /// 签名交易，legacy 交易按交易自身的 chainId 计算 EIP-155 v
    pub fn sign_transaction(&self, tx: &TypedTransaction) -> CoreResult<Signature> {
        let chain_id = tx.chain_id().map(|id| id.as_u64()).unwrap_or(1);
        self.wallet()?
            .with_chain_id(chain_id)
            .sign_transaction_sync(tx)
            .map_err(|e| CoreError::Signing(e.to_string()))
    }

    /// 对 32 字节摘要签名，v 为 27/28
    pub fn sign_digest(&self, digest: [u8; 32]) -> CoreResult<Signature> {
        self.wallet()?
            .sign_hash(H256::from(digest))
            .map_err(|e| CoreError::Signing(e.to_string()))
    }
}

/// 硬件签名方
#[derive(Clone)]
pub struct HardwareSigner {
    adapter: Arc<dyn HardwareWallet>,
    derivation_path: String,
    chain_type: NetworkType,
    cancel: CancellationToken,
}

impl HardwareSigner {
    pub fn new(adapter: Arc<dyn HardwareWallet>, derivation_path: impl Into<String>, chain_type: NetworkType) -> Self {
        Self {
            adapter,
            derivation_path: derivation_path.into(),
            chain_type,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }

    pub fn chain_type(&self) -> NetworkType {
        self.chain_type
    }

    pub fn hardware_type(&self) -> &str {
        self.adapter.hardware_type()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn sign_with_hardware(&self, payload: SigningPayload) -> CoreResult<HardwareSignResult> {
        let context = SigningContext::new(self.derivation_path.clone(), self.chain_type, payload)
            .with_cancel(self.cancel.clone());
        Ok(self.adapter.sign(context).await?)
    }
}

/// 签名方（封闭变体）
pub enum Signer {
    Software(SoftwareSigner),
    Hardware(HardwareSigner),
}

impl Signer {
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }

    pub fn hardware_type(&self) -> Option<&str> {
        match self {
            Self::Hardware(signer) => Some(signer.hardware_type()),
            Self::Software(_) => None,
        }
    }
}

/// 为 (账户, 地址) 解析签名方
#[async_trait]
pub trait SignerResolver: Send + Sync {
    async fn get_signer(&self, account_id: &str, address_id: &str, cancel: CancellationToken) -> CoreResult<Signer>;
}

pub struct SigningService {
    repository: Arc<dyn WalletRepository>,
    key_store: Arc<dyn KeyStore>,
    hardware: Arc<HardwareWalletRegistry>,
}

impl SigningService {
    pub fn new(
        repository: Arc<dyn WalletRepository>,
        key_store: Arc<dyn KeyStore>,
        hardware: Arc<HardwareWalletRegistry>,
    ) -> Self {
        Self {
            repository,
            key_store,
            hardware,
        }
    }

    async fn find_account(&self, account_id: &str) -> CoreResult<AccountRecord> {
        self.repository
            .find_account(account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Account", account_id))
    }

    async fn find_address(&self, address_id: &str) -> CoreResult<AddressRecord> {
        self.repository
            .find_address(address_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Address", address_id))
    }

    async fn find_network(&self, network_id: &str) -> CoreResult<NetworkRecord> {
        self.repository
            .find_network(network_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Network", network_id))
    }
}

#[async_trait]
impl SignerResolver for SigningService {
    async fn get_signer(&self, account_id: &str, address_id: &str, cancel: CancellationToken) -> CoreResult<Signer> {
        let account = self.find_account(account_id).await?;
        let address = self.find_address(address_id).await?;
        if address.account_id != account.id {
            return Err(CoreError::Signing(
                "Address does not belong to the provided account.".to_string(),
            ));
        }

        let vault = self
            .repository
            .find_vault(&account.vault_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Vault", &account.vault_id))?;

        match vault.vault_type {
            VaultType::Bsim => {
                let hardware_type = vault.vault_type.hardware_type().unwrap_or("bsim");
                let adapter = self
                    .hardware
                    .get(hardware_type, vault.hardware_device_id.as_deref())
                    .ok_or_else(|| {
                        CoreError::Signing(format!("Hardware wallet adapter {} is not available.", hardware_type))
                    })?;
                let network = self.find_network(&address.network_id).await?;
                let derivation_path = format!("{}/{}", network.hd_path.trim_end_matches('/'), account.index);

                tracing::debug!(
                    account_id = %account.id,
                    hardware_type = hardware_type,
                    derivation_path = %derivation_path,
                    "Resolved hardware signer"
                );
                Ok(Signer::Hardware(
                    HardwareSigner::new(adapter, derivation_path, network.network_type).with_cancel(cancel),
                ))
            }
            VaultType::HierarchicalDeterministic | VaultType::PrivateKey => {
                let private_key = self.key_store.get_private_key(&vault.id, &address.id).await?;
                Ok(Signer::Software(SoftwareSigner::new(private_key)))
            }
        }
    }
}

/// 内存凭据库，键为地址 id
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, Zeroizing<[u8; 32]>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_hex(&self, address_id: &str, private_key: &str) -> CoreResult<()> {
        let signer = SoftwareSigner::from_hex(private_key)?;
        self.keys
            .write()
            .await
            .insert(address_id.to_string(), signer.private_key);
        Ok(())
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_private_key(&self, _vault_id: &str, address_id: &str) -> CoreResult<Zeroizing<[u8; 32]>> {
        self.keys
            .read()
            .await
            .get(address_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Private key", address_id))
    }
}

/// 校验 0x 65 字节签名格式
pub fn parse_signature(signature: &str) -> CoreResult<Signature> {
    Signature::from_str(signature)
        .map_err(|e| CoreError::InvalidParams(format!("Invalid signature: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{HardwareAccount, VaultRecord},
        hardware::{ConnectOptions, HardwareCapabilities, HardwareResult, TransportKind},
        repository::InMemoryWalletRepository,
    };

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct PathEcho;

    #[async_trait]
    impl HardwareWallet for PathEcho {
        fn hardware_type(&self) -> &str {
            "bsim"
        }
        fn hardware_id(&self) -> Option<&str> {
            None
        }
        fn capabilities(&self) -> HardwareCapabilities {
            HardwareCapabilities {
                hardware_type: "bsim".into(),
                supported_chains: vec![NetworkType::Ethereum],
                transports: vec![TransportKind::Apdu],
                account_limit: 127,
                supports_seed_backup: true,
            }
        }
        async fn connect(&self, _options: ConnectOptions) -> HardwareResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> HardwareResult<()> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn list_accounts(&self, _chain_type: NetworkType) -> HardwareResult<Vec<HardwareAccount>> {
            Ok(Vec::new())
        }
        async fn derive_account(&self, _index: u32, _chain_type: NetworkType) -> HardwareResult<HardwareAccount> {
            unimplemented!()
        }
        async fn derive_address(&self, path: &str, _chain_type: NetworkType) -> HardwareResult<String> {
            Ok(path.to_string())
        }
        async fn sign(&self, context: SigningContext) -> HardwareResult<HardwareSignResult> {
            Ok(HardwareSignResult::TypedSignature {
                signature: context.derivation_path,
            })
        }
    }

    async fn seeded(vault_type: VaultType, slot: u32) -> Arc<InMemoryWalletRepository> {
        let repo = Arc::new(InMemoryWalletRepository::new());
        repo.insert_network(NetworkRecord {
            id: "net".into(),
            name: "Ethereum".into(),
            chain_id: "0x1".into(),
            network_type: NetworkType::Ethereum,
            net_id: 0,
            hd_path: "m/44'/60'/0'/0".into(),
        })
        .await;
        repo.insert_vault(VaultRecord {
            id: "vault".into(),
            vault_type,
            hardware_device_id: None,
            is_backup: false,
        })
        .await;
        repo.insert_account(AccountRecord {
            id: "acct".into(),
            vault_id: "vault".into(),
            index: slot,
        })
        .await;
        repo.insert_address(AddressRecord {
            id: "addr".into(),
            account_id: "acct".into(),
            network_id: "net".into(),
            hex: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
            base32: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
        })
        .await;
        repo
    }

    #[test]
    fn test_software_signer_address() {
        let signer = SoftwareSigner::from_hex(KEY).unwrap();
        assert_eq!(signer.address().unwrap(), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert!(SoftwareSigner::from_hex("0x1234").is_err());
    }

    #[tokio::test]
    async fn test_software_vault_resolves_key() {
        let repo = seeded(VaultType::PrivateKey, 0).await;
        let keys = Arc::new(InMemoryKeyStore::new());
        keys.insert_hex("addr", KEY).await.unwrap();
        let service = SigningService::new(repo, keys, Arc::new(HardwareWalletRegistry::new()));

        let signer = service
            .get_signer("acct", "addr", CancellationToken::new())
            .await
            .unwrap();
        match signer {
            Signer::Software(s) => {
                assert_eq!(s.address().unwrap(), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")
            }
            Signer::Hardware(_) => panic!("expected software signer"),
        }
    }

    #[tokio::test]
    async fn test_bsim_vault_uses_slot_in_path() {
        let repo = seeded(VaultType::Bsim, 3).await;
        let mut registry = HardwareWalletRegistry::new();
        registry.register("bsim", None, Arc::new(PathEcho)).unwrap();
        let service = SigningService::new(repo, Arc::new(InMemoryKeyStore::new()), Arc::new(registry));

        let signer = service
            .get_signer("acct", "addr", CancellationToken::new())
            .await
            .unwrap();
        let Signer::Hardware(hardware) = signer else {
            panic!("expected hardware signer");
        };
        assert_eq!(hardware.derivation_path(), "m/44'/60'/0'/0/3");
        let result = hardware
            .sign_with_hardware(SigningPayload::Raw {
                digest: "0x00".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            result,
            HardwareSignResult::TypedSignature {
                signature: "m/44'/60'/0'/0/3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_bsim_vault_without_adapter_fails() {
        let repo = seeded(VaultType::Bsim, 1).await;
        let service = SigningService::new(
            repo,
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(HardwareWalletRegistry::new()),
        );
        let err = service
            .get_signer("acct", "addr", CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "SIGNING_ERROR");
    }

    #[tokio::test]
    async fn test_address_ownership_checked() {
        let repo = seeded(VaultType::PrivateKey, 0).await;
        repo.insert_account(AccountRecord {
            id: "other".into(),
            vault_id: "vault".into(),
            index: 1,
        })
        .await;
        let service = SigningService::new(
            repo,
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(HardwareWalletRegistry::new()),
        );
        assert!(service
            .get_signer("other", "addr", CancellationToken::new())
            .await
            .is_err());
    }
}
