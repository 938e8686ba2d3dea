//! BSIM 硬件钱包适配器
//!
//! 连接生命周期：Disconnected → Connecting → Ready ⇄ Busy → Disconnected。
//! 卡片 SDK 调用全部经 [`ExclusiveQueue`] 串行化；签名、BPIN 更新、种子备份与恢复
//! 在 [`retry_with_timeout`] 中重试，取消令牌贯穿整个流程。

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::types::U256;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{
    accounts::{parse_derivation_path_index, records_to_accounts, trim_derivation_path},
    card::{
        BsimCard, CardFactory, CardResult, PubkeyRecord, ALGORITHM_ECDSA_SECP256K1, EVM_COIN_TYPE,
    },
    errors::{normalize_card_error, CardStatus, HardwareError, HardwareErrorCode, HardwareResult},
    queue::ExclusiveQueue,
    retry::{retry_with_timeout, RetryOptions},
    signature::{resolve_recovery_param, RecoveredSignature},
    transport::{Platform, TransportKind},
    ConnectOptions, HardwareCapabilities, HardwareWallet,
};
use crate::{
    chains::evm_tx,
    config::HardwareConfig,
    domain::{
        HardwareAccount, HardwareSignResult, MessagePayload, NetworkType, SigningContext,
        SigningPayload, UnsignedTransaction,
    },
};

pub const BSIM_HARDWARE_TYPE: &str = "bsim";
const EVM_CHAIN_ERROR: &str = "BSIM only supports EVM chains.";

/// 适配器参数
#[derive(Debug, Clone)]
pub struct BsimOptions {
    pub platform: Platform,
    pub transport: Option<TransportKind>,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub account_limit: u32,
}

impl BsimOptions {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            transport: None,
            retry_delay: Duration::from_millis(1000),
            timeout: Duration::from_millis(platform.default_timeout_ms()),
            account_limit: 127,
        }
    }

    pub fn default_transport(&self) -> TransportKind {
        self.transport
            .unwrap_or_else(|| self.platform.default_transport())
    }
}

impl From<&HardwareConfig> for BsimOptions {
    fn from(config: &HardwareConfig) -> Self {
        Self {
            platform: config.platform,
            transport: config.transport,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_millis(config.effective_timeout_ms()),
            account_limit: config.account_limit,
        }
    }
}

#[derive(Default)]
struct Session {
    card: Option<Arc<dyn BsimCard>>,
    connected: bool,
    transport: Option<TransportKind>,
    device_identifier: Option<String>,
}

pub struct BsimHardwareWallet {
    hardware_id: Option<String>,
    factory: Arc<dyn CardFactory>,
    options: BsimOptions,
    session: RwLock<Session>,
    queue: ExclusiveQueue,
}

impl BsimHardwareWallet {
    pub fn new(factory: Arc<dyn CardFactory>, options: BsimOptions) -> Self {
        Self {
            hardware_id: None,
            factory,
            options,
            session: RwLock::new(Session::default()),
            queue: ExclusiveQueue::new(),
        }
    }

    /// 绑定到指定设备（对应 vault 的 hardware_device_id）
    pub fn with_hardware_id(mut self, hardware_id: impl Into<String>) -> Self {
        self.hardware_id = Some(hardware_id.into());
        self
    }

    fn retry_options(&self) -> RetryOptions {
        RetryOptions::new(self.options.retry_delay, self.options.timeout)
    }

    fn normalize(&self, error: &super::card::CardError) -> HardwareError {
        normalize_card_error(error, self.options.platform)
    }

    fn guard_chain(chain_type: NetworkType) -> HardwareResult<()> {
        if chain_type.is_evm() {
            return Ok(());
        }
        Err(HardwareError::new(HardwareErrorCode::ChainUnsupported, EVM_CHAIN_ERROR)
            .with_details(json!({ "chainType": chain_type.as_str() })))
    }

    async fn require_card(&self) -> HardwareResult<Arc<dyn BsimCard>> {
        let session = self.session.read().await;
        match (&session.card, session.connected) {
            (Some(card), true) => Ok(card.clone()),
            _ => Err(HardwareError::not_connected()),
        }
    }

    async fn reset_connection(&self) {
        let mut session = self.session.write().await;
        *session = Session::default();
    }

    /// 单次卡片调用：检查连接与取消、排队执行、归一化错误
    async fn run_sdk_call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> HardwareResult<T>
    where
        F: FnOnce(Arc<dyn BsimCard>) -> Fut,
        Fut: Future<Output = CardResult<T>>,
    {
        let card = self.require_card().await?;
        if cancel.is_cancelled() {
            return Err(HardwareError::cancelled());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HardwareError::cancelled()),
            result = self.queue.run(|| operation(card)) => result.map_err(|e| {
                let normalized = self.normalize(&e);
                tracing::debug!(code = %normalized.code, error = %e, "BSIM call failed");
                normalized
            }),
        }
    }

    /// 连接存活探测（读版本号）
    async fn ensure_hardware_ready(&self, cancel: &CancellationToken) -> HardwareResult<()> {
        let card = self.require_card().await?;
        if cancel.is_cancelled() {
            return Err(HardwareError::cancelled());
        }
        self.queue
            .run(|| async move { card.get_version().await })
            .await
            .map(|_| ())
            .map_err(|e| self.normalize(&e))
    }

    /// A000 表示 PIN 已验证，其余错误照常抛出
    async fn verify_bpin_gracefully(&self, cancel: &CancellationToken) -> HardwareResult<()> {
        match self.verify_bpin(cancel).await {
            Err(err) if err.card_status() == Some(CardStatus::Unknown) => {
                tracing::debug!("BPIN already verified");
                Ok(())
            }
            other => other,
        }
    }

    async fn list_accounts_unchecked(&self, cancel: &CancellationToken) -> HardwareResult<Vec<HardwareAccount>> {
        let records = self
            .run_sdk_call(cancel, |card| async move { card.export_pubkeys().await })
            .await?;
        records_to_accounts(&records)
    }

    async fn resolve_account_for_path(
        &self,
        path: &str,
        chain_type: NetworkType,
        cancel: &CancellationToken,
    ) -> HardwareResult<HardwareAccount> {
        Self::guard_chain(chain_type)?;
        let target = trim_derivation_path(path);
        if target.is_empty() {
            return Err(HardwareError::new(
                HardwareErrorCode::MissingPath,
                "Derivation path is required for BSIM signing.",
            ));
        }

        let account = self
            .list_accounts_unchecked(cancel)
            .await?
            .into_iter()
            .find(|account| trim_derivation_path(&account.derivation_path) == target)
            .ok_or_else(|| {
                HardwareError::new(
                    HardwareErrorCode::AccountNotFound,
                    format!("No BSIM account at derivation path {}", path),
                )
            })?;

        if account.public_key.is_none() {
            return Err(HardwareError::new(
                HardwareErrorCode::MissingPubkey,
                "BSIM account is missing public key information.",
            ));
        }
        Ok(account)
    }

    /// 所有签名请求的唯一入口：按真实槽位签名并求解 v
    async fn request_signature(
        &self,
        digest: [u8; 32],
        account: &HardwareAccount,
        cancel: &CancellationToken,
    ) -> HardwareResult<RecoveredSignature> {
        let public_key = account.public_key.as_deref().ok_or_else(|| {
            HardwareError::new(
                HardwareErrorCode::MissingPubkey,
                "BSIM account is missing public key information.",
            )
        })?;
        let slot = parse_derivation_path_index(&account.derivation_path)?;

        tracing::info!(slot = slot, address = %account.address, "Requesting BSIM signature");
        let response = retry_with_timeout(
            || {
                self.run_sdk_call(cancel, move |card| async move {
                    card.sign_message(&digest, EVM_COIN_TYPE, slot).await
                })
            },
            &self.retry_options(),
            cancel,
        )
        .await?;

        resolve_recovery_param(&digest, &response.r, &response.s, public_key, Some(&account.address))
    }

    async fn sign_transaction_payload(
        &self,
        unsigned_tx: &UnsignedTransaction,
        account: &HardwareAccount,
        cancel: &CancellationToken,
    ) -> HardwareResult<HardwareSignResult> {
        let payload = match unsigned_tx {
            UnsignedTransaction::Ethereum(payload) => payload,
            UnsignedTransaction::Conflux(_) => {
                return Err(HardwareError::new(HardwareErrorCode::ChainUnsupported, EVM_CHAIN_ERROR))
            }
        };
        let tx = evm_tx::to_typed_transaction(payload).map_err(payload_error)?;
        let digest = evm_tx::transaction_digest(&tx);
        let signature = self.request_signature(digest, account, cancel).await?;

        let (r, s) = signature_scalars(&signature)?;
        let (raw, hash) =
            evm_tx::encode_signed(&tx, U256::from_big_endian(&r), U256::from_big_endian(&s), signature.v - 27)
                .map_err(payload_error)?;
        Ok(HardwareSignResult::RawTransaction { raw, hash })
    }

    async fn sign_personal_message(
        &self,
        message: &str,
        account: &HardwareAccount,
        cancel: &CancellationToken,
    ) -> HardwareResult<HardwareSignResult> {
        let is_hex_bytes = message.len() % 2 == 0
            && message
                .strip_prefix("0x")
                .map(|body| body.chars().all(|c| c.is_ascii_hexdigit()))
                .unwrap_or(false);
        if !is_hex_bytes {
            return Err(HardwareError::new(
                HardwareErrorCode::InvalidHexFormat,
                "Personal sign message must be a 0x-prefixed hex string.",
            ));
        }

        let bytes = hex::decode(&message[2..]).map_err(|e| {
            HardwareError::new(HardwareErrorCode::InvalidHexFormat, e.to_string())
        })?;
        let digest = evm_tx::personal_message_hash(&bytes);
        let signature = self.request_signature(digest, account, cancel).await?;
        Ok(signature_result(signature, &digest))
    }

    async fn sign_typed_data(
        &self,
        domain: &serde_json::Value,
        types: &serde_json::Value,
        message: &serde_json::Value,
        primary_type: Option<&str>,
        account: &HardwareAccount,
        cancel: &CancellationToken,
    ) -> HardwareResult<HardwareSignResult> {
        let digest =
            evm_tx::typed_data_hash(domain, types, message, primary_type).map_err(payload_error)?;
        let signature = self.request_signature(digest, account, cancel).await?;
        let (r, s) = signature_scalars(&signature)?;
        Ok(HardwareSignResult::TypedSignature {
            signature: evm_tx::join_signature(&r, &s, signature.v),
        })
    }

    async fn sign_raw_digest(
        &self,
        digest: &str,
        account: &HardwareAccount,
        cancel: &CancellationToken,
    ) -> HardwareResult<HardwareSignResult> {
        let normalized = if digest.starts_with("0x") {
            digest.to_string()
        } else {
            format!("0x{}", digest)
        };
        let bytes = hex::decode(&normalized[2..]).map_err(|_| {
            HardwareError::new(HardwareErrorCode::InvalidHexFormat, "Raw digest must be hex.")
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            HardwareError::new(HardwareErrorCode::InvalidHexFormat, "Raw digest must be 32 bytes.")
        })?;
        let signature = self.request_signature(digest, account, cancel).await?;
        Ok(signature_result(signature, &digest))
    }

    // ━━━━━━━━━━ 卡片管理操作 ━━━━━━━━━━

    pub async fn verify_bpin(&self, cancel: &CancellationToken) -> HardwareResult<()> {
        self.ensure_hardware_ready(cancel).await?;
        self.run_sdk_call(cancel, |card| async move { card.verify_bpin().await })
            .await
    }

    pub async fn update_bpin(&self, cancel: &CancellationToken) -> HardwareResult<()> {
        self.ensure_hardware_ready(cancel).await?;
        retry_with_timeout(
            || self.run_sdk_call(cancel, |card| async move { card.update_bpin().await }),
            &self.retry_options(),
            cancel,
        )
        .await
    }

    pub async fn get_iccid(&self, cancel: &CancellationToken) -> HardwareResult<String> {
        self.ensure_hardware_ready(cancel).await?;
        self.run_sdk_call(cancel, |card| async move { card.get_iccid().await })
            .await
    }

    pub async fn get_version(&self, cancel: &CancellationToken) -> HardwareResult<String> {
        self.ensure_hardware_ready(cancel).await?;
        self.run_sdk_call(cancel, |card| async move { card.get_version().await })
            .await
    }

    /// 导出加密种子，返回卡片给出的密文
    pub async fn backup_seed(&self, key2: &str, cancel: &CancellationToken) -> HardwareResult<String> {
        self.verify_bpin_gracefully(cancel).await?;
        retry_with_timeout(
            || {
                let key2 = key2.to_string();
                self.run_sdk_call(cancel, move |card| async move { card.export_seed(&key2).await })
            },
            &self.retry_options(),
            cancel,
        )
        .await
    }

    pub async fn restore_seed(
        &self,
        key2: &str,
        cipher_hex: &str,
        cancel: &CancellationToken,
    ) -> HardwareResult<()> {
        self.verify_bpin_gracefully(cancel).await?;
        retry_with_timeout(
            || {
                let key2 = key2.to_string();
                let cipher = cipher_hex.to_string();
                self.run_sdk_call(cancel, move |card| async move {
                    card.restore_seed(&key2, &cipher).await
                })
            },
            &self.retry_options(),
            cancel,
        )
        .await
    }

    pub async fn export_pubkeys(&self, cancel: &CancellationToken) -> HardwareResult<Vec<PubkeyRecord>> {
        self.ensure_hardware_ready(cancel).await?;
        self.run_sdk_call(cancel, |card| async move { card.export_pubkeys().await })
            .await
    }

    pub async fn derive_key(&self, cancel: &CancellationToken) -> HardwareResult<()> {
        self.ensure_hardware_ready(cancel).await?;
        self.run_sdk_call(cancel, |card| async move {
            card.derive_key(EVM_COIN_TYPE, ALGORITHM_ECDSA_SECP256K1).await
        })
        .await
    }
}

fn payload_error(error: crate::error::CoreError) -> HardwareError {
    HardwareError::new(HardwareErrorCode::UnsupportedPayload, error.to_string())
}

fn signature_scalars(signature: &RecoveredSignature) -> HardwareResult<([u8; 32], [u8; 32])> {
    let decode = |value: &str| -> HardwareResult<[u8; 32]> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(value, &mut out).map_err(|_| {
            HardwareError::new(
                HardwareErrorCode::RecoveryFailed,
                "Malformed signature component from BSIM.",
            )
        })?;
        Ok(out)
    };
    Ok((decode(&signature.r)?, decode(&signature.s)?))
}

fn signature_result(signature: RecoveredSignature, digest: &[u8; 32]) -> HardwareSignResult {
    HardwareSignResult::Signature {
        r: format!("0x{}", signature.r.to_lowercase()),
        s: format!("0x{}", signature.s.to_lowercase()),
        v: signature.v,
        digest: format!("0x{}", hex::encode(digest)),
    }
}

#[async_trait]
impl HardwareWallet for BsimHardwareWallet {
    fn hardware_type(&self) -> &str {
        BSIM_HARDWARE_TYPE
    }

    fn hardware_id(&self) -> Option<&str> {
        self.hardware_id.as_deref()
    }

    fn capabilities(&self) -> HardwareCapabilities {
        HardwareCapabilities {
            hardware_type: BSIM_HARDWARE_TYPE.to_string(),
            supported_chains: vec![NetworkType::Ethereum],
            transports: vec![TransportKind::Apdu, TransportKind::Ble],
            account_limit: self.options.account_limit,
            supports_seed_backup: true,
        }
    }

    async fn connect(&self, options: ConnectOptions) -> HardwareResult<()> {
        let transport = options
            .transport
            .unwrap_or_else(|| self.options.default_transport());
        let device_identifier = options
            .device_identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let cancel = &options.cancel;

        let (can_reuse, has_session) = {
            let session = self.session.read().await;
            (
                session.connected
                    && session.card.is_some()
                    && session.transport == Some(transport)
                    && session.device_identifier == device_identifier,
                session.connected || session.card.is_some(),
            )
        };

        if can_reuse {
            match self.ensure_hardware_ready(cancel).await {
                Ok(()) => {
                    tracing::debug!(transport = %transport, "Reusing BSIM session");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(code = %e.code, error = %e, "BSIM liveness probe failed, reconnecting");
                    self.reset_connection().await;
                }
            }
        } else if has_session {
            self.reset_connection().await;
        }

        let card = self.factory.create(transport, device_identifier.as_deref());
        {
            let mut session = self.session.write().await;
            *session = Session {
                card: Some(card.clone()),
                connected: false,
                transport: Some(transport),
                device_identifier: device_identifier.clone(),
            };
        }

        if cancel.is_cancelled() {
            return Err(HardwareError::cancelled());
        }
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HardwareError::cancelled()),
            result = self.queue.run(|| async move { card.get_version().await }) => {
                result.map_err(|e| self.normalize(&e))
            }
        };

        match probe {
            Ok(version) => {
                self.session.write().await.connected = true;
                tracing::info!(
                    transport = %transport,
                    device = ?device_identifier,
                    version = %version,
                    "BSIM connected"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(transport = %transport, code = %e.code, error = %e, "BSIM connect failed");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> HardwareResult<()> {
        self.reset_connection().await;
        tracing::info!("BSIM disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.read().await.connected
    }

    async fn list_accounts(&self, chain_type: NetworkType) -> HardwareResult<Vec<HardwareAccount>> {
        Self::guard_chain(chain_type)?;
        let cancel = CancellationToken::new();
        self.ensure_hardware_ready(&cancel).await?;
        self.list_accounts_unchecked(&cancel).await
    }

    async fn derive_account(&self, index: u32, chain_type: NetworkType) -> HardwareResult<HardwareAccount> {
        Self::guard_chain(chain_type)?;
        let limit = self.options.account_limit;
        if index >= limit {
            return Err(HardwareError::new(
                HardwareErrorCode::AccountLimit,
                format!("BSIM only supports {} accounts.", limit),
            ));
        }

        let cancel = CancellationToken::new();
        self.ensure_hardware_ready(&cancel).await?;
        let accounts = self.list_accounts_unchecked(&cancel).await?;
        if let Some(existing) = accounts.iter().find(|a| a.index == index) {
            return Ok(existing.clone());
        }

        let mut current_max = accounts.iter().map(|a| a.index as i64).max().unwrap_or(-1);
        while current_max < index as i64 {
            self.run_sdk_call(&cancel, |card| async move {
                card.derive_key(EVM_COIN_TYPE, ALGORITHM_ECDSA_SECP256K1).await
            })
            .await?;
            current_max += 1;
            tracing::debug!(index = current_max, "Derived BSIM key");
        }

        self.list_accounts_unchecked(&cancel)
            .await?
            .into_iter()
            .find(|a| a.index == index)
            .ok_or_else(|| {
                HardwareError::new(
                    HardwareErrorCode::AccountNotFound,
                    format!("Unable to locate BSIM account at index {}.", index),
                )
            })
    }

    async fn derive_address(&self, path: &str, chain_type: NetworkType) -> HardwareResult<String> {
        let cancel = CancellationToken::new();
        let account = self.resolve_account_for_path(path, chain_type, &cancel).await?;
        Ok(account.address)
    }

    async fn sign(&self, context: SigningContext) -> HardwareResult<HardwareSignResult> {
        Self::guard_chain(context.chain_type)?;
        let cancel = &context.cancel;
        self.ensure_hardware_ready(cancel).await?;
        self.verify_bpin_gracefully(cancel).await?;
        let account = self
            .resolve_account_for_path(&context.derivation_path, context.chain_type, cancel)
            .await?;

        match &context.payload {
            SigningPayload::Transaction { unsigned_tx } => {
                self.sign_transaction_payload(unsigned_tx, &account, cancel).await
            }
            SigningPayload::Message(MessagePayload::Personal { message }) => {
                self.sign_personal_message(message, &account, cancel).await
            }
            SigningPayload::Message(MessagePayload::TypedData {
                domain,
                types,
                message,
                primary_type,
            }) => {
                self.sign_typed_data(domain, types, message, primary_type.as_deref(), &account, cancel)
                    .await
            }
            SigningPayload::Raw { digest } => self.sign_raw_digest(digest, &account, cancel).await,
        }
    }
}
