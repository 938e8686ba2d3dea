//! 交易发送流水线与交易查询
//!
//! 发送：地址 → 网络 → 链提供方 → 构建 → 估算 → 解析签名方 → 签名 → 签名审计记录 → 广播 → 持久化。
//! 每次发送尝试只写一条 Tx+TxPayload+TxExtra 批次：广播成功为 PENDING，
//! 广播失败为 SEND_FAILED（保留已签名的 raw 以便排查），随后把原始错误返回给调用方。
//!
//! dApp 发起的交易额外校验链族与 from 地址，估算结果用于补齐调用方省略的 gas 字段，
//! 各阶段的失败包装为对应的阶段错误码。

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    dapp_params::EvmRpcTransactionRequest,
    signature_record::{NewSignatureRecord, SignatureRecordService},
    signing::{Signer, SignerResolver},
};
use crate::{
    chains::{ChainProvider, ChainRegistry},
    domain::{
        ActivityStatus, AddressRecord, AssetType, EvmTxPayload, FeeEstimate, FeePricing, NetworkRecord,
        NetworkType, NewTxBatch, SignType, SignedTransaction, TransactionParams, TxExtraRecord,
        TxPayloadRecord, TxRecord, TxSource, TxStatus, TxStatusBucket, UnsignedTransaction,
    },
    error::{CoreError, CoreResult, PipelineStage},
    infrastructure::event_bus::{EventBus, HardwareSignEvent},
    repository::{TxDetails, WalletRepository},
    utils::units::format_u64,
};

/// 最近联系人默认条数
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// 自有发送的输入
#[derive(Debug, Clone)]
pub struct SendTransactionInput {
    pub address_id: String,
    pub to: String,
    /// 十进制金额
    pub amount: String,
    pub asset_type: AssetType,
    pub asset_decimals: u32,
    pub contract_address: Option<String>,
    pub nft_token_id: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub storage_limit: Option<String>,
    pub nonce: Option<u64>,
    pub cancel: CancellationToken,
}

impl SendTransactionInput {
    pub fn native(address_id: impl Into<String>, to: impl Into<String>, amount: impl Into<String>, decimals: u32) -> Self {
        Self {
            address_id: address_id.into(),
            to: to.into(),
            amount: amount.into(),
            asset_type: AssetType::Native,
            asset_decimals: decimals,
            contract_address: None,
            nft_token_id: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            storage_limit: None,
            nonce: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn erc20(
        address_id: impl Into<String>,
        contract_address: impl Into<String>,
        to: impl Into<String>,
        amount: impl Into<String>,
        decimals: u32,
    ) -> Self {
        Self {
            asset_type: AssetType::Erc20,
            contract_address: Some(contract_address.into()),
            ..Self::native(address_id, to, amount, decimals)
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// dApp 发起的发送
#[derive(Debug, Clone)]
pub struct DappTransactionInput {
    pub address_id: String,
    pub request: EvmRpcTransactionRequest,
    pub cancel: CancellationToken,
}

impl DappTransactionInput {
    pub fn new(address_id: impl Into<String>, request: EvmRpcTransactionRequest) -> Self {
        Self {
            address_id: address_id.into(),
            request,
            cancel: CancellationToken::new(),
        }
    }
}

/// dApp 交易预估：补齐后的载荷与手续费
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DappTransactionEstimate {
    pub payload: EvmTxPayload,
    pub fee: FeeEstimate,
}

/// 面向调用方的交易视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub status: ActivityStatus,
    /// 记录创建时间（毫秒）
    pub timestamp: i64,
    pub network_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentlyAddress {
    pub address_value: String,
    pub direction: Direction,
    /// 对方也是本地地址
    pub is_local_account: bool,
    pub last_used_at: DateTime<Utc>,
}

struct SendContext {
    address: AddressRecord,
    network: NetworkRecord,
    provider: Arc<dyn ChainProvider>,
}

/// 单次发送的固定参数
struct SendPlan {
    source: TxSource,
    asset_type: Option<AssetType>,
    /// dApp 路径按阶段包装错误
    wrap_stages: bool,
    cancel: CancellationToken,
}

impl SendPlan {
    fn stage(&self, err: CoreError, stage: PipelineStage) -> CoreError {
        if self.wrap_stages {
            err.into_stage(stage)
        } else {
            err
        }
    }
}

struct SaveAttempt<'a> {
    status: TxStatus,
    hash: String,
    raw: &'a str,
    err: Option<String>,
    send_at: DateTime<Utc>,
}

pub struct TransactionService {
    repository: Arc<dyn WalletRepository>,
    registry: Arc<ChainRegistry>,
    signers: Arc<dyn SignerResolver>,
    signature_records: Arc<SignatureRecordService>,
    event_bus: Arc<dyn EventBus>,
}

impl TransactionService {
    pub fn new(
        repository: Arc<dyn WalletRepository>,
        registry: Arc<ChainRegistry>,
        signers: Arc<dyn SignerResolver>,
        signature_records: Arc<SignatureRecordService>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            repository,
            registry,
            signers,
            signature_records,
            event_bus,
        }
    }

    // ━━━━━━━━━━ 发送 ━━━━━━━━━━

    /// 按 `input.asset_type` 构建并发送转账
    pub async fn send_native(&self, input: SendTransactionInput) -> CoreResult<TransactionView> {
        let (address, network) = self.resolve_records(&input.address_id).await?;
        let provider = self.resolve_provider(&network)?;
        let ctx = SendContext {
            address,
            network,
            provider,
        };

        let params = TransactionParams {
            from: ctx.address.value(&ctx.network).to_string(),
            to: input.to.clone(),
            chain_id: ctx.network.chain_id.clone(),
            amount: input.amount.clone(),
            asset_type: input.asset_type,
            asset_decimals: input.asset_decimals,
            contract_address: input.contract_address.clone(),
            nft_token_id: input.nft_token_id.clone(),
            data: None,
            gas_limit: input.gas_limit.clone(),
            gas_price: input.gas_price.clone(),
            max_fee_per_gas: input.max_fee_per_gas.clone(),
            max_priority_fee_per_gas: input.max_priority_fee_per_gas.clone(),
            storage_limit: input.storage_limit.clone(),
            nonce: input.nonce,
            epoch_height: None,
        };

        tracing::info!(
            address_id = %ctx.address.id,
            network_type = %ctx.network.network_type,
            chain_id = %ctx.network.chain_id,
            asset_type = ?input.asset_type,
            "Sending transaction"
        );

        let unsigned = ctx.provider.build_transaction(&params).await?;
        // 自有发送的估算只用于日志
        let fee = ctx.provider.estimate_fee(&unsigned).await?;
        tracing::debug!(
            address_id = %ctx.address.id,
            gas_limit = %fee.gas_limit,
            estimated_total = %fee.estimated_total,
            "Fee estimated"
        );

        let plan = SendPlan {
            source: TxSource::SelfSend,
            asset_type: Some(input.asset_type),
            wrap_stages: false,
            cancel: input.cancel,
        };
        self.execute(&ctx, unsigned, &plan).await
    }

    pub async fn send_erc20(&self, input: SendTransactionInput) -> CoreResult<TransactionView> {
        self.send_native(SendTransactionInput {
            asset_type: AssetType::Erc20,
            ..input
        })
        .await
    }

    pub async fn send_dapp_transaction(&self, input: DappTransactionInput) -> CoreResult<TransactionView> {
        let (ctx, payload, _) = self.prepare_dapp(&input).await?;

        tracing::info!(
            address_id = %ctx.address.id,
            chain_id = %ctx.network.chain_id,
            tx_type = ?payload.tx_type,
            "Sending dApp transaction"
        );

        let plan = SendPlan {
            source: TxSource::Dapp,
            asset_type: None,
            wrap_stages: true,
            cancel: input.cancel,
        };
        self.execute(&ctx, UnsignedTransaction::Ethereum(payload), &plan)
            .await
    }

    /// 只估算，不签名不广播
    pub async fn estimate_dapp_transaction(&self, input: DappTransactionInput) -> CoreResult<DappTransactionEstimate> {
        let (_, payload, fee) = self.prepare_dapp(&input).await?;
        Ok(DappTransactionEstimate { payload, fee })
    }

    async fn prepare_dapp(&self, input: &DappTransactionInput) -> CoreResult<(SendContext, EvmTxPayload, FeeEstimate)> {
        let request = &input.request;
        let (address, network) = self.resolve_records(&input.address_id).await?;

        if network.network_type != NetworkType::Ethereum {
            return Err(CoreError::UnsupportedNetwork(format!(
                "dApp transactions are only supported on EVM networks, got {}",
                network.network_type
            )));
        }
        if !request.from.eq_ignore_ascii_case(&address.hex) {
            return Err(CoreError::AddressMismatch {
                expected: address.hex.clone(),
                actual: request.from.clone(),
            });
        }
        let tx_type = match request.tx_type {
            None => None,
            Some(t @ (0 | 2)) => Some(t as u8),
            Some(other) => {
                return Err(CoreError::InvalidParams(format!(
                    "Unsupported transaction type: {}",
                    other
                )))
            }
        };

        let provider = self.resolve_provider(&network)?;

        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => provider
                .get_nonce(&address.hex)
                .await
                .map_err(|e| e.into_stage(PipelineStage::Build))?,
        };

        let mut payload = EvmTxPayload {
            from: address.hex.clone(),
            to: request.to.clone(),
            value: request.value.clone().unwrap_or_else(|| "0x0".to_string()),
            data: request.data.clone().unwrap_or_else(|| "0x".to_string()),
            chain_id: network.chain_id.clone(),
            gas_limit: request.gas.clone(),
            gas_price: request.gas_price.clone(),
            max_fee_per_gas: request.max_fee_per_gas.clone(),
            max_priority_fee_per_gas: request.max_priority_fee_per_gas.clone(),
            nonce,
            tx_type,
        };

        let fee = provider
            .estimate_fee(&UnsignedTransaction::Ethereum(payload.clone()))
            .await
            .map_err(|e| e.into_stage(PipelineStage::Estimate))?;
        apply_fee_estimate(&mut payload, &fee);

        let ctx = SendContext {
            address,
            network,
            provider,
        };
        Ok((ctx, payload, fee))
    }

    async fn execute(
        &self,
        ctx: &SendContext,
        unsigned: UnsignedTransaction,
        plan: &SendPlan,
    ) -> CoreResult<TransactionView> {
        let signer = self
            .signers
            .get_signer(&ctx.address.account_id, &ctx.address.id, plan.cancel.clone())
            .await
            .map_err(|e| plan.stage(e, PipelineStage::Sign))?;

        let signed = self
            .sign_with_events(ctx, &unsigned, &signer)
            .await
            .map_err(|e| plan.stage(e, PipelineStage::Sign))?;

        let signature_id = self.record_signature(&ctx.address.id).await;
        let send_at = Utc::now();

        match ctx.provider.broadcast_transaction(&signed).await {
            Ok(hash) => {
                let attempt = SaveAttempt {
                    status: TxStatus::Pending,
                    hash,
                    raw: &signed.raw_transaction,
                    err: None,
                    send_at,
                };
                let details = self
                    .save_tx(ctx, &unsigned, plan, attempt)
                    .await
                    .map_err(|e| e.into_stage(PipelineStage::Save))?;
                self.link_signature(signature_id.as_deref(), &details.tx.id).await;

                tracing::info!(
                    tx_id = %details.tx.id,
                    tx_hash = %details.tx.hash,
                    address_id = %ctx.address.id,
                    "Transaction sent"
                );
                Ok(to_view(&details, &ctx.network.id))
            }
            Err(err) => {
                tracing::error!(
                    address_id = %ctx.address.id,
                    chain_id = %ctx.network.chain_id,
                    error = %err,
                    "Broadcast failed"
                );
                let attempt = SaveAttempt {
                    status: TxStatus::SendFailed,
                    hash: String::new(),
                    raw: &signed.raw_transaction,
                    err: Some(err.to_string()),
                    send_at,
                };
                match self.save_tx(ctx, &unsigned, plan, attempt).await {
                    Ok(details) => self.link_signature(signature_id.as_deref(), &details.tx.id).await,
                    Err(save_err) => tracing::warn!(
                        address_id = %ctx.address.id,
                        error = %save_err,
                        "Failed to persist SEND_FAILED transaction"
                    ),
                }
                Err(plan.stage(err, PipelineStage::Broadcast))
            }
        }
    }

    /// 硬件签名前后发布生命周期事件，取消与失败分开
    async fn sign_with_events(
        &self,
        ctx: &SendContext,
        unsigned: &UnsignedTransaction,
        signer: &Signer,
    ) -> CoreResult<SignedTransaction> {
        let Signer::Hardware(hardware) = signer else {
            return ctx.provider.sign_transaction(unsigned, signer).await;
        };

        let request_id = Uuid::new_v4();
        let address_id = ctx.address.id.clone();
        let tx_context = json!({
            "accountId": ctx.address.account_id,
            "networkId": ctx.network.id,
            "chainId": ctx.network.chain_id,
            "to": unsigned.to(),
            "value": unsigned.value(),
            "derivationPath": hardware.derivation_path(),
        });

        self.publish(HardwareSignEvent::Started {
            request_id,
            address_id: address_id.clone(),
            hardware_type: hardware.hardware_type().to_string(),
            tx_context: tx_context.to_string(),
        })
        .await;

        match ctx.provider.sign_transaction(unsigned, signer).await {
            Ok(signed) => {
                self.publish(HardwareSignEvent::Succeeded {
                    request_id,
                    address_id,
                    tx_hash: signed.hash.clone(),
                })
                .await;
                Ok(signed)
            }
            Err(err) if err.is_cancelled() => {
                tracing::info!(request_id = %request_id, "Hardware signing cancelled by user");
                self.publish(HardwareSignEvent::Aborted {
                    request_id,
                    address_id,
                })
                .await;
                Err(err)
            }
            Err(err) => {
                let root = err.root();
                self.publish(HardwareSignEvent::Failed {
                    request_id,
                    address_id,
                    code: root.code().to_string(),
                    message: root.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn publish(&self, event: HardwareSignEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            tracing::warn!(error = %e, "Failed to publish hardware sign event");
        }
    }

    async fn record_signature(&self, address_id: &str) -> Option<String> {
        let input = NewSignatureRecord {
            address_id: address_id.to_string(),
            sign_type: SignType::Transaction,
            message: None,
        };
        match self.signature_records.create_record(input).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(address_id = %address_id, error = %e, "Failed to create signature record");
                None
            }
        }
    }

    async fn link_signature(&self, signature_id: Option<&str>, tx_id: &str) {
        if let Some(signature_id) = signature_id {
            self.signature_records.link_tx(signature_id, tx_id).await;
        }
    }

    async fn save_tx(
        &self,
        ctx: &SendContext,
        unsigned: &UnsignedTransaction,
        plan: &SendPlan,
        attempt: SaveAttempt<'_>,
    ) -> CoreResult<TxDetails> {
        let payload = payload_record(unsigned);
        let extra = extra_record(unsigned, plan.asset_type);
        let tx = TxRecord {
            id: Uuid::new_v4().to_string(),
            address_id: ctx.address.id.clone(),
            payload_id: payload.id.clone(),
            extra_id: extra.id.clone(),
            hash: attempt.hash,
            status: attempt.status,
            raw: Some(attempt.raw.to_string()),
            err: attempt.err,
            source: plan.source,
            method: extra.method.clone().unwrap_or_default(),
            asset_type: plan.asset_type,
            is_temp_replaced: false,
            send_at: attempt.send_at,
            created_at: Utc::now(),
        };

        let batch = NewTxBatch {
            tx,
            payload: payload.clone(),
            extra: extra.clone(),
        };
        let tx = self.repository.create_tx_batch(batch).await?;
        tracing::debug!(tx_id = %tx.id, status = %tx.status, "Transaction persisted");
        Ok(TxDetails { tx, payload, extra })
    }

    // ━━━━━━━━━━ 查询 ━━━━━━━━━━

    /// 按状态分组列出交易，隐藏被临时替换的交易
    pub async fn list_transactions(
        &self,
        address_id: &str,
        bucket: TxStatusBucket,
        limit: Option<usize>,
    ) -> CoreResult<Vec<TransactionView>> {
        let address = self.find_address(address_id).await?;
        let mut txs: Vec<TxDetails> = self
            .repository
            .list_txs_by_address(address_id)
            .await?
            .into_iter()
            .filter(|d| !d.tx.is_temp_replaced && bucket.matches(d.tx.status))
            .collect();

        txs.sort_by(|a, b| {
            b.tx.send_at
                .cmp(&a.tx.send_at)
                .then_with(|| b.tx.created_at.cmp(&a.tx.created_at))
        });

        Ok(txs
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|d| to_view(d, &address.network_id))
            .collect())
    }

    pub async fn get_transaction_by_id(&self, tx_id: &str) -> CoreResult<Option<TransactionView>> {
        let Some(details) = self.repository.find_tx(tx_id).await? else {
            return Ok(None);
        };
        let network_id = self
            .repository
            .find_address(&details.tx.address_id)
            .await?
            .map(|a| a.network_id)
            .unwrap_or_default();
        Ok(Some(to_view(&details, &network_id)))
    }

    /// 最近交互过的对方地址，按最近使用时间倒序去重
    pub async fn get_recently_addresses(&self, address_id: &str, limit: usize) -> CoreResult<Vec<RecentlyAddress>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (address, network) = self.resolve_records(address_id).await?;
        let owner: HashSet<String> = [address.value(&network), &address.hex, &address.base32]
            .iter()
            .map(|v| v.to_lowercase())
            .collect();

        let local: HashSet<String> = self
            .repository
            .list_all_addresses()
            .await?
            .iter()
            .flat_map(|a| [a.hex.to_lowercase(), a.base32.to_lowercase()])
            .collect();

        let mut peers: HashMap<String, RecentlyAddress> = HashMap::new();
        let txs = self
            .repository
            .list_txs_by_address(address_id)
            .await?
            .into_iter()
            .filter(|d| !d.tx.is_temp_replaced && TxStatusBucket::All.matches(d.tx.status));
        for details in txs {
            let from = details.payload.from.as_deref().unwrap_or_default();
            let to = details.payload.to.as_deref().unwrap_or_default();

            let (peer, direction) = if owner.contains(&from.to_lowercase()) {
                (to, Direction::Outbound)
            } else if owner.contains(&to.to_lowercase()) {
                (from, Direction::Inbound)
            } else {
                continue;
            };
            if peer.is_empty() {
                continue;
            }

            let key = peer.to_lowercase();
            let last_used_at = details.tx.send_at;
            let candidate = RecentlyAddress {
                address_value: peer.to_string(),
                direction,
                is_local_account: local.contains(&key),
                last_used_at,
            };
            match peers.get(&key) {
                Some(existing) if existing.last_used_at >= last_used_at => {}
                _ => {
                    peers.insert(key, candidate);
                }
            }
        }

        let mut result: Vec<RecentlyAddress> = peers.into_values().collect();
        result.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        result.truncate(limit);
        Ok(result)
    }

    // ━━━━━━━━━━ 解析 ━━━━━━━━━━

    async fn find_address(&self, address_id: &str) -> CoreResult<AddressRecord> {
        self.repository
            .find_address(address_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Address", address_id))
    }

    async fn resolve_records(&self, address_id: &str) -> CoreResult<(AddressRecord, NetworkRecord)> {
        let address = self.find_address(address_id).await?;
        let network = self
            .repository
            .find_network(&address.network_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Network", &address.network_id))?;
        Ok((address, network))
    }

    fn resolve_provider(&self, network: &NetworkRecord) -> CoreResult<Arc<dyn ChainProvider>> {
        self.registry
            .require(&network.chain_id, Some(network.network_type))
    }
}

/// 用估算结果补齐调用方省略的字段，并推断交易类型
fn apply_fee_estimate(payload: &mut EvmTxPayload, fee: &FeeEstimate) {
    if payload.gas_limit.is_none() {
        payload.gas_limit = Some(fee.gas_limit.clone());
    }

    let tx_type = payload.tx_type.unwrap_or_else(|| {
        if payload.max_fee_per_gas.is_some() || payload.max_priority_fee_per_gas.is_some() {
            2
        } else if payload.gas_price.is_some() {
            0
        } else if matches!(fee.pricing, FeePricing::Eip1559 { .. }) {
            2
        } else {
            0
        }
    });
    payload.tx_type = Some(tx_type);

    if tx_type == 2 {
        if payload.max_fee_per_gas.is_none() {
            payload.max_fee_per_gas = fee.max_fee_per_gas().or(fee.gas_price()).map(str::to_string);
        }
        if payload.max_priority_fee_per_gas.is_none() {
            payload.max_priority_fee_per_gas = fee
                .max_priority_fee_per_gas()
                .or(fee.gas_price())
                .map(str::to_string);
        }
    } else if payload.gas_price.is_none() {
        payload.gas_price = fee.gas_price().or(fee.max_fee_per_gas()).map(str::to_string);
    }
}

fn has_call_data(data: &str) -> bool {
    !data.is_empty() && data != "0x"
}

fn payload_record(unsigned: &UnsignedTransaction) -> TxPayloadRecord {
    let id = Uuid::new_v4().to_string();
    match unsigned {
        UnsignedTransaction::Ethereum(p) => TxPayloadRecord {
            id,
            tx_type: p.tx_type.map(|t| t.to_string()),
            from: Some(p.from.clone()),
            to: p.to.clone(),
            value: Some(p.value.clone()),
            data: Some(p.data.clone()),
            nonce: Some(p.nonce),
            chain_id: Some(p.chain_id.clone()),
            gas_limit: p.gas_limit.clone(),
            gas_price: p.gas_price.clone(),
            max_fee_per_gas: p.max_fee_per_gas.clone(),
            max_priority_fee_per_gas: p.max_priority_fee_per_gas.clone(),
            storage_limit: None,
            epoch_height: None,
        },
        UnsignedTransaction::Conflux(p) => TxPayloadRecord {
            id,
            tx_type: None,
            from: Some(p.from.clone()),
            to: p.to.clone(),
            value: Some(p.value.clone()),
            data: Some(p.data.clone()),
            nonce: Some(p.nonce),
            chain_id: Some(p.chain_id.clone()),
            gas_limit: p.gas_limit.clone(),
            gas_price: p.gas_price.clone(),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            storage_limit: p.storage_limit.clone(),
            epoch_height: Some(format_u64(p.epoch_height)),
        },
    }
}

fn extra_record(unsigned: &UnsignedTransaction, asset_type: Option<AssetType>) -> TxExtraRecord {
    let has_data = has_call_data(unsigned.data());
    let (simple, contract_interaction) = match asset_type {
        Some(asset) => (asset == AssetType::Native, asset != AssetType::Native),
        None => (!has_data, has_data && unsigned.to().is_some()),
    };

    TxExtraRecord {
        id: Uuid::new_v4().to_string(),
        ok: true,
        simple,
        contract_interaction,
        token20: asset_type == Some(AssetType::Erc20),
        token_nft: matches!(asset_type, Some(AssetType::Erc721 | AssetType::Erc1155)),
        contract_creation: unsigned.to().is_none() && has_data,
        address: unsigned.to().map(str::to_string),
        method: (asset_type == Some(AssetType::Erc20)).then(|| "transfer".to_string()),
    }
}

fn to_view(details: &TxDetails, network_id: &str) -> TransactionView {
    TransactionView {
        id: details.tx.id.clone(),
        hash: details.tx.hash.clone(),
        from: details.payload.from.clone().unwrap_or_default(),
        to: details.payload.to.clone().unwrap_or_default(),
        value: details.payload.value.clone().unwrap_or_default(),
        status: details.tx.status.activity_status(),
        timestamp: details.tx.created_at.timestamp_millis(),
        network_id: network_id.to_string(),
    }
}
