//! Ethereum 链提供方
//!
//! 地址使用 EIP-55 校验和；nonce 取含 pending 的交易数；
//! 手续费在显式给出 1559 字段或网络支持 1559 时走 EIP-1559，否则走 legacy。

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Signature, U256};
use serde_json::{json, Value};

use super::{
    evm_tx,
    payload::{build_transaction_payload, TransactionBuildInput},
    provider::ChainProvider,
};
use crate::{
    domain::{
        ChainTxStatus, EvmTxPayload, FeeEstimate, FeePricing, HardwareSignResult, MessagePayload,
        NetworkType, SignedTransaction, SigningPayload, TransactionParams, UnsignedTransaction,
    },
    error::{CoreError, CoreResult},
    infrastructure::{
        rpc::JsonRpcClient,
        rpc_validator::{to_u256, to_u64, validate_tx_hash},
    },
    service::signing::{parse_signature, Signer},
    utils::{
        address::{address_from_public_key_hex, is_valid_address, same_address, to_checksum_address},
        units::{format_quantity, parse_optional_quantity, parse_quantity},
    },
};

/// eth_maxPriorityFeePerGas 不可用时的默认小费（1 gwei）
const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_000_000_000;

/// 链上手续费参数
#[derive(Debug, Clone, Default)]
struct FeeData {
    gas_price: U256,
    max_fee_per_gas: Option<U256>,
    max_priority_fee_per_gas: Option<U256>,
}

pub struct EthereumChainProvider {
    chain_id: String,
    numeric_chain_id: u64,
    rpc: Arc<dyn JsonRpcClient>,
}

impl EthereumChainProvider {
    pub fn new(chain_id: impl Into<String>, rpc: Arc<dyn JsonRpcClient>) -> CoreResult<Self> {
        let chain_id = chain_id.into();
        let numeric_chain_id = evm_tx::parse_chain_id(&chain_id)?;
        if numeric_chain_id == 0 {
            return Err(CoreError::InvalidParams(format!(
                "Invalid chainId: {}. Must be a positive number or hex string",
                chain_id
            )));
        }
        Ok(Self {
            chain_id,
            numeric_chain_id,
            rpc,
        })
    }

    pub fn numeric_chain_id(&self) -> u64 {
        self.numeric_chain_id
    }

    fn evm_payload<'a>(&self, tx: &'a UnsignedTransaction) -> CoreResult<&'a EvmTxPayload> {
        match tx {
            UnsignedTransaction::Ethereum(payload) => Ok(payload),
            other => Err(CoreError::UnsupportedNetwork(format!(
                "Ethereum provider cannot handle {} transactions",
                other.chain_type()
            ))),
        }
    }

    async fn latest_block(&self) -> CoreResult<Value> {
        self.rpc
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await
    }

    async fn fee_data(&self) -> CoreResult<FeeData> {
        let gas_price = to_u256(
            &self.rpc.request("eth_gasPrice", json!([])).await?,
            "eth_gasPrice",
        )?;

        let block = self.latest_block().await?;
        let base_fee = match block.get("baseFeePerGas") {
            Some(value) if !value.is_null() => Some(to_u256(value, "eth_getBlockByNumber")?),
            _ => None,
        };

        let Some(base_fee) = base_fee else {
            return Ok(FeeData {
                gas_price,
                ..FeeData::default()
            });
        };

        let priority = match self.rpc.request("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(value) => to_u256(&value, "eth_maxPriorityFeePerGas")?,
            Err(e) => {
                tracing::debug!(error = %e, chain_id = %self.chain_id, "eth_maxPriorityFeePerGas unavailable, using default tip");
                U256::from(DEFAULT_PRIORITY_FEE_WEI)
            }
        };

        Ok(FeeData {
            gas_price,
            max_fee_per_gas: Some(base_fee * U256::from(2u64) + priority),
            max_priority_fee_per_gas: Some(priority),
        })
    }

    fn assemble_hardware_result(
        &self,
        tx: &EvmTxPayload,
        result: HardwareSignResult,
    ) -> CoreResult<SignedTransaction> {
        match result {
            HardwareSignResult::RawTransaction { raw, hash } => Ok(SignedTransaction {
                chain_type: NetworkType::Ethereum,
                raw_transaction: raw,
                hash,
            }),
            HardwareSignResult::Signature { r, s, v, .. } => {
                let typed = evm_tx::to_typed_transaction(tx)?;
                let recovery_id = v.checked_sub(27).unwrap_or(v) % 2;
                let (raw, hash) =
                    evm_tx::encode_signed(&typed, parse_quantity(&r)?, parse_quantity(&s)?, recovery_id)?;
                Ok(SignedTransaction {
                    chain_type: NetworkType::Ethereum,
                    raw_transaction: raw,
                    hash,
                })
            }
            HardwareSignResult::TypedSignature { .. } => Err(CoreError::Signing(
                "Hardware wallet returned unsupported result type for transactions.".to_string(),
            )),
        }
    }
}

fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

#[async_trait]
impl ChainProvider for EthereumChainProvider {
    fn network_type(&self) -> NetworkType {
        NetworkType::Ethereum
    }

    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn rpc(&self) -> Arc<dyn JsonRpcClient> {
        self.rpc.clone()
    }

    fn derive_address(&self, public_key: &str) -> CoreResult<String> {
        to_checksum_address(&address_from_public_key_hex(public_key)?)
    }

    fn validate_address(&self, address: &str) -> bool {
        is_valid_address(address)
    }

    fn prepare_address_for_abi(&self, address: &str) -> CoreResult<String> {
        to_checksum_address(address)
    }

    async fn build_transaction(&self, params: &TransactionParams) -> CoreResult<UnsignedTransaction> {
        let call = build_transaction_payload(&TransactionBuildInput::from(params))?;

        let nonce = match params.nonce {
            Some(nonce) => nonce,
            None => self.get_nonce(&params.from).await?,
        };

        let tx_type = if params.max_fee_per_gas.is_some() || params.max_priority_fee_per_gas.is_some() {
            Some(2)
        } else if params.gas_price.is_some() {
            Some(0)
        } else {
            None
        };

        let chain_id = if params.chain_id.trim().is_empty() {
            self.chain_id.clone()
        } else {
            params.chain_id.clone()
        };

        tracing::debug!(
            chain_id = %chain_id,
            asset_type = ?params.asset_type,
            nonce = nonce,
            "Built Ethereum transaction"
        );

        Ok(UnsignedTransaction::Ethereum(EvmTxPayload {
            from: params.from.clone(),
            to: Some(call.to),
            value: call.value,
            data: call.data,
            chain_id,
            gas_limit: params.gas_limit.clone(),
            gas_price: params.gas_price.clone(),
            max_fee_per_gas: params.max_fee_per_gas.clone(),
            max_priority_fee_per_gas: params.max_priority_fee_per_gas.clone(),
            nonce,
            tx_type,
        }))
    }

    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CoreResult<FeeEstimate> {
        let payload = self.evm_payload(tx)?;

        let gas_limit = match parse_optional_quantity(payload.gas_limit.as_deref())? {
            Some(gas) => gas,
            None => {
                let mut request = json!({
                    "from": payload.from,
                    "value": payload.value,
                    "data": payload.data,
                });
                if let Some(to) = payload.to.as_deref() {
                    request["to"] = json!(to);
                }
                to_u256(
                    &self.rpc.request("eth_estimateGas", json!([request])).await?,
                    "eth_estimateGas",
                )?
            }
        };

        let fee_data = self.fee_data().await?;
        let explicit_1559 = payload.max_fee_per_gas.is_some()
            || payload.max_priority_fee_per_gas.is_some()
            || payload.tx_type == Some(2);
        let network_1559 = fee_data.max_fee_per_gas.is_some() && fee_data.max_priority_fee_per_gas.is_some();

        let estimate = if explicit_1559 || network_1559 {
            let max_fee = parse_optional_quantity(payload.max_fee_per_gas.as_deref())?
                .or(fee_data.max_fee_per_gas)
                .unwrap_or(fee_data.gas_price);
            let tip = parse_optional_quantity(payload.max_priority_fee_per_gas.as_deref())?
                .or(fee_data.max_priority_fee_per_gas)
                .unwrap_or_default();
            FeeEstimate {
                chain_type: NetworkType::Ethereum,
                gas_limit: format_quantity(gas_limit),
                estimated_total: format_quantity(gas_limit * max_fee),
                pricing: FeePricing::Eip1559 {
                    max_fee_per_gas: format_quantity(max_fee),
                    max_priority_fee_per_gas: format_quantity(tip),
                },
                storage_limit: None,
            }
        } else {
            let gas_price =
                parse_optional_quantity(payload.gas_price.as_deref())?.unwrap_or(fee_data.gas_price);
            FeeEstimate {
                chain_type: NetworkType::Ethereum,
                gas_limit: format_quantity(gas_limit),
                estimated_total: format_quantity(gas_limit * gas_price),
                pricing: FeePricing::Legacy {
                    gas_price: format_quantity(gas_price),
                },
                storage_limit: None,
            }
        };

        tracing::debug!(
            chain_id = %self.chain_id,
            gas_limit = %estimate.gas_limit,
            estimated_total = %estimate.estimated_total,
            "Estimated Ethereum fee"
        );
        Ok(estimate)
    }

    async fn sign_transaction(&self, tx: &UnsignedTransaction, signer: &Signer) -> CoreResult<SignedTransaction> {
        let payload = self.evm_payload(tx)?;
        match signer {
            Signer::Software(software) => {
                let typed = evm_tx::to_typed_transaction(payload)?;
                let signature = software.sign_transaction(&typed)?;
                let raw = typed.rlp_signed(&signature);
                let hash = crate::utils::address::keccak256(&raw);
                Ok(SignedTransaction {
                    chain_type: NetworkType::Ethereum,
                    raw_transaction: format!("0x{}", hex::encode(&raw)),
                    hash: format!("0x{}", hex::encode(hash)),
                })
            }
            Signer::Hardware(hardware) => {
                let result = hardware
                    .sign_with_hardware(SigningPayload::Transaction {
                        unsigned_tx: tx.clone(),
                    })
                    .await?;
                self.assemble_hardware_result(payload, result)
            }
        }
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CoreResult<String> {
        let result = self
            .rpc
            .request("eth_sendRawTransaction", json!([signed.raw_transaction]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| CoreError::invalid_response("eth_sendRawTransaction", "expected hash string"))?;
        tracing::info!(chain_id = %self.chain_id, tx_hash = %hash, "Transaction broadcast");
        validate_tx_hash(hash)
    }

    async fn get_balance(&self, address: &str) -> CoreResult<String> {
        let value = self
            .rpc
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(format_quantity(to_u256(&value, "eth_getBalance")?))
    }

    async fn get_nonce(&self, address: &str) -> CoreResult<u64> {
        let value = self
            .rpc
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        to_u64(&value, "eth_getTransactionCount")
    }

    async fn get_transaction_status(&self, hash: &str) -> CoreResult<ChainTxStatus> {
        let receipt = self
            .rpc
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if receipt.is_null() {
            return Ok(ChainTxStatus::Pending);
        }
        match receipt.get("status").and_then(Value::as_str) {
            Some("0x0") => Ok(ChainTxStatus::Failed),
            _ => Ok(ChainTxStatus::Confirmed),
        }
    }

    async fn call(&self, to: &str, data: &str) -> CoreResult<String> {
        let result = self
            .rpc
            .request("eth_call", json!([{"to": to, "data": data}, "latest"]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::invalid_response("eth_call", "expected hex string"))
    }

    async fn supports_eip1559(&self) -> CoreResult<bool> {
        let block = self.latest_block().await?;
        Ok(block
            .get("baseFeePerGas")
            .map(|fee| !fee.is_null())
            .unwrap_or(false))
    }

    async fn sign_message(&self, message: &str, signer: &Signer) -> CoreResult<String> {
        let bytes = evm_tx::personal_message_bytes(message)?;
        match signer {
            Signer::Software(software) => {
                let signature = software.sign_digest(evm_tx::personal_message_hash(&bytes))?;
                Ok(signature_hex(&signature))
            }
            Signer::Hardware(hardware) => {
                let result = hardware
                    .sign_with_hardware(SigningPayload::Message(MessagePayload::Personal {
                        message: format!("0x{}", hex::encode(&bytes)),
                    }))
                    .await?;
                match result {
                    HardwareSignResult::TypedSignature { signature } => Ok(signature),
                    HardwareSignResult::Signature { r, s, v, .. } => {
                        let signature = Signature {
                            r: parse_quantity(&r)?,
                            s: parse_quantity(&s)?,
                            v,
                        };
                        Ok(signature_hex(&signature))
                    }
                    HardwareSignResult::RawTransaction { .. } => Err(CoreError::Signing(
                        "Hardware wallet did not return a message signature.".to_string(),
                    )),
                }
            }
        }
    }

    async fn verify_message(&self, message: &str, signature: &str, address: &str) -> CoreResult<bool> {
        let Ok(bytes) = evm_tx::personal_message_bytes(message) else {
            return Ok(false);
        };
        let Ok(signature) = parse_signature(signature) else {
            return Ok(false);
        };
        match signature.recover(bytes) {
            Ok(recovered) => Ok(same_address(&format!("{:?}", recovered), address)),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::AssetType,
        infrastructure::rpc::mock::MockRpcClient,
        service::signing::SoftwareSigner,
    };

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const FROM: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const TO: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn params() -> TransactionParams {
        TransactionParams {
            from: FROM.into(),
            to: TO.into(),
            chain_id: "0x1".into(),
            amount: "1".into(),
            asset_type: AssetType::Native,
            asset_decimals: 18,
            contract_address: None,
            nft_token_id: None,
            data: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            storage_limit: None,
            nonce: None,
            epoch_height: None,
        }
    }

    fn provider(rpc: MockRpcClient) -> (EthereumChainProvider, Arc<MockRpcClient>) {
        let rpc = Arc::new(rpc);
        (EthereumChainProvider::new("0x1", rpc.clone()).unwrap(), rpc)
    }

    #[test]
    fn test_rejects_zero_chain_id() {
        assert!(EthereumChainProvider::new("0", Arc::new(MockRpcClient::new())).is_err());
    }

    #[test]
    fn test_address_helpers() {
        let (provider, _) = provider(MockRpcClient::new());
        assert!(provider.validate_address(FROM));
        assert!(!provider.validate_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92267x"));
        assert_eq!(provider.prepare_address_for_abi(&FROM.to_lowercase()).unwrap(), FROM);
    }

    #[tokio::test]
    async fn test_build_uses_pending_nonce() {
        let (provider, rpc) = provider(MockRpcClient::new().reply("eth_getTransactionCount", json!("0x7")));
        let tx = provider.build_transaction(&params()).await.unwrap();
        let UnsignedTransaction::Ethereum(payload) = tx else {
            panic!("expected Ethereum payload");
        };
        assert_eq!(payload.nonce, 7);
        assert_eq!(payload.value, "0xde0b6b3a7640000");
        assert_eq!(payload.tx_type, None);
        assert_eq!(rpc.calls("eth_getTransactionCount")[0], json!([FROM, "pending"]));
    }

    #[tokio::test]
    async fn test_estimate_fee_prefers_1559_when_network_supports_it() {
        let (provider, _) = provider(
            MockRpcClient::new()
                .reply("eth_getTransactionCount", json!("0x0"))
                .reply("eth_estimateGas", json!("0x5208"))
                .reply("eth_gasPrice", json!("0x3b9aca00"))
                .reply("eth_getBlockByNumber", json!({"baseFeePerGas": "0x64"}))
                .reply("eth_maxPriorityFeePerGas", json!("0xa")),
        );
        let tx = provider.build_transaction(&params()).await.unwrap();
        let fee = provider.estimate_fee(&tx).await.unwrap();

        // maxFee = 2 * 100 + 10
        assert_eq!(fee.max_fee_per_gas(), Some("0xd2"));
        assert_eq!(fee.max_priority_fee_per_gas(), Some("0xa"));
        assert_eq!(fee.gas_price(), None);
        assert_eq!(fee.estimated_total, format_quantity(U256::from(21000u64 * 210)));
    }

    #[tokio::test]
    async fn test_estimate_fee_legacy_network() {
        let (provider, _) = provider(
            MockRpcClient::new()
                .reply("eth_getTransactionCount", json!("0x0"))
                .reply("eth_estimateGas", json!("0x5208"))
                .reply("eth_gasPrice", json!("0x2"))
                .reply("eth_getBlockByNumber", json!({"number": "0x1"})),
        );
        let tx = provider.build_transaction(&params()).await.unwrap();
        let fee = provider.estimate_fee(&tx).await.unwrap();
        assert_eq!(fee.gas_price(), Some("0x2"));
        assert_eq!(fee.estimated_total, "0xa410");
    }

    #[tokio::test]
    async fn test_software_sign_and_verify_message() {
        let (provider, _) = provider(MockRpcClient::new().reply("eth_getTransactionCount", json!("0x0")));
        let signer = Signer::Software(SoftwareSigner::from_hex(KEY).unwrap());

        let signature = provider.sign_message("hello", &signer).await.unwrap();
        assert!(provider.verify_message("hello", &signature, FROM).await.unwrap());
        assert!(!provider.verify_message("hello", &signature, TO).await.unwrap());
        assert!(!provider.verify_message("hello", "0xdead", FROM).await.unwrap());

        let mut p = params();
        p.gas_limit = Some("0x5208".into());
        p.gas_price = Some("0x1".into());
        let tx = provider.build_transaction(&p).await.unwrap();
        let signed = provider.sign_transaction(&tx, &signer).await.unwrap();
        assert!(signed.raw_transaction.starts_with("0xf8"));
        assert_eq!(signed.hash.len(), 66);
    }

    #[tokio::test]
    async fn test_receipt_status_mapping() {
        let (provider, rpc) = provider(MockRpcClient::new().reply("eth_getTransactionReceipt", Value::Null));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Pending);
        rpc.set("eth_getTransactionReceipt", json!({"status": "0x0"}));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Failed);
        rpc.set("eth_getTransactionReceipt", json!({"status": "0x1"}));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Confirmed);
    }
}
