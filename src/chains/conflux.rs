//! Conflux 链提供方
//!
//! 只接受带 netId 的链上编码地址；余额、nonce 与高度查询都以 `latest_state` 纪元为准。
//! 交易签名与消息签名尚未支持，调用返回 `Unsupported`。

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{H256, U256};
use serde_json::{json, Value};

use super::{
    evm_tx,
    payload::{build_transaction_payload, TransactionBuildInput},
    provider::ChainProvider,
};
use crate::{
    domain::{
        ChainTxStatus, ConfluxTxPayload, FeeEstimate, FeePricing, NetworkType, SignedTransaction,
        TransactionParams, UnsignedTransaction,
    },
    error::{CoreError, CoreResult},
    infrastructure::{
        rpc::JsonRpcClient,
        rpc_validator::{to_u256, to_u64, validate_tx_hash},
    },
    service::signing::{parse_signature, Signer},
    utils::{
        address::{address_from_public_key_hex, is_hex_address, keccak256, to_checksum_address},
        conflux_address::{self, to_account_address},
        units::{format_quantity, parse_optional_quantity},
    },
};

/// 最新已执行状态的纪元标签
pub const LATEST_STATE: &str = "latest_state";

const MESSAGE_PREFIX: &str = "\x19Conflux Signed Message:\n";

pub struct ConfluxChainProvider {
    chain_id: String,
    net_id: u32,
    rpc: Arc<dyn JsonRpcClient>,
}

impl ConfluxChainProvider {
    pub fn new(chain_id: impl Into<String>, net_id: u32, rpc: Arc<dyn JsonRpcClient>) -> CoreResult<Self> {
        if net_id == 0 {
            return Err(CoreError::InvalidParams(
                "Conflux netId must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            chain_id: chain_id.into(),
            net_id,
            rpc,
        })
    }

    pub fn net_id(&self) -> u32 {
        self.net_id
    }

    fn cfx_payload<'a>(&self, tx: &'a UnsignedTransaction) -> CoreResult<&'a ConfluxTxPayload> {
        match tx {
            UnsignedTransaction::Conflux(payload) => Ok(payload),
            other => Err(CoreError::UnsupportedNetwork(format!(
                "Conflux provider cannot handle {} transactions",
                other.chain_type()
            ))),
        }
    }

    async fn epoch_number(&self) -> CoreResult<u64> {
        let value = self
            .rpc
            .request("cfx_epochNumber", json!([LATEST_STATE]))
            .await?;
        to_u64(&value, "cfx_epochNumber")
    }

    /// 带 Conflux 前缀的消息哈希
    fn message_hash(message: &[u8]) -> [u8; 32] {
        let mut prefixed = Vec::with_capacity(MESSAGE_PREFIX.len() + 8 + message.len());
        prefixed.extend_from_slice(MESSAGE_PREFIX.as_bytes());
        prefixed.extend_from_slice(message.len().to_string().as_bytes());
        prefixed.extend_from_slice(message);
        keccak256(prefixed)
    }
}

#[async_trait]
impl ChainProvider for ConfluxChainProvider {
    fn network_type(&self) -> NetworkType {
        NetworkType::Conflux
    }

    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn rpc(&self) -> Arc<dyn JsonRpcClient> {
        self.rpc.clone()
    }

    fn derive_address(&self, public_key: &str) -> CoreResult<String> {
        let hex = address_from_public_key_hex(public_key)?;
        conflux_address::encode(&to_account_address(&hex)?, self.net_id)
    }

    fn validate_address(&self, address: &str) -> bool {
        conflux_address::decode(address)
            .map(|decoded| decoded.net_id == self.net_id)
            .unwrap_or(false)
    }

    fn prepare_address_for_abi(&self, address: &str) -> CoreResult<String> {
        if is_hex_address(address) {
            return to_checksum_address(address);
        }
        to_checksum_address(&conflux_address::base32_to_hex(address)?)
    }

    async fn build_transaction(&self, params: &TransactionParams) -> CoreResult<UnsignedTransaction> {
        let call = build_transaction_payload(&TransactionBuildInput::from(params))?;

        let nonce = match params.nonce {
            Some(nonce) => nonce,
            None => self.get_nonce(&params.from).await?,
        };
        let epoch_height = match params.epoch_height {
            Some(height) => height,
            None => self.epoch_number().await?,
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
            epoch_height = epoch_height,
            "Built Conflux transaction"
        );

        Ok(UnsignedTransaction::Conflux(ConfluxTxPayload {
            from: params.from.clone(),
            to: Some(call.to),
            value: call.value,
            data: call.data,
            chain_id,
            gas_limit: params.gas_limit.clone(),
            gas_price: params.gas_price.clone(),
            storage_limit: params.storage_limit.clone(),
            nonce,
            epoch_height,
        }))
    }

    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CoreResult<FeeEstimate> {
        let payload = self.cfx_payload(tx)?;

        let mut request = json!({
            "from": payload.from,
            "value": payload.value,
            "data": payload.data,
        });
        if let Some(to) = payload.to.as_deref() {
            request["to"] = json!(to);
        }
        let estimate = self
            .rpc
            .request("cfx_estimateGasAndCollateral", json!([request, LATEST_STATE]))
            .await?;
        let gas_used = estimate
            .get("gasUsed")
            .ok_or_else(|| CoreError::invalid_response("cfx_estimateGasAndCollateral", "missing gasUsed"))?;
        let gas_used = to_u256(gas_used, "cfx_estimateGasAndCollateral")?;
        let collateral = match estimate.get("storageCollateralized") {
            Some(value) => to_u256(value, "cfx_estimateGasAndCollateral")?,
            None => U256::zero(),
        };

        let gas_price = match parse_optional_quantity(payload.gas_price.as_deref())? {
            Some(price) => price,
            None => to_u256(
                &self.rpc.request("cfx_gasPrice", json!([])).await?,
                "cfx_gasPrice",
            )?,
        };
        let gas_limit = parse_optional_quantity(payload.gas_limit.as_deref())?.unwrap_or(gas_used);
        let storage_limit = parse_optional_quantity(payload.storage_limit.as_deref())?.unwrap_or(collateral);

        let fee = FeeEstimate {
            chain_type: NetworkType::Conflux,
            gas_limit: format_quantity(gas_limit),
            estimated_total: format_quantity(gas_limit * gas_price + storage_limit),
            pricing: FeePricing::Legacy {
                gas_price: format_quantity(gas_price),
            },
            storage_limit: Some(format_quantity(storage_limit)),
        };

        tracing::debug!(
            chain_id = %self.chain_id,
            gas_limit = %fee.gas_limit,
            storage_limit = ?fee.storage_limit,
            estimated_total = %fee.estimated_total,
            "Estimated Conflux fee"
        );
        Ok(fee)
    }

    async fn sign_transaction(&self, _tx: &UnsignedTransaction, _signer: &Signer) -> CoreResult<SignedTransaction> {
        Err(CoreError::Unsupported(
            "Conflux transaction signing is not implemented".to_string(),
        ))
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CoreResult<String> {
        let result = self
            .rpc
            .request("cfx_sendRawTransaction", json!([signed.raw_transaction]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| CoreError::invalid_response("cfx_sendRawTransaction", "expected hash string"))?;
        tracing::info!(chain_id = %self.chain_id, tx_hash = %hash, "Transaction broadcast");
        validate_tx_hash(hash)
    }

    async fn get_balance(&self, address: &str) -> CoreResult<String> {
        let value = self
            .rpc
            .request("cfx_getBalance", json!([address, LATEST_STATE]))
            .await?;
        Ok(format_quantity(to_u256(&value, "cfx_getBalance")?))
    }

    async fn get_nonce(&self, address: &str) -> CoreResult<u64> {
        let value = self
            .rpc
            .request("cfx_getNextNonce", json!([address, LATEST_STATE]))
            .await?;
        to_u64(&value, "cfx_getNextNonce")
    }

    async fn get_transaction_status(&self, hash: &str) -> CoreResult<ChainTxStatus> {
        let receipt = self
            .rpc
            .request("cfx_getTransactionReceipt", json!([hash]))
            .await?;
        if receipt.is_null() {
            return Ok(ChainTxStatus::Pending);
        }
        // outcomeStatus: 0x0 成功，其余为执行失败
        match receipt.get("outcomeStatus") {
            Some(status) if to_u64(status, "cfx_getTransactionReceipt")? == 0 => Ok(ChainTxStatus::Confirmed),
            Some(_) => Ok(ChainTxStatus::Failed),
            None => Ok(ChainTxStatus::Pending),
        }
    }

    async fn call(&self, to: &str, data: &str) -> CoreResult<String> {
        let result = self
            .rpc
            .request("cfx_call", json!([{"to": to, "data": data}, LATEST_STATE]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::invalid_response("cfx_call", "expected hex string"))
    }

    async fn supports_eip1559(&self) -> CoreResult<bool> {
        let block = self
            .rpc
            .request("cfx_getBlockByEpochNumber", json!([LATEST_STATE, false]))
            .await?;
        Ok(block
            .get("baseFeePerGas")
            .map(|fee| !fee.is_null())
            .unwrap_or(false))
    }

    async fn sign_message(&self, _message: &str, _signer: &Signer) -> CoreResult<String> {
        Err(CoreError::Unsupported(
            "Conflux message signing is not implemented".to_string(),
        ))
    }

    async fn verify_message(&self, message: &str, signature: &str, address: &str) -> CoreResult<bool> {
        let Ok(decoded) = conflux_address::decode(address) else {
            return Ok(false);
        };
        if decoded.net_id != self.net_id {
            return Ok(false);
        }
        let Ok(bytes) = evm_tx::personal_message_bytes(message) else {
            return Ok(false);
        };
        let Ok(signature) = parse_signature(signature) else {
            return Ok(false);
        };
        let digest = H256::from(Self::message_hash(&bytes));
        let Ok(recovered) = signature.recover(digest) else {
            return Ok(false);
        };
        let recovered = to_account_address(&format!("{:?}", recovered))?;
        let expected = to_account_address(&decoded.hex())?;
        Ok(recovered.eq_ignore_ascii_case(&expected))
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
    const TESTNET_ADDRESS: &str = "cfx:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg";
    const MAINNET_ID: u32 = 1029;

    fn provider(rpc: MockRpcClient) -> (ConfluxChainProvider, Arc<MockRpcClient>) {
        let rpc = Arc::new(rpc);
        (
            ConfluxChainProvider::new("0x405", MAINNET_ID, rpc.clone()).unwrap(),
            rpc,
        )
    }

    fn params(from: &str) -> TransactionParams {
        TransactionParams {
            from: from.into(),
            to: TESTNET_ADDRESS.into(),
            chain_id: String::new(),
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

    fn public_key(signer: &SoftwareSigner) -> String {
        use k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};
        let key = SigningKey::from_slice(signer.get_private_key().as_slice()).unwrap();
        format!(
            "0x{}",
            hex::encode(key.verifying_key().to_encoded_point(false).as_bytes())
        )
    }

    #[test]
    fn test_rejects_zero_net_id() {
        assert!(ConfluxChainProvider::new("0x1", 0, Arc::new(MockRpcClient::new())).is_err());
    }

    #[test]
    fn test_validate_requires_matching_net_id() {
        let (provider, _) = provider(MockRpcClient::new());
        assert!(provider.validate_address(TESTNET_ADDRESS));
        assert!(!provider.validate_address("0x1a2f80341409639ea6a35bbcab8299066109aa55"));

        let testnet = ConfluxChainProvider::new("0x1", 1, Arc::new(MockRpcClient::new())).unwrap();
        assert!(!testnet.validate_address(TESTNET_ADDRESS));
    }

    #[test]
    fn test_prepare_address_for_abi_yields_checksum_hex() {
        let (provider, _) = provider(MockRpcClient::new());
        let hex = provider.prepare_address_for_abi(TESTNET_ADDRESS).unwrap();
        assert_eq!(hex.to_lowercase(), "0x1a2f80341409639ea6a35bbcab8299066109aa55");
        assert_eq!(hex, to_checksum_address(&hex).unwrap());
    }

    #[test]
    fn test_derive_address_uses_account_prefix() {
        let (provider, _) = provider(MockRpcClient::new());
        let signer = SoftwareSigner::from_hex(KEY).unwrap();
        let derived = provider.derive_address(&public_key(&signer)).unwrap();

        let decoded = conflux_address::decode(&derived).unwrap();
        assert_eq!(decoded.net_id, MAINNET_ID);
        assert_eq!(
            decoded.hex(),
            to_account_address(&signer.address().unwrap()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_build_uses_latest_state_nonce_and_epoch() {
        let (provider, rpc) = provider(
            MockRpcClient::new()
                .reply("cfx_getNextNonce", json!("0x3"))
                .reply("cfx_epochNumber", json!("0x10")),
        );
        let tx = provider.build_transaction(&params(TESTNET_ADDRESS)).await.unwrap();
        let UnsignedTransaction::Conflux(payload) = tx else {
            panic!("expected Conflux payload");
        };
        assert_eq!(payload.nonce, 3);
        assert_eq!(payload.epoch_height, 16);
        assert_eq!(payload.chain_id, "0x405");
        assert_eq!(rpc.calls("cfx_getNextNonce")[0], json!([TESTNET_ADDRESS, LATEST_STATE]));
    }

    #[tokio::test]
    async fn test_estimate_adds_storage_collateral() {
        let (provider, _) = provider(
            MockRpcClient::new()
                .reply("cfx_getNextNonce", json!("0x0"))
                .reply("cfx_epochNumber", json!(1))
                .reply(
                    "cfx_estimateGasAndCollateral",
                    json!({"gasUsed": "0x5208", "storageCollateralized": "0x40"}),
                )
                .reply("cfx_gasPrice", json!("0x1")),
        );
        let tx = provider.build_transaction(&params(TESTNET_ADDRESS)).await.unwrap();
        let fee = provider.estimate_fee(&tx).await.unwrap();
        assert_eq!(fee.gas_limit, "0x5208");
        assert_eq!(fee.storage_limit.as_deref(), Some("0x40"));
        assert_eq!(fee.gas_price(), Some("0x1"));
        // 21000 * 1 + 64
        assert_eq!(fee.estimated_total, "0x5248");
    }

    #[tokio::test]
    async fn test_signing_is_unsupported() {
        let (provider, _) = provider(
            MockRpcClient::new()
                .reply("cfx_getNextNonce", json!("0x0"))
                .reply("cfx_epochNumber", json!("0x1")),
        );
        let signer = Signer::Software(SoftwareSigner::from_hex(KEY).unwrap());
        let tx = provider.build_transaction(&params(TESTNET_ADDRESS)).await.unwrap();
        let err = provider.sign_transaction(&tx, &signer).await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_OPERATION");
        assert!(provider.sign_message("hi", &signer).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_message_with_conflux_prefix() {
        let (provider, _) = provider(MockRpcClient::new());
        let signer = SoftwareSigner::from_hex(KEY).unwrap();
        let address = provider.derive_address(&public_key(&signer)).unwrap();

        let digest = ConfluxChainProvider::message_hash(b"hello");
        let signature = format!("0x{}", hex::encode(signer.sign_digest(digest).unwrap().to_vec()));

        assert!(provider.verify_message("hello", &signature, &address).await.unwrap());
        assert!(!provider.verify_message("hello!", &signature, &address).await.unwrap());
        assert!(!provider.verify_message("hello", &signature, TESTNET_ADDRESS).await.unwrap());
    }

    #[tokio::test]
    async fn test_receipt_outcome_status() {
        let (provider, rpc) = provider(MockRpcClient::new().reply("cfx_getTransactionReceipt", Value::Null));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Pending);
        rpc.set("cfx_getTransactionReceipt", json!({"outcomeStatus": "0x0"}));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Confirmed);
        rpc.set("cfx_getTransactionReceipt", json!({"outcomeStatus": "0x1"}));
        assert_eq!(provider.get_transaction_status("0x1").await.unwrap(), ChainTxStatus::Failed);
    }
}
