//! EVM 交易与消息编码
//!
//! 未签名载荷与 ethers 交易类型之间的转换、签名后的 RLP 序列化，
//! 以及个人消息与 EIP-712 结构化数据的哈希。软件签名与硬件签名共用。

use std::{collections::HashSet, str::FromStr};

use ethers::types::{
    transaction::{
        eip2718::TypedTransaction,
        eip712::{Eip712, TypedData},
    },
    Address, Bytes, Eip1559TransactionRequest, NameOrAddress, Signature, TransactionRequest, U256,
};
use serde_json::{json, Value};

use crate::{
    domain::EvmTxPayload,
    error::{CoreError, CoreResult},
    utils::{
        address::keccak256,
        units::{decode_hex, is_hex_bytes, parse_optional_quantity, parse_quantity},
    },
};

const EIP712_DOMAIN_TYPE: &str = "EIP712Domain";

/// 未指定类型时：带 maxFeePerGas 即为 2，否则为 0
pub fn resolve_tx_type(payload: &EvmTxPayload) -> u8 {
    payload
        .tx_type
        .unwrap_or(if payload.max_fee_per_gas.is_some() { 2 } else { 0 })
}

pub fn parse_chain_id(chain_id: &str) -> CoreResult<u64> {
    let value = parse_quantity(chain_id)?;
    if value > U256::from(u64::MAX) {
        return Err(CoreError::InvalidParams(format!("Chain id out of range: {}", chain_id)));
    }
    Ok(value.as_u64())
}

fn parse_address(value: &str) -> CoreResult<Address> {
    Address::from_str(value)
        .map_err(|_| CoreError::InvalidParams(format!("Invalid EVM address: {}", value)))
}

/// 载荷转换为 ethers 交易
pub fn to_typed_transaction(payload: &EvmTxPayload) -> CoreResult<TypedTransaction> {
    let from = parse_address(&payload.from)?;
    let to = payload
        .to
        .as_deref()
        .filter(|to| !to.is_empty())
        .map(parse_address)
        .transpose()?;
    let value = parse_quantity(&payload.value)?;
    let data = Bytes::from(decode_hex(&payload.data)?);
    let chain_id = parse_chain_id(&payload.chain_id)?;
    let gas = parse_optional_quantity(payload.gas_limit.as_deref())?;

    let tx = match resolve_tx_type(payload) {
        0 => {
            let mut request = TransactionRequest::new()
                .from(from)
                .value(value)
                .data(data)
                .nonce(payload.nonce)
                .chain_id(chain_id);
            if let Some(to) = to {
                request = request.to(NameOrAddress::Address(to));
            }
            if let Some(gas) = gas {
                request = request.gas(gas);
            }
            if let Some(price) = parse_optional_quantity(payload.gas_price.as_deref())? {
                request = request.gas_price(price);
            }
            TypedTransaction::Legacy(request)
        }
        2 => {
            let mut request = Eip1559TransactionRequest::new()
                .from(from)
                .value(value)
                .data(data)
                .nonce(payload.nonce)
                .chain_id(chain_id);
            if let Some(to) = to {
                request = request.to(NameOrAddress::Address(to));
            }
            if let Some(gas) = gas {
                request = request.gas(gas);
            }
            if let Some(max_fee) = parse_optional_quantity(payload.max_fee_per_gas.as_deref())? {
                request = request.max_fee_per_gas(max_fee);
            }
            if let Some(tip) = parse_optional_quantity(payload.max_priority_fee_per_gas.as_deref())? {
                request = request.max_priority_fee_per_gas(tip);
            }
            TypedTransaction::Eip1559(request)
        }
        other => {
            return Err(CoreError::InvalidParams(format!(
                "Unsupported transaction type: {}",
                other
            )))
        }
    };
    Ok(tx)
}

/// 待签名摘要
pub fn transaction_digest(tx: &TypedTransaction) -> [u8; 32] {
    tx.sighash().0
}

/// 用 (r, s, 恢复 id) 序列化签名交易，返回 (raw, hash)
///
/// legacy 交易使用 EIP-155 的 v，typed 交易使用 y-parity。
pub fn encode_signed(
    tx: &TypedTransaction,
    r: U256,
    s: U256,
    recovery_id: u64,
) -> CoreResult<(String, String)> {
    let v = match tx {
        TypedTransaction::Legacy(_) => {
            let chain_id = tx
                .chain_id()
                .ok_or_else(|| CoreError::InvalidParams("Missing chain id".to_string()))?
                .as_u64();
            chain_id
                .checked_mul(2)
                .and_then(|v| v.checked_add(35))
                .and_then(|v| v.checked_add(recovery_id))
                .ok_or_else(|| CoreError::InvalidParams(format!("Chain id {} is out of range", chain_id)))?
        }
        _ => recovery_id,
    };
    let raw = tx.rlp_signed(&Signature { r, s, v });
    let hash = keccak256(&raw);
    Ok((
        format!("0x{}", hex::encode(&raw)),
        format!("0x{}", hex::encode(hash)),
    ))
}

/// 个人消息：0x 偶数长度十六进制按字节处理，否则按 UTF-8
pub fn personal_message_bytes(message: &str) -> CoreResult<Vec<u8>> {
    if is_hex_bytes(message) {
        decode_hex(message)
    } else {
        Ok(message.as_bytes().to_vec())
    }
}

/// EIP-191 个人消息哈希
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    ethers::utils::hash_message(message).0
}

/// 找出未被其他类型引用的唯一类型
fn infer_primary_type(types: &serde_json::Map<String, Value>) -> CoreResult<String> {
    let referenced: HashSet<String> = types
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|field| field.get("type").and_then(Value::as_str))
        .map(|ty| ty.trim_end_matches("[]").to_string())
        .collect();

    let candidates: Vec<&String> = types.keys().filter(|k| !referenced.contains(*k)).collect();
    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(CoreError::InvalidParams(
            "Unable to determine EIP-712 primary type".to_string(),
        )),
    }
}

/// EIP-712 结构化数据哈希，`types` 中的 EIP712Domain 会被移除
pub fn typed_data_hash(
    domain: &Value,
    types: &Value,
    message: &Value,
    primary_type: Option<&str>,
) -> CoreResult<[u8; 32]> {
    let mut types = types
        .as_object()
        .cloned()
        .ok_or_else(|| CoreError::InvalidParams("EIP-712 types must be an object".to_string()))?;
    types.remove(EIP712_DOMAIN_TYPE);

    let primary_type = match primary_type {
        Some(primary) => primary.to_string(),
        None => infer_primary_type(&types)?,
    };

    let typed: TypedData = serde_json::from_value(json!({
        "domain": domain,
        "types": types,
        "primaryType": primary_type,
        "message": message,
    }))
    .map_err(|e| CoreError::InvalidParams(format!("Invalid EIP-712 payload: {}", e)))?;

    typed
        .encode_eip712()
        .map_err(|e| CoreError::InvalidParams(format!("Failed to hash EIP-712 payload: {}", e)))
}

/// 65 字节 r || s || v 签名
pub fn join_signature(r: &[u8; 32], s: &[u8; 32], v: u64) -> String {
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(r);
    bytes.extend_from_slice(s);
    bytes.push(v as u8);
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use ethers::signers::{LocalWallet, Signer};

    use super::*;

    const SECRET: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn payload(tx_type: Option<u8>) -> EvmTxPayload {
        EvmTxPayload {
            from: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".into(),
            to: Some("0x70997970C51812dc3A010C7d01b50e0d17dc79C8".into()),
            value: "0xde0b6b3a7640000".into(),
            data: "0x".into(),
            chain_id: "0x1".into(),
            gas_limit: Some("0x5208".into()),
            gas_price: Some("0x3b9aca00".into()),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: 3,
            tx_type,
        }
    }

    #[test]
    fn test_tx_type_inference() {
        let mut p = payload(None);
        assert_eq!(resolve_tx_type(&p), 0);
        p.max_fee_per_gas = Some("0x1".into());
        assert_eq!(resolve_tx_type(&p), 2);
        p.tx_type = Some(0);
        assert_eq!(resolve_tx_type(&p), 0);
    }

    #[test]
    fn test_legacy_encoding_matches_local_wallet() {
        let wallet: LocalWallet = SECRET.parse::<LocalWallet>().unwrap().with_chain_id(1u64);
        let tx = to_typed_transaction(&payload(Some(0))).unwrap();
        let expected = wallet.sign_transaction_sync(&tx).unwrap();

        let recid = expected.v - 35 - 2;
        let (raw, hash) = encode_signed(&tx, expected.r, expected.s, recid).unwrap();
        assert_eq!(raw, format!("0x{}", hex::encode(tx.rlp_signed(&expected))));
        assert_eq!(hash.len(), 66);
    }

    #[test]
    fn test_legacy_v_rejects_oversized_chain_id() {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(Address::zero())
            .nonce(0)
            .gas(21_000)
            .gas_price(1)
            .chain_id(u64::MAX)
            .into();
        let err = encode_signed(&tx, U256::one(), U256::one(), 1).unwrap_err();
        assert_eq!(err.code(), "TX_INVALID_PARAMS");

        let typed: TypedTransaction = Eip1559TransactionRequest::new()
            .to(Address::zero())
            .chain_id(u64::MAX)
            .into();
        assert!(encode_signed(&typed, U256::one(), U256::one(), 1).is_ok());
    }

    #[test]
    fn test_typed_data_hash_ignores_domain_entry() {
        let domain = json!({"name": "Ether Mail", "version": "1", "chainId": 1,
            "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"});
        let types = json!({
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "Person": [{"name": "name", "type": "string"}, {"name": "wallet", "type": "address"}],
            "Mail": [
                {"name": "from", "type": "Person"},
                {"name": "to", "type": "Person"},
                {"name": "contents", "type": "string"}
            ]
        });
        let message = json!({
            "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
            "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
            "contents": "Hello, Bob!"
        });

        let explicit = typed_data_hash(&domain, &types, &message, Some("Mail")).unwrap();
        let inferred = typed_data_hash(&domain, &types, &message, None).unwrap();
        assert_eq!(explicit, inferred);
        assert_eq!(
            hex::encode(explicit),
            "be609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
        );
    }

    #[test]
    fn test_personal_message_bytes() {
        assert_eq!(personal_message_bytes("0x6869").unwrap(), b"hi".to_vec());
        assert_eq!(personal_message_bytes("hi").unwrap(), b"hi".to_vec());
    }
}
