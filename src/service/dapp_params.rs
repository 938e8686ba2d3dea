//! dApp JSON-RPC 参数解析
//!
//! 外部请求的参数不可信，所有校验失败统一返回 `TX_INVALID_PARAMS`。
//! personal_sign 与 eth_signTypedData_v4 的参数顺序在不同 dApp 中不一致，
//! 这里按前两个参数中唯一的 EVM 地址识别顺序。

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{CoreError, CoreResult},
    utils::{
        address::is_hex_address,
        units::{is_hex_bytes, is_hex_quantity, parse_quantity},
    },
};

/// 2^53 - 1，与 JSON 数字精度上限一致
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// eth_sendTransaction 请求，数量字段保持 0x 十六进制
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmRpcTransactionRequest {
    pub from: String,
    pub to: Option<String>,
    pub data: Option<String>,
    pub value: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: Option<u64>,
    #[serde(rename = "type")]
    pub tx_type: Option<u64>,
}

/// 可签名消息：普通字符串或原始字节
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignableMessage {
    Raw { raw: String },
    Text(String),
}

impl SignableMessage {
    /// 签名用的 0x 十六进制字节
    pub fn to_hex_bytes(&self) -> String {
        match self {
            Self::Raw { raw } => raw.clone(),
            Self::Text(text) => format!("0x{}", hex::encode(text.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignMessageParams {
    pub from: String,
    pub message: SignableMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataV4 {
    pub domain: Value,
    pub types: Value,
    pub message: Value,
    pub primary_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTypedDataParams {
    pub from: String,
    pub typed_data: TypedDataV4,
}

fn invalid(message: &str, reason: impl AsRef<str>) -> CoreError {
    CoreError::InvalidParams(format!("{} {}", message, reason.as_ref()))
}

fn params_array(params: &Value) -> CoreResult<&Vec<Value>> {
    params
        .as_array()
        .ok_or_else(|| invalid("Invalid JSON-RPC params.", "Params must be an array."))
}

fn as_address(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| is_hex_address(s))
}

fn pick_address_and_payload(params: &[Value]) -> CoreResult<(String, &Value)> {
    let [first, second, ..] = params else {
        return Err(invalid("Invalid JSON-RPC params.", "Expected at least 2 parameters."));
    };

    match (as_address(first), as_address(second)) {
        (Some(from), None) => Ok((from.to_string(), second)),
        (None, Some(from)) => Ok((from.to_string(), first)),
        _ => Err(invalid(
            "Invalid JSON-RPC params.",
            "Expected exactly one EVM address among the first two parameters.",
        )),
    }
}

fn to_signable_message(value: &Value) -> CoreResult<SignableMessage> {
    match value {
        Value::String(s) if is_hex_bytes(s) => Ok(SignableMessage::Raw { raw: s.clone() }),
        Value::String(s) => Ok(SignableMessage::Text(s.clone())),
        Value::Object(obj) => match obj.get("raw").and_then(Value::as_str) {
            Some(raw) if is_hex_bytes(raw) => Ok(SignableMessage::Raw { raw: raw.to_string() }),
            _ => Err(invalid(
                "Invalid personal_sign params.",
                "Message must be a string or { raw: 0x... }.",
            )),
        },
        _ => Err(invalid(
            "Invalid personal_sign params.",
            "Message must be a string or { raw: 0x... }.",
        )),
    }
}

fn parse_typed_data(value: &Value) -> CoreResult<TypedDataV4> {
    let parsed;
    let raw = match value {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| invalid("Invalid JSON in typed data params.", e.to_string()))?;
            &parsed
        }
        other => other,
    };

    let Some(raw) = raw.as_object() else {
        return Err(invalid(
            "Invalid typed data params.",
            "Typed data must be an object or JSON string.",
        ));
    };

    let object = |key: &str| raw.get(key).filter(|v| v.is_object()).cloned();
    let (Some(domain), Some(types), Some(message)) = (object("domain"), object("types"), object("message")) else {
        return Err(invalid(
            "Invalid typed data params.",
            "Typed data must include domain/types/message objects.",
        ));
    };

    let primary_type = match raw.get("primaryType") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(invalid(
                "Invalid typed data params.",
                "primaryType must be a string when provided.",
            ))
        }
    };

    Ok(TypedDataV4 {
        domain,
        types,
        message,
        primary_type,
    })
}

pub fn parse_sign_message_parameters(params: &Value) -> CoreResult<SignMessageParams> {
    let list = params_array(params)?;
    let (from, payload) = pick_address_and_payload(list)?;
    Ok(SignMessageParams {
        from,
        message: to_signable_message(payload)?,
    })
}

pub fn parse_sign_typed_data_parameters(params: &Value) -> CoreResult<SignTypedDataParams> {
    let list = params_array(params)?;
    let (from, payload) = pick_address_and_payload(list)?;
    Ok(SignTypedDataParams {
        from,
        typed_data: parse_typed_data(payload)?,
    })
}

const SEND_TX: &str = "Invalid eth_sendTransaction params.";

fn field<'a>(tx: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    tx.get(name).filter(|v| !v.is_null())
}

fn optional_hex_quantity(tx: &Map<String, Value>, name: &str) -> CoreResult<Option<String>> {
    match field(tx, name) {
        None => Ok(None),
        Some(Value::String(s)) if is_hex_quantity(s) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(SEND_TX, format!("{} must be a hex quantity string (0x...).", name))),
    }
}

fn optional_safe_integer(tx: &Map<String, Value>, name: &str) -> CoreResult<Option<u64>> {
    let Some(hex) = optional_hex_quantity(tx, name)? else {
        return Ok(None);
    };
    let value = parse_quantity(&hex)?;
    if value > U256::from(MAX_SAFE_INTEGER) {
        return Err(invalid(SEND_TX, format!("{} exceeds Number.MAX_SAFE_INTEGER.", name)));
    }
    Ok(Some(value.as_u64()))
}

fn optional_hex_bytes(tx: &Map<String, Value>, name: &str) -> CoreResult<Option<String>> {
    match field(tx, name) {
        None => Ok(None),
        Some(Value::String(s)) if is_hex_bytes(s) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(SEND_TX, format!("{} must be a hex data string (0x...).", name))),
    }
}

fn optional_address(tx: &Map<String, Value>, name: &str) -> CoreResult<Option<String>> {
    match field(tx, name) {
        None => Ok(None),
        Some(value) => as_address(value)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| invalid(SEND_TX, format!("{} must be a valid EVM address string.", name))),
    }
}

pub fn parse_evm_rpc_transaction_request(params: &Value) -> CoreResult<EvmRpcTransactionRequest> {
    let list = params_array(params)?;
    let Some(tx) = list.first().and_then(Value::as_object) else {
        return Err(invalid(SEND_TX, "Expected params[0] to be a transaction object."));
    };

    let from = optional_address(tx, "from")?.ok_or_else(|| invalid(SEND_TX, "from is required."))?;

    Ok(EvmRpcTransactionRequest {
        from,
        to: optional_address(tx, "to")?,
        data: optional_hex_bytes(tx, "data")?,
        value: optional_hex_quantity(tx, "value")?,
        gas: optional_hex_quantity(tx, "gas")?,
        gas_price: optional_hex_quantity(tx, "gasPrice")?,
        max_fee_per_gas: optional_hex_quantity(tx, "maxFeePerGas")?,
        max_priority_fee_per_gas: optional_hex_quantity(tx, "maxPriorityFeePerGas")?,
        nonce: optional_safe_integer(tx, "nonce")?,
        tx_type: optional_safe_integer(tx, "type")?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_sign_message_accepts_either_order() {
        let a = parse_sign_message_parameters(&json!(["0x68656c6c6f", ADDR])).unwrap();
        let b = parse_sign_message_parameters(&json!([ADDR, "0x68656c6c6f"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.message,
            SignableMessage::Raw {
                raw: "0x68656c6c6f".into()
            }
        );

        let text = parse_sign_message_parameters(&json!(["hello", ADDR])).unwrap();
        assert_eq!(text.message.to_hex_bytes(), "0x68656c6c6f");
    }

    #[test]
    fn test_sign_message_requires_exactly_one_address() {
        for params in [json!([ADDR, ADDR]), json!(["a", "b"]), json!([ADDR]), json!({"from": ADDR})] {
            let err = parse_sign_message_parameters(&params).unwrap_err();
            assert_eq!(err.code(), "TX_INVALID_PARAMS");
        }
        let err = parse_sign_message_parameters(&json!([ADDR, {"raw": "0x123"}])).unwrap_err();
        assert!(err.to_string().contains("raw"));
    }

    #[test]
    fn test_typed_data_from_string_or_object() {
        let typed = json!({
            "domain": {"name": "Test"},
            "types": {"Mail": [{"name": "contents", "type": "string"}]},
            "primaryType": "Mail",
            "message": {"contents": "hi"},
        });
        let from_obj = parse_sign_typed_data_parameters(&json!([ADDR, typed])).unwrap();
        let from_str = parse_sign_typed_data_parameters(&json!([typed.to_string(), ADDR])).unwrap();
        assert_eq!(from_obj, from_str);
        assert_eq!(from_obj.typed_data.primary_type.as_deref(), Some("Mail"));

        let err = parse_sign_typed_data_parameters(&json!([ADDR, "{not json"])).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));

        let err = parse_sign_typed_data_parameters(&json!([ADDR, {"domain": {}, "types": {}}])).unwrap_err();
        assert!(err.to_string().contains("domain/types/message"));

        let bad_primary = json!({"domain": {}, "types": {}, "message": {}, "primaryType": 7});
        assert!(parse_sign_typed_data_parameters(&json!([ADDR, bad_primary])).is_err());
    }

    #[test]
    fn test_transaction_request_fields() {
        let request = parse_evm_rpc_transaction_request(&json!([{
            "from": ADDR,
            "to": "0x0000000000000000000000000000000000000001",
            "data": "0xdeadbeef",
            "value": "0x2",
            "gas": "0x5208",
            "maxFeePerGas": "0x10",
            "nonce": "0x7",
            "type": "0x2",
            "gasPrice": null,
        }]))
        .unwrap();
        assert_eq!(request.from, ADDR);
        assert_eq!(request.nonce, Some(7));
        assert_eq!(request.tx_type, Some(2));
        assert_eq!(request.gas_price, None);
        assert_eq!(request.data.as_deref(), Some("0xdeadbeef"));
    }

    #[test]
    fn test_transaction_request_rejections() {
        let cases = [
            (json!([]), "params[0]"),
            (json!([{"to": ADDR}]), "from is required"),
            (json!([{"from": "0x123"}]), "from must be a valid EVM address"),
            (json!([{"from": ADDR, "value": "12"}]), "value must be a hex quantity"),
            (json!([{"from": ADDR, "data": "0x123"}]), "data must be a hex data string"),
            (json!([{"from": ADDR, "nonce": "0x20000000000000"}]), "nonce exceeds"),
            (json!([{"from": ADDR, "type": 2}]), "type must be a hex quantity"),
        ];
        for (params, reason) in cases {
            let err = parse_evm_rpc_transaction_request(&params).unwrap_err();
            assert_eq!(err.code(), "TX_INVALID_PARAMS");
            assert!(err.to_string().contains(reason), "{} should contain {}", err, reason);
        }

        // 2^53 - 1 仍然合法
        let ok = parse_evm_rpc_transaction_request(&json!([{"from": ADDR, "nonce": "0x1fffffffffffff"}])).unwrap();
        assert_eq!(ok.nonce, Some(MAX_SAFE_INTEGER));
    }
}
