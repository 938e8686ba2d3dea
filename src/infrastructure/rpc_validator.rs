// RPC响应校验模块 - 防止链上数据污染
//
// 上游节点返回的数量可能是 JSON 数字、十进制字符串或 0x 十六进制字符串，
// 统一在这里转换为非负整数，其余形态一律视为无效响应。

use ethers::types::U256;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// 校验 JSON-RPC 响应包，返回 result 字段
pub fn validate_rpc_response(method: &str, json: Value) -> CoreResult<Value> {
    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64());
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(CoreError::Rpc {
            method: method.to_string(),
            code,
            message,
        });
    }

    if let Some(version) = json.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            return Err(CoreError::invalid_response(
                method,
                format!("unsupported JSON-RPC version: {}", version),
            ));
        }
    }

    match json {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| CoreError::invalid_response(method, "missing result field")),
        _ => Err(CoreError::invalid_response(method, "response is not an object")),
    }
}

/// 转换为非负 256 位整数
pub fn to_u256(value: &Value, method: &str) -> CoreResult<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| CoreError::invalid_response(method, format!("expected non-negative integer, got {}", n))),
        Value::String(s) => parse_numeric_string(s)
            .ok_or_else(|| CoreError::invalid_response(method, format!("unparseable numeric string {:?}", s))),
        other => Err(CoreError::invalid_response(
            method,
            format!("unexpected result type {}", json_type_name(other)),
        )),
    }
}

/// 转换为 u64（高度、nonce 等）
pub fn to_u64(value: &Value, method: &str) -> CoreResult<u64> {
    let big = to_u256(value, method)?;
    if big > U256::from(u64::MAX) {
        return Err(CoreError::invalid_response(method, "value exceeds u64 range"));
    }
    Ok(big.as_u64())
}

fn parse_numeric_string(s: &str) -> Option<U256> {
    let s = s.trim();
    if let Some(body) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        // 最多 32 字节
        if body.is_empty() || body.len() > 64 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        return U256::from_str_radix(body, 16).ok();
    }
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    U256::from_dec_str(s).ok()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 验证交易哈希格式
pub fn validate_tx_hash(tx_hash: &str) -> CoreResult<String> {
    let hash = tx_hash.trim_start_matches("0x");

    // 32 字节 = 64 个十六进制字符
    if hash.len() != 64 {
        return Err(CoreError::invalid_response(
            "eth_sendRawTransaction",
            format!("invalid transaction hash length: expected 64, got {}", hash.len()),
        ));
    }

    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::invalid_response(
            "eth_sendRawTransaction",
            "transaction hash contains non-hex characters",
        ));
    }

    Ok(format!("0x{}", hash.to_lowercase()))
}
