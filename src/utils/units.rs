//! 数量与十六进制工具

use ethers::types::U256;

use crate::error::{CoreError, CoreResult};

/// 解码 0x 十六进制字符串（前缀可选，长度必须为偶数）
pub fn decode_hex(value: &str) -> CoreResult<Vec<u8>> {
    let trimmed = strip_0x(value.trim());
    if trimmed.len() % 2 != 0 {
        return Err(CoreError::InvalidParams(format!(
            "Hex string must have even length: {}",
            value
        )));
    }
    hex::decode(trimmed)
        .map_err(|_| CoreError::InvalidParams(format!("Invalid hex string: {}", value)))
}

pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// 0x 开头且为偶数长度的十六进制字节串
pub fn is_hex_bytes(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => body.len() % 2 == 0 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// 0x 开头的十六进制数量（至少一位）
pub fn is_hex_quantity(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => !body.is_empty() && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// 十进制金额按精度转换为最小单位
///
/// "1.23" 与 18 位精度得到 1230000000000000000。
/// 小数位超过精度时报错，不做舍入。
pub fn parse_units(amount: &str, decimals: u32) -> CoreResult<U256> {
    let amount = amount.trim();
    let invalid = || CoreError::InvalidParams(format!("Invalid amount: {}", amount));

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(CoreError::InvalidParams(format!(
            "Amount {} has more than {} decimal places",
            amount, decimals
        )));
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(fraction);
    for _ in fraction.len()..decimals as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|_| invalid())
}

/// 解析数量：0x 十六进制或十进制
pub fn parse_quantity(value: &str) -> CoreResult<U256> {
    let value = value.trim();
    let invalid = || CoreError::InvalidParams(format!("Invalid quantity: {}", value));
    if let Some(body) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        if body.is_empty() || body.len() > 64 {
            return Err(invalid());
        }
        return U256::from_str_radix(body, 16).map_err(|_| invalid());
    }
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    U256::from_dec_str(value).map_err(|_| invalid())
}

pub fn parse_optional_quantity(value: Option<&str>) -> CoreResult<Option<U256>> {
    value.map(parse_quantity).transpose()
}

/// 格式化为最短的 0x 十六进制数量
pub fn format_quantity(value: U256) -> String {
    format!("0x{:x}", value)
}

pub fn format_u64(value: u64) -> String {
    format!("0x{:x}", value)
}
