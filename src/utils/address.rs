//! EVM 地址工具
//!
//! EIP-55 校验和、公钥推导地址、Keccak-256

use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use sha3::{Digest, Keccak256};

use crate::error::{CoreError, CoreResult};

pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}

/// 0x 前缀 + 40 个十六进制字符（不校验大小写）
pub fn is_hex_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(hex_part) => hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// 验证 EVM 地址
/// 全小写或全大写视为未带校验和，混合大小写必须通过 EIP-55 校验
pub fn is_valid_address(address: &str) -> bool {
    if !is_hex_address(address) {
        return false;
    }
    let hex_part = &address[2..];
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return verify_eip55_checksum(address);
    }
    true
}

/// 转换为 EIP-55 校验和地址
/// https://eips.ethereum.org/EIPS/eip-55
pub fn to_checksum_address(address: &str) -> CoreResult<String> {
    if !is_hex_address(address) {
        return Err(CoreError::InvalidParams(format!(
            "Invalid EVM address: {}",
            address
        )));
    }
    let lower = address[2..].to_lowercase();
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

fn verify_eip55_checksum(address: &str) -> bool {
    to_checksum_address(address)
        .map(|expected| expected == address)
        .unwrap_or(false)
}

/// 两个地址是否相同（忽略大小写）
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// 从 SEC1 公钥（压缩 33 字节或非压缩 65 字节）推导 0x 地址（小写）
pub fn address_from_public_key(public_key: &[u8]) -> CoreResult<String> {
    let key = PublicKey::from_sec1_bytes(public_key)
        .map_err(|_| CoreError::InvalidParams("Invalid secp256k1 public key".to_string()))?;
    Ok(address_from_verifying_point(&key))
}

pub(crate) fn address_from_verifying_point(key: &PublicKey) -> String {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// 0x 十六进制公钥转地址
pub fn address_from_public_key_hex(public_key: &str) -> CoreResult<String> {
    let bytes = crate::utils::units::decode_hex(public_key)?;
    address_from_public_key(&bytes)
}
