//! 签名恢复参数
//!
//! 卡片只返回 (r, s)，需要把 s 规范到曲线阶的下半部分（EIP-2），
//! 再尝试两个恢复 id，找出能恢复到账户公钥的那个，得到 v = 27 / 28。

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use super::{
    accounts::normalize_public_key,
    errors::{HardwareError, HardwareErrorCode, HardwareResult},
};
use crate::utils::address::{address_from_public_key, same_address};

/// 恢复出的以太坊签名，r / s 为 64 位大写十六进制（无 0x）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

fn scalar_bytes(value: &str, label: &str) -> HardwareResult<[u8; 32]> {
    let stripped = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if stripped.len() > 64 {
        return Err(HardwareError::new(
            HardwareErrorCode::RecoveryFailed,
            format!("Signature component {} exceeds 32 bytes", label),
        ));
    }
    let padded = format!("{:0>64}", stripped);
    let mut out = [0u8; 32];
    hex::decode_to_slice(&padded, &mut out).map_err(|_| {
        HardwareError::new(
            HardwareErrorCode::RecoveryFailed,
            format!("Signature component {} is not hex", label),
        )
    })?;
    Ok(out)
}

fn parse_signature(r: &str, s: &str) -> HardwareResult<Signature> {
    Signature::from_scalars(scalar_bytes(r, "r")?, scalar_bytes(s, "s")?).map_err(|_| {
        HardwareError::new(
            HardwareErrorCode::RecoveryFailed,
            "Invalid ECDSA signature returned by BSIM.",
        )
    })
}

/// 规范化 s，返回大写十六进制（无 0x）
pub fn canonicalize_s(r: &str, s: &str) -> HardwareResult<String> {
    let signature = parse_signature(r, s)?;
    let normalized = signature.normalize_s().unwrap_or(signature);
    Ok(hex::encode_upper(normalized.s().to_bytes()))
}

/// 求解恢复参数
///
/// 先比较恢复出的非压缩公钥，再退回到地址比较；两者都不匹配时返回 RECOVERY_FAILED。
pub fn resolve_recovery_param(
    digest: &[u8],
    r: &str,
    s: &str,
    expected_public_key: &str,
    expected_address: Option<&str>,
) -> HardwareResult<RecoveredSignature> {
    let signature = parse_signature(r, s)?;
    let signature = signature.normalize_s().unwrap_or(signature);
    let target = normalize_public_key(expected_public_key)?;

    for candidate in 0u8..=1 {
        let Some(recovery_id) = RecoveryId::from_byte(candidate) else {
            continue;
        };
        let Ok(recovered) = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id) else {
            continue;
        };
        let point = recovered.to_encoded_point(false);
        let recovered_hex = format!("0x{}", hex::encode(point.as_bytes()));

        let matches_key = recovered_hex == target;
        let matches_address = expected_address
            .zip(address_from_public_key(point.as_bytes()).ok())
            .map(|(expected, actual)| same_address(expected, &actual))
            .unwrap_or(false);

        if matches_key || matches_address {
            return Ok(RecoveredSignature {
                r: hex::encode_upper(signature.r().to_bytes()),
                s: hex::encode_upper(signature.s().to_bytes()),
                v: 27 + candidate as u64,
            });
        }
    }

    Err(HardwareError::new(
        HardwareErrorCode::RecoveryFailed,
        "Failed to derive recovery parameter from BSIM signature.",
    ))
}
