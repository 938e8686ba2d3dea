//! BSIM 账户映射
//!
//! 卡片槽位 0 保留不用；对外按槽位排序后重新编号为 0..n-1，
//! 真实槽位只保存在派生路径 `m/44'/60'/0'/0/{slot}` 的最后一段。

use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey};

use super::{
    card::{PubkeyRecord, EVM_COIN_TYPE},
    errors::{HardwareError, HardwareErrorCode, HardwareResult},
};
use crate::{
    domain::{HardwareAccount, NetworkType},
    utils::address::{address_from_public_key, to_checksum_address},
};

pub const EVM_DERIVATION_PREFIX: &str = "m/44'/60'/0'/0";

pub fn build_derivation_path(slot: u8) -> String {
    format!("{}/{}", EVM_DERIVATION_PREFIX, slot)
}

/// 去掉路径中的全部空白
pub fn trim_derivation_path(path: &str) -> String {
    path.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 解析路径最后一段的十进制槽位
pub fn parse_derivation_path_index(path: &str) -> HardwareResult<u8> {
    let trimmed = trim_derivation_path(path);
    let unsupported = || {
        HardwareError::new(
            HardwareErrorCode::InvalidPath,
            format!("Unsupported derivation path: {}", path),
        )
    };

    let (_, last) = trimmed.rsplit_once('/').ok_or_else(unsupported)?;
    if last.is_empty() || !last.chars().all(|c| c.is_ascii_digit()) {
        return Err(unsupported());
    }
    last.parse::<u8>().map_err(|_| unsupported())
}

/// 只保留 EVM 币种且槽位大于 0 的记录，按槽位升序
pub fn filter_and_sort_records(records: &[PubkeyRecord]) -> Vec<PubkeyRecord> {
    let mut filtered: Vec<PubkeyRecord> = records
        .iter()
        .filter(|r| r.coin_type == EVM_COIN_TYPE && r.index > 0)
        .cloned()
        .collect();
    filtered.sort_by_key(|r| r.index);
    filtered
}

/// 统一为 0x 开头的 65 字节非压缩公钥（小写）
pub fn normalize_public_key(key_hex: &str) -> HardwareResult<String> {
    let invalid = |reason: &str| {
        HardwareError::new(
            HardwareErrorCode::MissingPubkey,
            format!("Invalid BSIM public key: {}", reason),
        )
    };

    let stripped = key_hex
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let bytes = hex::decode(stripped).map_err(|_| invalid("not hex"))?;

    let sec1 = match bytes.len() {
        64 => {
            let mut full = Vec::with_capacity(65);
            full.push(0x04);
            full.extend_from_slice(&bytes);
            full
        }
        33 | 65 => bytes,
        other => return Err(invalid(&format!("unexpected length {}", other))),
    };

    let key = PublicKey::from_sec1_bytes(&sec1).map_err(|_| invalid("not a secp256k1 point"))?;
    Ok(format!("0x{}", hex::encode(key.to_encoded_point(false).as_bytes())))
}

/// 卡片记录转换为对外账户，`index` 是重新编号后的序号
pub fn record_to_account(record: &PubkeyRecord, index: u32) -> HardwareResult<HardwareAccount> {
    let public_key = normalize_public_key(&record.key)?;
    let bytes = crate::utils::units::decode_hex(&public_key)
        .map_err(|e| HardwareError::new(HardwareErrorCode::MissingPubkey, e.to_string()))?;
    let address = address_from_public_key(&bytes)
        .and_then(|addr| to_checksum_address(&addr))
        .map_err(|e| HardwareError::new(HardwareErrorCode::MissingPubkey, e.to_string()))?;

    Ok(HardwareAccount {
        index,
        chain_type: NetworkType::Ethereum,
        address,
        derivation_path: build_derivation_path(record.index),
        public_key: Some(public_key),
    })
}

/// 过滤、排序并重新编号
pub fn records_to_accounts(records: &[PubkeyRecord]) -> HardwareResult<Vec<HardwareAccount>> {
    filter_and_sort_records(records)
        .iter()
        .enumerate()
        .map(|(i, record)| record_to_account(record, i as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;

    fn record_for(secret: [u8; 32], slot: u8, coin_type: u32) -> PubkeyRecord {
        let key = SigningKey::from_bytes(&secret.into()).unwrap();
        let point = key.verifying_key().to_encoded_point(false);
        PubkeyRecord {
            coin_type,
            index: slot,
            alg: 1,
            // 卡片返回不带 04 前缀的 64 字节
            key: hex::encode_upper(&point.as_bytes()[1..]),
        }
    }

    #[test]
    fn test_path_parsing() {
        assert_eq!(build_derivation_path(7), "m/44'/60'/0'/0/7");
        assert_eq!(parse_derivation_path_index(" m/44'/60'/0'/0/ 12 ").unwrap(), 12);

        let err = parse_derivation_path_index("m/44'/60'/0'/0/1'").unwrap_err();
        assert_eq!(err.code, HardwareErrorCode::InvalidPath);
        assert_eq!(err.message, "Unsupported derivation path: m/44'/60'/0'/0/1'");
        assert!(parse_derivation_path_index("7").is_err());
    }

    #[test]
    fn test_records_are_filtered_and_renumbered() {
        let records = vec![
            record_for([3u8; 32], 5, EVM_COIN_TYPE),
            record_for([1u8; 32], 0, EVM_COIN_TYPE),
            record_for([2u8; 32], 2, EVM_COIN_TYPE),
            record_for([4u8; 32], 1, 503),
        ];
        let accounts = records_to_accounts(&records).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].index, 0);
        assert_eq!(accounts[0].derivation_path, "m/44'/60'/0'/0/2");
        assert_eq!(accounts[1].index, 1);
        assert_eq!(accounts[1].derivation_path, "m/44'/60'/0'/0/5");
        assert!(accounts[0].public_key.as_deref().unwrap().starts_with("0x04"));
    }

    #[test]
    fn test_known_key_address() {
        let secret =
            hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80").unwrap();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&secret);
        let account = record_to_account(&record_for(bytes, 1, EVM_COIN_TYPE), 0).unwrap();
        assert_eq!(account.address, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    }

    #[test]
    fn test_compressed_key_is_expanded() {
        let key = SigningKey::from_bytes(&[9u8; 32].into()).unwrap();
        let compressed = hex::encode(key.verifying_key().to_encoded_point(true).as_bytes());
        let normalized = normalize_public_key(&compressed).unwrap();
        assert_eq!(normalized.len(), 2 + 130);
        assert!(normalize_public_key("0x1234").is_err());
    }
}
