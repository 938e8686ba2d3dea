//! Conflux 链上地址编码 (CIP-37)
//!
//! 格式：`<prefix>:[type.<kind>:]<base32 payload + 8 位校验>`
//! - prefix：1029 → `cfx`，1 → `cfxtest`，其他 → `net<id>`
//! - payload：版本字节 0x00 + 20 字节地址，按 5 bit 分组
//! - 校验：40 bit polymod（与 cashaddr 相同的生成多项式）

use crate::error::{CoreError, CoreResult};

const CHARSET: &[u8; 32] = b"abcdefghjkmnprstuvwxyz0123456789";
const MAINNET_NET_ID: u32 = 1029;
const TESTNET_NET_ID: u32 = 1;
const VERSION_BYTE: u8 = 0x00;
const CHECKSUM_LEN: usize = 8;

/// 地址类型，由首字节高 4 位决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfluxAddressType {
    Null,
    Builtin,
    User,
    Contract,
    Unknown,
}

impl ConfluxAddressType {
    fn from_bytes(bytes: &[u8; 20]) -> Self {
        if bytes.iter().all(|b| *b == 0) {
            return Self::Null;
        }
        match bytes[0] & 0xf0 {
            0x00 => Self::Builtin,
            0x10 => Self::User,
            0x80 => Self::Contract,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Builtin => "builtin",
            Self::User => "user",
            Self::Contract => "contract",
            Self::Unknown => "unknown",
        }
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub bytes: [u8; 20],
    pub net_id: u32,
    pub address_type: ConfluxAddressType,
}

impl DecodedAddress {
    /// 小写 0x 十六进制
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.bytes))
    }
}

fn prefix_for(net_id: u32) -> String {
    match net_id {
        MAINNET_NET_ID => "cfx".to_string(),
        TESTNET_NET_ID => "cfxtest".to_string(),
        other => format!("net{}", other),
    }
}

fn net_id_for(prefix: &str) -> Option<u32> {
    match prefix {
        "cfx" => Some(MAINNET_NET_ID),
        "cfxtest" => Some(TESTNET_NET_ID),
        _ => {
            let id: u32 = prefix.strip_prefix("net")?.parse().ok()?;
            // 主网和测试网必须使用专用前缀
            if id == MAINNET_NET_ID || id == TESTNET_NET_ID || id == 0 {
                None
            } else {
                Some(id)
            }
        }
    }
}

fn polymod(values: impl IntoIterator<Item = u8>) -> u64 {
    let mut c: u64 = 1;
    for d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(d);
        if c0 & 0x01 != 0 {
            c ^= 0x98_f2bc_8e61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_b76d_99e2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xf3_3e5f_b3c4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xae_2eab_e2a8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1e_4f43_e470;
        }
    }
    c ^ 1
}

fn checksum_input<'a>(prefix: &'a str, payload: &'a [u8]) -> impl Iterator<Item = u8> + 'a {
    prefix
        .bytes()
        .map(|b| b & 0x1f)
        .chain(std::iter::once(0))
        .chain(payload.iter().copied())
}

/// 8 bit 与 5 bit 分组互转
fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max = (1u32 << to) - 1;
    let max_acc = (1u32 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
    for value in data {
        let v = u32::from(*value);
        if v >> from != 0 {
            return None;
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }
    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
        return None;
    }
    Some(out)
}

fn parse_hex20(hex_address: &str) -> CoreResult<[u8; 20]> {
    let body = hex_address
        .strip_prefix("0x")
        .or_else(|| hex_address.strip_prefix("0X"))
        .unwrap_or(hex_address);
    let bytes = hex::decode(body)
        .map_err(|_| CoreError::InvalidParams(format!("Invalid hex address: {}", hex_address)))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::InvalidParams(format!("Hex address must be 20 bytes: {}", hex_address)))
}

/// 编码为链上地址
pub fn encode(hex_address: &str, net_id: u32) -> CoreResult<String> {
    encode_with_options(hex_address, net_id, false)
}

/// 编码为链上地址，`verbose` 时输出大写并带 `type.` 段
pub fn encode_with_options(hex_address: &str, net_id: u32, verbose: bool) -> CoreResult<String> {
    if net_id == 0 {
        return Err(CoreError::InvalidParams("netId must be positive".to_string()));
    }
    let bytes = parse_hex20(hex_address)?;
    let prefix = prefix_for(net_id);

    let mut raw = Vec::with_capacity(21);
    raw.push(VERSION_BYTE);
    raw.extend_from_slice(&bytes);
    let payload = convert_bits(&raw, 8, 5, true)
        .ok_or_else(|| CoreError::InvalidParams("Failed to convert address bits".to_string()))?;

    let checksum = polymod(checksum_input(&prefix, &payload).chain([0u8; CHECKSUM_LEN]));

    let mut body = String::with_capacity(payload.len() + CHECKSUM_LEN);
    for v in &payload {
        body.push(CHARSET[*v as usize] as char);
    }
    for i in 0..CHECKSUM_LEN {
        let v = ((checksum >> (5 * (CHECKSUM_LEN - 1 - i))) & 0x1f) as usize;
        body.push(CHARSET[v] as char);
    }

    if verbose {
        let address_type = ConfluxAddressType::from_bytes(&bytes);
        Ok(format!("{}:TYPE.{}:{}", prefix, address_type.as_str(), body).to_uppercase())
    } else {
        Ok(format!("{}:{}", prefix, body))
    }
}

/// 解码链上地址
pub fn decode(address: &str) -> CoreResult<DecodedAddress> {
    let invalid = |reason: &str| CoreError::InvalidParams(format!("Invalid Conflux address {}: {}", address, reason));

    // 只允许全大写或全小写
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(invalid("mixed case"));
    }
    let lowered = address.to_lowercase();
    let parts: Vec<&str> = lowered.split(':').collect();
    let (prefix, type_part, body) = match parts.as_slice() {
        [prefix, body] => (*prefix, None, *body),
        [prefix, type_part, body] => (*prefix, Some(*type_part), *body),
        _ => return Err(invalid("unexpected separator count")),
    };

    let net_id = net_id_for(prefix).ok_or_else(|| invalid("unknown prefix"))?;

    let mut values = Vec::with_capacity(body.len());
    for ch in body.bytes() {
        let index = CHARSET
            .iter()
            .position(|c| *c == ch)
            .ok_or_else(|| invalid("invalid base32 character"))?;
        values.push(index as u8);
    }
    if values.len() != 42 {
        return Err(invalid("unexpected payload length"));
    }
    if polymod(checksum_input(prefix, &values)) != 0 {
        return Err(invalid("checksum mismatch"));
    }

    let payload = &values[..values.len() - CHECKSUM_LEN];
    let raw = convert_bits(payload, 5, 8, false).ok_or_else(|| invalid("invalid padding"))?;
    if raw.len() != 21 || raw[0] != VERSION_BYTE {
        return Err(invalid("unsupported version byte"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&raw[1..]);
    let address_type = ConfluxAddressType::from_bytes(&bytes);

    if let Some(type_part) = type_part {
        let expected = format!("type.{}", address_type.as_str());
        if type_part != expected {
            return Err(invalid("address type mismatch"));
        }
    }

    Ok(DecodedAddress {
        bytes,
        net_id,
        address_type,
    })
}

pub fn is_valid(address: &str) -> bool {
    decode(address).is_ok()
}

pub fn hex_to_base32(hex_address: &str, net_id: u32) -> CoreResult<String> {
    encode(hex_address, net_id)
}

pub fn base32_to_hex(address: &str) -> CoreResult<String> {
    Ok(decode(address)?.hex())
}

/// 普通账户地址：首个半字节固定为 1
pub fn to_account_address(hex_address: &str) -> CoreResult<String> {
    let bytes = parse_hex20(hex_address)?;
    let mut out = bytes;
    out[0] = (out[0] & 0x0f) | 0x10;
    Ok(format!("0x{}", hex::encode(out)))
}
