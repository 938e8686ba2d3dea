//! 交易载荷构建
//!
//! 按资产类型把 (金额, 地址) 转换为链上调用载荷 `{to, value, data}`。
//! 纯函数，不访问网络。ABI 编码前，所有地址操作数统一转换为 0x 十六进制，
//! Conflux 链上编码地址先解码。

use std::str::FromStr;

use ethers::{
    abi::{encode, Token},
    types::{Address, U256},
};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AssetType, TransactionParams},
    error::{CoreError, CoreResult},
    utils::{
        address::{is_hex_address, keccak256},
        conflux_address,
        units::{format_quantity, parse_quantity, parse_units},
    },
};

/// transfer(address,uint256)
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// transferFrom(address,address,uint256)
pub const ERC721_TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];
/// safeTransferFrom(address,address,uint256,uint256,bytes)
pub const ERC1155_SAFE_TRANSFER_FROM_SELECTOR: [u8; 4] = [0xf2, 0x42, 0x43, 0x2a];

/// 构建输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBuildInput {
    pub asset_type: AssetType,
    pub from: String,
    pub to: String,
    /// 十进制金额，例如 "1.23"
    pub amount: String,
    pub decimals: u32,
    pub contract_address: Option<String>,
    pub nft_token_id: Option<String>,
}

impl From<&TransactionParams> for TransactionBuildInput {
    fn from(params: &TransactionParams) -> Self {
        Self {
            asset_type: params.asset_type,
            from: params.from.clone(),
            to: params.to.clone(),
            amount: params.amount.clone(),
            decimals: params.asset_decimals,
            contract_address: params.contract_address.clone(),
            nft_token_id: params.nft_token_id.clone(),
        }
    }
}

/// 调用载荷；`to` 保持调用方传入的地址形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTransactionPayload {
    pub to: String,
    pub value: String,
    pub data: String,
}

pub fn build_transaction_payload(input: &TransactionBuildInput) -> CoreResult<EvmTransactionPayload> {
    match input.asset_type {
        AssetType::Native => build_native_transfer(input),
        AssetType::Erc20 => build_erc20_transfer(input),
        AssetType::Erc721 => build_erc721_transfer(input),
        AssetType::Erc1155 => build_erc1155_transfer(input),
    }
}

pub fn build_native_transfer(input: &TransactionBuildInput) -> CoreResult<EvmTransactionPayload> {
    let value = parse_units(&input.amount, input.decimals)?;
    Ok(EvmTransactionPayload {
        to: input.to.clone(),
        value: format_quantity(value),
        data: "0x".to_string(),
    })
}

pub fn build_erc20_transfer(input: &TransactionBuildInput) -> CoreResult<EvmTransactionPayload> {
    let contract = require_field(input.contract_address.as_deref(), "contractAddress")?;
    let amount = parse_units(&input.amount, input.decimals)?;
    let data = encode_call(
        ERC20_TRANSFER_SELECTOR,
        &[Token::Address(to_abi_address(&input.to)?), Token::Uint(amount)],
    );
    Ok(EvmTransactionPayload {
        to: contract.to_string(),
        value: "0x0".to_string(),
        data,
    })
}

pub fn build_erc721_transfer(input: &TransactionBuildInput) -> CoreResult<EvmTransactionPayload> {
    let contract = require_field(input.contract_address.as_deref(), "contractAddress")?;
    let token_id = parse_token_id(require_field(input.nft_token_id.as_deref(), "nftTokenId")?)?;
    let data = encode_call(
        ERC721_TRANSFER_FROM_SELECTOR,
        &[
            Token::Address(to_abi_address(&input.from)?),
            Token::Address(to_abi_address(&input.to)?),
            Token::Uint(token_id),
        ],
    );
    Ok(EvmTransactionPayload {
        to: contract.to_string(),
        value: "0x0".to_string(),
        data,
    })
}

pub fn build_erc1155_transfer(input: &TransactionBuildInput) -> CoreResult<EvmTransactionPayload> {
    let contract = require_field(input.contract_address.as_deref(), "contractAddress")?;
    let token_id = parse_token_id(require_field(input.nft_token_id.as_deref(), "nftTokenId")?)?;
    let amount = parse_units(&input.amount, input.decimals)?;
    let data = encode_call(
        ERC1155_SAFE_TRANSFER_FROM_SELECTOR,
        &[
            Token::Address(to_abi_address(&input.from)?),
            Token::Address(to_abi_address(&input.to)?),
            Token::Uint(token_id),
            Token::Uint(amount),
            Token::Bytes(Vec::new()),
        ],
    );
    Ok(EvmTransactionPayload {
        to: contract.to_string(),
        value: "0x0".to_string(),
        data,
    })
}

/// 0x 地址直接解析，其余按 Conflux 链上编码解码
pub fn to_abi_address(address: &str) -> CoreResult<Address> {
    let hex = if is_hex_address(address) {
        address.to_string()
    } else {
        conflux_address::base32_to_hex(address)?
    };
    Address::from_str(&hex)
        .map_err(|_| CoreError::InvalidParams(format!("Invalid address: {}", address)))
}

/// 函数签名的 4 字节选择器
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(selector: [u8; 4], args: &[Token]) -> String {
    let mut out = Vec::with_capacity(4 + 32 * args.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&encode(args));
    format!("0x{}", hex::encode(out))
}

fn require_field<'a>(value: Option<&'a str>, field: &str) -> CoreResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::InvalidParams(format!("Missing required field: {}", field)))
}

fn parse_token_id(token_id: &str) -> CoreResult<U256> {
    parse_quantity(token_id)
}
