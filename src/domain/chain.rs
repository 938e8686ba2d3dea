//! 链族与交易模型
//!
//! 两个链族（EVM / Conflux）共用一套交易生命周期模型，
//! 载荷按链族区分为封闭的枚举变体。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 链族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Ethereum,
    Conflux,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Conflux => "conflux",
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Self::Ethereum)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ethereum" | "evm" | "eth" => Ok(Self::Ethereum),
            "conflux" | "cfx" => Ok(Self::Conflux),
            other => Err(CoreError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// 链标识 (networkType, chainId)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainRef {
    pub network_type: NetworkType,
    pub chain_id: String,
}

impl ChainRef {
    pub fn new(network_type: NetworkType, chain_id: impl Into<String>) -> Self {
        Self {
            network_type,
            chain_id: chain_id.into(),
        }
    }
}

/// 资产类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Native,
    Erc20,
    Erc721,
    Erc1155,
}

/// 构建交易的输入参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionParams {
    pub from: String,
    pub to: String,
    pub chain_id: String,
    pub amount: String,
    pub asset_type: AssetType,
    pub asset_decimals: u32,
    pub contract_address: Option<String>,
    pub nft_token_id: Option<String>,
    pub data: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub storage_limit: Option<String>,
    pub nonce: Option<u64>,
    pub epoch_height: Option<u64>,
}

/// EVM 未签名交易载荷，数量字段均为 0x 十六进制字符串
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTxPayload {
    pub from: String,
    /// 合约创建时为空
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    pub chain_id: String,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: u64,
    /// 0 = legacy, 2 = EIP-1559，未指定时由签名方决定
    pub tx_type: Option<u8>,
}

/// Conflux 未签名交易载荷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfluxTxPayload {
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    pub chain_id: String,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub storage_limit: Option<String>,
    pub nonce: u64,
    pub epoch_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chainType", content = "payload", rename_all = "lowercase")]
pub enum UnsignedTransaction {
    Ethereum(EvmTxPayload),
    Conflux(ConfluxTxPayload),
}

impl UnsignedTransaction {
    pub fn chain_type(&self) -> NetworkType {
        match self {
            Self::Ethereum(_) => NetworkType::Ethereum,
            Self::Conflux(_) => NetworkType::Conflux,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Self::Ethereum(p) => &p.from,
            Self::Conflux(p) => &p.from,
        }
    }

    pub fn to(&self) -> Option<&str> {
        match self {
            Self::Ethereum(p) => p.to.as_deref(),
            Self::Conflux(p) => p.to.as_deref(),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Ethereum(p) => &p.value,
            Self::Conflux(p) => &p.value,
        }
    }

    pub fn data(&self) -> &str {
        match self {
            Self::Ethereum(p) => &p.data,
            Self::Conflux(p) => &p.data,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Self::Ethereum(p) => p.nonce,
            Self::Conflux(p) => p.nonce,
        }
    }
}

/// 手续费定价方式，legacy 与 EIP-1559 互斥
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeePricing {
    Legacy {
        gas_price: String,
    },
    Eip1559 {
        max_fee_per_gas: String,
        max_priority_fee_per_gas: String,
    },
}

/// 手续费估算结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub chain_type: NetworkType,
    pub gas_limit: String,
    pub estimated_total: String,
    pub pricing: FeePricing,
    /// 仅 Conflux
    pub storage_limit: Option<String>,
}

impl FeeEstimate {
    pub fn gas_price(&self) -> Option<&str> {
        match &self.pricing {
            FeePricing::Legacy { gas_price } => Some(gas_price),
            FeePricing::Eip1559 { .. } => None,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<&str> {
        match &self.pricing {
            FeePricing::Eip1559 {
                max_fee_per_gas, ..
            } => Some(max_fee_per_gas),
            FeePricing::Legacy { .. } => None,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<&str> {
        match &self.pricing {
            FeePricing::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => Some(max_priority_fee_per_gas),
            FeePricing::Legacy { .. } => None,
        }
    }
}

/// 已签名交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub chain_type: NetworkType,
    pub raw_transaction: String,
    pub hash: String,
}

/// 链上回执状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainTxStatus {
    Pending,
    Confirmed,
    Failed,
}
