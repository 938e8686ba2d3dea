//! 持久化记录模型
//!
//! 持久层由外部提供，这里只定义本模块读写的字段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    chain::{AssetType, NetworkType},
    transaction_status::TxStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub chain_id: String,
    pub network_type: NetworkType,
    /// Conflux 地址编码使用的 netId，EVM 网络为 0
    pub net_id: u32,
    /// 例如 m/44'/60'/0'/0
    pub hd_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: String,
    pub account_id: String,
    pub network_id: String,
    /// 小写或校验和形式的 0x 地址
    pub hex: String,
    /// Conflux 链上编码地址，EVM 网络与 hex 相同
    pub base32: String,
}

impl AddressRecord {
    /// 该网络上使用的地址形式
    pub fn value(&self, network: &NetworkRecord) -> &str {
        match network.network_type {
            NetworkType::Conflux => &self.base32,
            NetworkType::Ethereum => &self.hex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub vault_id: String,
    /// 硬件账户存真实卡槽位
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultType {
    #[serde(rename = "hd")]
    HierarchicalDeterministic,
    #[serde(rename = "pk")]
    PrivateKey,
    Bsim,
}

impl VaultType {
    /// 硬件钱包类型名，用于在硬件注册表中查找
    pub fn hardware_type(&self) -> Option<&'static str> {
        match self {
            Self::Bsim => Some("bsim"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: String,
    pub vault_type: VaultType,
    pub hardware_device_id: Option<String>,
    pub is_backup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxSource {
    #[serde(rename = "self")]
    SelfSend,
    Dapp,
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub address_id: String,
    pub payload_id: String,
    pub extra_id: String,
    pub hash: String,
    pub status: TxStatus,
    pub raw: Option<String>,
    pub err: Option<String>,
    pub source: TxSource,
    pub method: String,
    pub asset_type: Option<AssetType>,
    pub is_temp_replaced: bool,
    pub send_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayloadRecord {
    pub id: String,
    pub tx_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
    pub nonce: Option<u64>,
    pub chain_id: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub storage_limit: Option<String>,
    pub epoch_height: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxExtraRecord {
    pub id: String,
    pub ok: bool,
    pub simple: bool,
    pub contract_interaction: bool,
    pub token20: bool,
    pub token_nft: bool,
    pub contract_creation: bool,
    pub address: Option<String>,
    pub method: Option<String>,
}

/// 一次发送尝试写入的原子批次
#[derive(Debug, Clone)]
pub struct NewTxBatch {
    pub tx: TxRecord,
    pub payload: TxPayloadRecord,
    pub extra: TxExtraRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignType {
    #[serde(rename = "TX")]
    Transaction,
    #[serde(rename = "STR")]
    PersonalMessage,
    #[serde(rename = "JSON")]
    TypedData,
}

/// 签名审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub address_id: String,
    pub sign_type: SignType,
    pub message: Option<String>,
    /// 签名时的链高度（0x 十六进制）
    pub block_number: String,
    pub tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
