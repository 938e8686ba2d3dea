//! 硬件钱包签名模型

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::chain::{NetworkType, UnsignedTransaction};

/// 硬件账户
///
/// `index` 是面向界面的序号（0..n-1 重新编号），
/// 真实的卡槽位保存在 `derivation_path` 的最后一段，签名时必须按路径解析回槽位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareAccount {
    pub index: u32,
    pub chain_type: NetworkType,
    pub address: String,
    pub derivation_path: String,
    pub public_key: Option<String>,
}

/// 消息签名载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageKind", rename_all = "camelCase")]
pub enum MessagePayload {
    /// 已编码为 0x 十六进制字节的个人消息
    Personal { message: String },
    /// EIP-712 结构化数据
    TypedData {
        domain: serde_json::Value,
        types: serde_json::Value,
        message: serde_json::Value,
        primary_type: Option<String>,
    },
}

/// 签名载荷（封闭变体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payloadKind", rename_all = "camelCase")]
pub enum SigningPayload {
    Transaction { unsigned_tx: UnsignedTransaction },
    Message(MessagePayload),
    /// 已计算好的 32 字节摘要
    Raw { digest: String },
}

/// 签名上下文
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub derivation_path: String,
    pub chain_type: NetworkType,
    pub payload: SigningPayload,
    pub cancel: CancellationToken,
}

impl SigningContext {
    pub fn new(derivation_path: impl Into<String>, chain_type: NetworkType, payload: SigningPayload) -> Self {
        Self {
            derivation_path: derivation_path.into(),
            chain_type,
            payload,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 硬件签名结果（封闭变体）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resultType", rename_all = "camelCase")]
pub enum HardwareSignResult {
    RawTransaction {
        raw: String,
        hash: String,
    },
    Signature {
        r: String,
        s: String,
        /// 27 / 28
        v: u64,
        digest: String,
    },
    TypedSignature {
        signature: String,
    },
}
