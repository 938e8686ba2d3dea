//! 核心错误类型
//!
//! 每个错误都带有稳定的错误码，调用方按错误码分支，而不是解析错误文本。
//! 流水线阶段错误（构建/估算/签名/广播/保存）包装底层错误，不丢弃原因。

use thiserror::Error;

use crate::{domain::NetworkType, hardware::HardwareError};

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// 发送流水线的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Build,
    Estimate,
    Sign,
    Broadcast,
    Save,
}

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ━━━━━━━━━━ 注册表错误 ━━━━━━━━━━
    #[error("Chain already registered: {network_type} ({chain_id})")]
    DuplicateChain {
        network_type: NetworkType,
        chain_id: String,
    },

    #[error("Multiple providers found for chainId {chain_id} ({candidates:?}); specify a network type")]
    AmbiguousChain {
        chain_id: String,
        candidates: Vec<NetworkType>,
    },

    #[error("Adapter already registered for type {hardware_type} (hardwareId={hardware_id})")]
    DuplicateHardwareAdapter {
        hardware_type: String,
        hardware_id: String,
    },

    #[error("Chain provider not found for chain {chain_id} ({network_type:?})")]
    ChainProviderNotFound {
        chain_id: String,
        network_type: Option<NetworkType>,
    },

    // ━━━━━━━━━━ RPC 错误 ━━━━━━━━━━
    #[error("Invalid JSON-RPC result for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("JSON-RPC {method} failed: {message}")]
    Rpc {
        method: String,
        code: Option<i64>,
        message: String,
    },

    // ━━━━━━━━━━ 校验错误 ━━━━━━━━━━
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    // ━━━━━━━━━━ 流水线阶段错误 ━━━━━━━━━━
    #[error("Failed to build transaction: {source}")]
    BuildFailed { source: Box<CoreError> },

    #[error("Failed to estimate transaction fee: {source}")]
    EstimateFailed { source: Box<CoreError> },

    #[error("Failed to sign transaction: {source}")]
    SignFailed { source: Box<CoreError> },

    #[error("Failed to broadcast transaction: {source}")]
    BroadcastFailed { source: Box<CoreError> },

    #[error("Failed to save transaction: {source}")]
    SaveFailed { source: Box<CoreError> },
}

impl CoreError {
    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateChain { .. } => "CHAIN_DUPLICATE",
            Self::AmbiguousChain { .. } => "CHAIN_AMBIGUOUS",
            Self::DuplicateHardwareAdapter { .. } => "HARDWARE_ADAPTER_DUPLICATE",
            Self::ChainProviderNotFound { .. } => "CHAIN_PROVIDER_NOT_FOUND",
            Self::InvalidResponse { .. } => "CHAIN_RPC_INVALID_RESPONSE",
            Self::Rpc { .. } => "CHAIN_RPC_ERROR",
            Self::InvalidParams(_) => "TX_INVALID_PARAMS",
            Self::AddressMismatch { .. } => "TX_ADDRESS_MISMATCH",
            Self::UnsupportedNetwork(_) => "TX_UNSUPPORTED_NETWORK",
            Self::Unsupported(_) => "UNSUPPORTED_OPERATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Signing(_) => "SIGNING_ERROR",
            Self::Hardware(err) => err.code.as_str(),
            Self::BuildFailed { .. } => "TX_BUILD_FAILED",
            Self::EstimateFailed { .. } => "TX_ESTIMATE_FAILED",
            Self::SignFailed { .. } => "TX_SIGN_FAILED",
            Self::BroadcastFailed { .. } => "TX_BROADCAST_FAILED",
            Self::SaveFailed { .. } => "TX_SAVE_FAILED",
        }
    }

    /// 是否已经是阶段错误或外部请求校验错误（不应再次包装）
    pub fn is_stage_typed(&self) -> bool {
        matches!(
            self,
            Self::BuildFailed { .. }
                | Self::EstimateFailed { .. }
                | Self::SignFailed { .. }
                | Self::BroadcastFailed { .. }
                | Self::SaveFailed { .. }
                | Self::InvalidParams(_)
                | Self::AddressMismatch { .. }
                | Self::UnsupportedNetwork(_)
        )
    }

    /// 用阶段错误码包装，已带类型的错误原样返回
    pub fn into_stage(self, stage: PipelineStage) -> Self {
        if self.is_stage_typed() {
            return self;
        }
        let source = Box::new(self);
        match stage {
            PipelineStage::Build => Self::BuildFailed { source },
            PipelineStage::Estimate => Self::EstimateFailed { source },
            PipelineStage::Sign => Self::SignFailed { source },
            PipelineStage::Broadcast => Self::BroadcastFailed { source },
            PipelineStage::Save => Self::SaveFailed { source },
        }
    }

    /// 去掉阶段包装后的根错误
    pub fn root(&self) -> &CoreError {
        match self {
            Self::BuildFailed { source }
            | Self::EstimateFailed { source }
            | Self::SignFailed { source }
            | Self::BroadcastFailed { source }
            | Self::SaveFailed { source } => source.root(),
            other => other,
        }
    }

    /// 用户主动取消（不视为失败）
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Hardware(err) if err.is_cancelled())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_response(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
