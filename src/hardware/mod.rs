//! 硬件钱包模块
//!
//! 安全芯片（BSIM 卡）的连接、账户枚举与签名协议。
//! 所有卡片调用经单槽位队列串行执行，长操作带截止时间重试与取消。

pub mod accounts;
pub mod bsim;
pub mod card;
pub mod errors;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod signature;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use bsim::{BsimHardwareWallet, BsimOptions};
pub use errors::{
    CardStatus, HardwareError, HardwareErrorCode, HardwareResult, HardwareUnavailableReason,
};
pub use queue::ExclusiveQueue;
pub use registry::HardwareWalletRegistry;
pub use retry::{retry_with_timeout, RetryOptions};
pub use transport::{Platform, TransportKind};

use crate::domain::{HardwareAccount, HardwareSignResult, NetworkType, SigningContext};

/// 连接参数
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// 覆盖平台默认传输方式
    pub transport: Option<TransportKind>,
    /// BLE 设备标识，空白视为未指定
    pub device_identifier: Option<String>,
    pub cancel: CancellationToken,
}

impl ConnectOptions {
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_device(mut self, device_identifier: impl Into<String>) -> Self {
        self.device_identifier = Some(device_identifier.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    pub hardware_type: String,
    pub supported_chains: Vec<NetworkType>,
    pub transports: Vec<TransportKind>,
    pub account_limit: u32,
    pub supports_seed_backup: bool,
}

/// 硬件钱包适配器
#[async_trait]
pub trait HardwareWallet: Send + Sync {
    /// 注册表使用的类型名（如 "bsim"）
    fn hardware_type(&self) -> &str;

    fn hardware_id(&self) -> Option<&str>;

    fn capabilities(&self) -> HardwareCapabilities;

    async fn connect(&self, options: ConnectOptions) -> HardwareResult<()>;

    async fn disconnect(&self) -> HardwareResult<()>;

    async fn is_connected(&self) -> bool;

    async fn list_accounts(&self, chain_type: NetworkType) -> HardwareResult<Vec<HardwareAccount>>;

    /// 按界面序号获取账户，不存在时依次派生
    async fn derive_account(&self, index: u32, chain_type: NetworkType) -> HardwareResult<HardwareAccount>;

    async fn derive_address(&self, path: &str, chain_type: NetworkType) -> HardwareResult<String>;

    async fn sign(&self, context: SigningContext) -> HardwareResult<HardwareSignResult>;
}
