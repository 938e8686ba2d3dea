//! IronSign - 多链交易签名流水线
//!
//! EVM 与 Conflux 交易的构建、估算、签名（软件密钥或 BSIM 安全芯片）、广播与记录。
//! 私钥只在签名瞬间由凭据库提供，硬件签名全程不出卡。

pub mod app_state;
pub mod chains;
pub mod config;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::{AppContext, AppDependencies};
pub use error::{CoreError, CoreResult};

pub mod prelude {
    pub use crate::{
        app_state::{AppContext, AppDependencies},
        chains::{ChainProvider, ChainRegistry},
        domain::{NetworkType, UnsignedTransaction},
        error::{CoreError, CoreResult},
        hardware::{HardwareWallet, HardwareWalletRegistry},
        service::{SendTransactionInput, TransactionService},
    };
}
