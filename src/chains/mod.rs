//! 链族实现
//!
//! 每个链族一个 [`ChainProvider`] 实现，启动时注册到 [`ChainRegistry`]。

pub mod conflux;
pub mod ethereum;
pub mod evm_tx;
pub mod payload;
pub mod provider;
pub mod registry;

pub use conflux::ConfluxChainProvider;
pub use ethereum::EthereumChainProvider;
pub use payload::{build_transaction_payload, EvmTransactionPayload, TransactionBuildInput};
pub use provider::ChainProvider;
pub use registry::ChainRegistry;
