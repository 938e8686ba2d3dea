//! Domain 模块
//!
//! 链族、交易、硬件签名与持久化记录的领域模型

pub mod chain;
pub mod hardware;
pub mod records;
pub mod transaction_status;

// 重新导出常用类型
pub use chain::{
    AssetType, ChainRef, ChainTxStatus, ConfluxTxPayload, EvmTxPayload, FeeEstimate, FeePricing,
    NetworkType, SignedTransaction, TransactionParams, UnsignedTransaction,
};
pub use hardware::{
    HardwareAccount, HardwareSignResult, MessagePayload, SigningContext, SigningPayload,
};
pub use records::{
    AccountRecord, AddressRecord, NetworkRecord, NewTxBatch, SignType, SignatureRecord, TxExtraRecord,
    TxPayloadRecord, TxRecord, TxSource, VaultRecord, VaultType,
};
pub use transaction_status::{ActivityStatus, TxStatus, TxStatusBucket};
