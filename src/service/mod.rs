//! 服务层
//!
//! 链高度、签名方解析、签名审计与交易发送流水线

pub mod chain_status;
pub mod dapp_params;
pub mod signature_record;
pub mod signing;
pub mod transaction;

pub use chain_status::ChainStatusService;
pub use signature_record::{NewSignatureRecord, SignatureFilter, SignatureRecordService};
pub use signing::{
    HardwareSigner, InMemoryKeyStore, KeyStore, Signer, SignerResolver, SigningService, SoftwareSigner,
};
pub use transaction::{
    DappTransactionEstimate, DappTransactionInput, Direction, RecentlyAddress, SendTransactionInput,
    TransactionService, TransactionView,
};
