//! 链提供方接口
//!
//! 每个链族一个实现，启动时构建并注册到 [`super::ChainRegistry`]，之后只读。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{
        ChainRef, ChainTxStatus, FeeEstimate, NetworkType, SignedTransaction, TransactionParams,
        UnsignedTransaction,
    },
    error::CoreResult,
    infrastructure::rpc::JsonRpcClient,
    service::signing::Signer,
};

#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn network_type(&self) -> NetworkType;

    /// 注册时的原始 chainId（比较时忽略大小写）
    fn chain_id(&self) -> &str;

    fn chain_ref(&self) -> ChainRef {
        ChainRef::new(self.network_type(), self.chain_id())
    }

    /// 底层 JSON-RPC 通道
    fn rpc(&self) -> Arc<dyn JsonRpcClient>;

    /// 由 SEC1 公钥推导本链的地址形式
    fn derive_address(&self, public_key: &str) -> CoreResult<String>;

    fn validate_address(&self, address: &str) -> bool;

    /// 转换为 ABI 编码可用的 EIP-55 十六进制地址
    fn prepare_address_for_abi(&self, address: &str) -> CoreResult<String>;

    async fn build_transaction(&self, params: &TransactionParams) -> CoreResult<UnsignedTransaction>;

    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CoreResult<FeeEstimate>;

    async fn sign_transaction(&self, tx: &UnsignedTransaction, signer: &Signer) -> CoreResult<SignedTransaction>;

    /// 广播并返回节点给出的交易哈希
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CoreResult<String>;

    /// 0x 十六进制余额
    async fn get_balance(&self, address: &str) -> CoreResult<String>;

    async fn get_nonce(&self, address: &str) -> CoreResult<u64>;

    async fn get_transaction_status(&self, hash: &str) -> CoreResult<ChainTxStatus>;

    async fn call(&self, to: &str, data: &str) -> CoreResult<String>;

    async fn supports_eip1559(&self) -> CoreResult<bool>;

    async fn sign_message(&self, message: &str, signer: &Signer) -> CoreResult<String>;

    async fn verify_message(&self, message: &str, signature: &str, address: &str) -> CoreResult<bool>;
}
