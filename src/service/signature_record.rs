//! 签名审计记录
//!
//! 每次签名写一条记录，附带签名时的链高度。高度查询失败时记为 `0x0`，
//! 与交易的关联在广播后补写，失败只记日志。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chain_status::ChainStatusService;
use crate::{
    domain::{ChainRef, SignType, SignatureRecord},
    error::{CoreError, CoreResult},
    repository::WalletRepository,
    utils::units::{format_u64, parse_quantity},
};

/// 列表过滤：已关联交易 / 纯消息签名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureFilter {
    #[default]
    All,
    Transactions,
    Messages,
}

impl SignatureFilter {
    fn matches(&self, record: &SignatureRecord) -> bool {
        match self {
            Self::All => true,
            Self::Transactions => record.tx_id.is_some(),
            Self::Messages => record.tx_id.is_none(),
        }
    }
}

/// 创建签名记录的输入
#[derive(Debug, Clone)]
pub struct NewSignatureRecord {
    pub address_id: String,
    pub sign_type: SignType,
    pub message: Option<String>,
}

pub struct SignatureRecordService {
    repository: Arc<dyn WalletRepository>,
    chain_status: Arc<ChainStatusService>,
}

impl SignatureRecordService {
    pub fn new(repository: Arc<dyn WalletRepository>, chain_status: Arc<ChainStatusService>) -> Self {
        Self {
            repository,
            chain_status,
        }
    }

    /// 写入记录并返回 id；地址不存在时报错，高度查询失败不报错
    pub async fn create_record(&self, input: NewSignatureRecord) -> CoreResult<String> {
        let address = self
            .repository
            .find_address(&input.address_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Address", &input.address_id))?;

        let block_number = self.current_height(&address.network_id).await;

        let record = SignatureRecord {
            id: Uuid::new_v4().to_string(),
            address_id: address.id,
            sign_type: input.sign_type,
            message: input.message,
            block_number,
            tx_id: None,
            created_at: Utc::now(),
        };
        let saved = self.repository.create_signature(record).await?;

        tracing::debug!(
            signature_id = %saved.id,
            address_id = %saved.address_id,
            sign_type = ?saved.sign_type,
            block_number = %saved.block_number,
            "Signature record created"
        );
        Ok(saved.id)
    }

    async fn current_height(&self, network_id: &str) -> String {
        let network = match self.repository.find_network(network_id).await {
            Ok(Some(network)) => network,
            Ok(None) => {
                tracing::warn!(network_id = %network_id, "Network not found, recording zero height");
                return format_u64(0);
            }
            Err(e) => {
                tracing::warn!(network_id = %network_id, error = %e, "Network lookup failed, recording zero height");
                return format_u64(0);
            }
        };

        let chain = ChainRef::new(network.network_type, network.chain_id);
        match self.chain_status.get_chain_height(&chain).await {
            Ok(height) => format_u64(height),
            Err(e) => {
                tracing::warn!(
                    chain_id = %chain.chain_id,
                    network_type = %chain.network_type,
                    error = %e,
                    "Chain height unavailable, recording zero height"
                );
                format_u64(0)
            }
        }
    }

    /// 关联到交易，失败不向上抛
    pub async fn link_tx(&self, signature_id: &str, tx_id: &str) {
        if let Err(e) = self.repository.link_signature_tx(signature_id, tx_id).await {
            tracing::warn!(
                signature_id = %signature_id,
                tx_id = %tx_id,
                error = %e,
                "Failed to link signature record to transaction"
            );
        }
    }

    /// 按创建时间、高度倒序分页
    pub async fn list_records(
        &self,
        address_id: &str,
        filter: SignatureFilter,
        limit: usize,
        offset: usize,
    ) -> CoreResult<Vec<SignatureRecord>> {
        let mut records: Vec<SignatureRecord> = self
            .repository
            .list_signatures_by_address(address_id)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| height_of(b).cmp(&height_of(a)))
        });

        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn count_records(&self, address_id: &str, filter: SignatureFilter) -> CoreResult<usize> {
        Ok(self
            .repository
            .list_signatures_by_address(address_id)
            .await?
            .iter()
            .filter(|r| filter.matches(r))
            .count())
    }
}

fn height_of(record: &SignatureRecord) -> ethers::types::U256 {
    parse_quantity(&record.block_number).unwrap_or_default()
}
