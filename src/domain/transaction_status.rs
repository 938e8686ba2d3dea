//! 交易状态定义
//!
//! 发送流水线只写入 PENDING / SEND_FAILED，其余状态由外部交易跟踪器推进。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 持久化交易状态
/// EXECUTED 不代表执行成功，需要结合回执判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// 已被最终替换
    Replaced,
    /// 临时被替换，之后可能变为 REPLACED 或 EXECUTED
    TempReplaced,
    /// 首次发送失败，活动列表中隐藏
    SendFailed,
    /// 已发送，但 nonce 在未来
    Waitting,
    /// 被交易池丢弃，重新找到前保持
    Discarded,
    /// 已发送或在交易池中，尚未执行
    Pending,
    /// 已执行未确认
    Executed,
    /// 已确认，等待最终确认
    Confirmed,
    /// 最终确认
    Finalized,
}

/// 面向调用方的粗粒度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pending,
    Confirmed,
    Failed,
}

/// 列表查询的状态分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatusBucket {
    Pending,
    Finished,
    #[default]
    All,
}

impl TxStatus {
    pub const ALL: [TxStatus; 9] = [
        TxStatus::Replaced,
        TxStatus::TempReplaced,
        TxStatus::SendFailed,
        TxStatus::Waitting,
        TxStatus::Discarded,
        TxStatus::Pending,
        TxStatus::Executed,
        TxStatus::Confirmed,
        TxStatus::Finalized,
    ];

    pub const PENDING: [TxStatus; 3] = [TxStatus::Waitting, TxStatus::Discarded, TxStatus::Pending];

    pub const FINISHED_IN_ACTIVITY: [TxStatus; 5] = [
        TxStatus::Replaced,
        TxStatus::TempReplaced,
        TxStatus::Executed,
        TxStatus::Confirmed,
        TxStatus::Finalized,
    ];

    pub const FAILED: [TxStatus; 3] = [
        TxStatus::Replaced,
        TxStatus::TempReplaced,
        TxStatus::SendFailed,
    ];

    /// 是否为最终状态（不再被跟踪器推进）
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Replaced | Self::SendFailed | Self::Finalized)
    }

    /// 映射为粗粒度状态
    pub fn activity_status(&self) -> ActivityStatus {
        match self {
            Self::Executed | Self::Confirmed | Self::Finalized => ActivityStatus::Confirmed,
            Self::Replaced | Self::TempReplaced | Self::SendFailed => ActivityStatus::Failed,
            Self::Waitting | Self::Discarded | Self::Pending => ActivityStatus::Pending,
        }
    }

    /// 转换为数据库字符串
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Replaced => "REPLACED",
            Self::TempReplaced => "TEMP_REPLACED",
            Self::SendFailed => "SEND_FAILED",
            Self::Waitting => "WAITTING",
            Self::Discarded => "DISCARDED",
            Self::Pending => "PENDING",
            Self::Executed => "EXECUTED",
            Self::Confirmed => "CONFIRMED",
            Self::Finalized => "FINALIZED",
        }
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_db_string().eq_ignore_ascii_case(s.trim()))
    }
}

impl TxStatusBucket {
    /// 判断状态是否落在该分组内
    /// `All` 包含除 SEND_FAILED 以外的全部状态
    pub fn matches(&self, status: TxStatus) -> bool {
        match self {
            Self::Pending => TxStatus::PENDING.contains(&status),
            Self::Finished => TxStatus::FINISHED_IN_ACTIVITY.contains(&status),
            Self::All => status != TxStatus::SendFailed,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_string_roundtrip() {
        for status in TxStatus::ALL {
            assert_eq!(TxStatus::from_db_str(status.to_db_string()), Some(status));
        }
        assert_eq!(TxStatus::from_db_str("send_failed"), Some(TxStatus::SendFailed));
        assert_eq!(TxStatus::from_db_str("unknown"), None);
    }

    #[test]
    fn test_buckets() {
        assert!(TxStatusBucket::Pending.matches(TxStatus::Discarded));
        assert!(!TxStatusBucket::Pending.matches(TxStatus::Executed));
        assert!(TxStatusBucket::Finished.matches(TxStatus::TempReplaced));
        assert!(!TxStatusBucket::Finished.matches(TxStatus::SendFailed));
        assert!(!TxStatusBucket::All.matches(TxStatus::SendFailed));
        assert!(TxStatusBucket::All.matches(TxStatus::Waitting));
    }

    #[test]
    fn test_activity_mapping() {
        assert_eq!(TxStatus::Finalized.activity_status(), ActivityStatus::Confirmed);
        assert_eq!(TxStatus::SendFailed.activity_status(), ActivityStatus::Failed);
        assert_eq!(TxStatus::Discarded.activity_status(), ActivityStatus::Pending);
        assert!(TxStatus::SendFailed.is_final());
        assert!(!TxStatus::Pending.is_final());
    }
}
