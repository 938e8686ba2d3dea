//! 硬件钱包错误
//!
//! 所有传输层与卡片错误在适配器边界统一归一化为 [`HardwareError`]，
//! 调用方只按 [`HardwareErrorCode`] 分支，不解析错误文本。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::{
    card::CardError,
    transport::{Platform, TransportError, TransportErrorCode},
};

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// 卡片返回的已知状态字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardStatus {
    /// A000：未知错误（PIN 已验证时也会返回）
    Unknown,
    InsNotSupported,
    ClaNotSupported,
    WrongLength,
    IncorrectData,
    NotEnoughMemory,
    IncorrectP1P2,
    WrongBpin,
    NotCertified,
    Locked,
    InvalidReference,
    ConditionsNotSatisfied,
    AuthenticationFailed,
    /// 63C1..63CA，剩余尝试次数
    AttemptsRemaining(u8),
}

impl CardStatus {
    /// 按状态字查找，未知状态字返回 None
    pub fn from_code(code: &str) -> Option<Self> {
        let upper = code.trim().to_uppercase();
        let status = match upper.as_str() {
            "A000" => Self::Unknown,
            "6D00" => Self::InsNotSupported,
            "6E00" => Self::ClaNotSupported,
            "6700" => Self::WrongLength,
            "6A80" => Self::IncorrectData,
            "6A84" => Self::NotEnoughMemory,
            "6A86" => Self::IncorrectP1P2,
            "6A88" => Self::WrongBpin,
            "6982" => Self::NotCertified,
            "6983" => Self::Locked,
            "6984" => Self::InvalidReference,
            "6985" => Self::ConditionsNotSatisfied,
            "6300" => Self::AuthenticationFailed,
            other => {
                let rest = other.strip_prefix("63C")?;
                let attempts = u8::from_str_radix(rest, 16).ok()?;
                if !(1..=10).contains(&attempts) {
                    return None;
                }
                Self::AttemptsRemaining(attempts)
            }
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "A000",
            Self::InsNotSupported => "6D00",
            Self::ClaNotSupported => "6E00",
            Self::WrongLength => "6700",
            Self::IncorrectData => "6A80",
            Self::NotEnoughMemory => "6A84",
            Self::IncorrectP1P2 => "6A86",
            Self::WrongBpin => "6A88",
            Self::NotCertified => "6982",
            Self::Locked => "6983",
            Self::InvalidReference => "6984",
            Self::ConditionsNotSatisfied => "6985",
            Self::AuthenticationFailed => "6300",
            Self::AttemptsRemaining(n) => match n {
                1 => "63C1",
                2 => "63C2",
                3 => "63C3",
                4 => "63C4",
                5 => "63C5",
                6 => "63C6",
                7 => "63C7",
                8 => "63C8",
                9 => "63C9",
                _ => "63CA",
            },
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unknown => "Unknown error".to_string(),
            Self::WrongBpin => {
                "Wrong BPIN, unable to complete authentication. Error code: 6A88".to_string()
            }
            Self::NotCertified => {
                "BSIM has not yet completed certification. Error code: 6982".to_string()
            }
            Self::Locked => "BSIM card is locked. Error code: 6983".to_string(),
            Self::ConditionsNotSatisfied => "BSIM error. Error code: 6985".to_string(),
            Self::AuthenticationFailed => "Authentication failed.".to_string(),
            Self::AttemptsRemaining(1) => "Authentication failed, 1 attempt remaining.".to_string(),
            Self::AttemptsRemaining(n) => {
                format!("Authentication failed, {} attempts remaining.", n)
            }
            other => format!("Failed to call BSIM. Error code: {}", other.as_str()),
        }
    }
}

/// 硬件不可用的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareUnavailableReason {
    CardMissing,
    BleDeviceNotFound,
    BluetoothDisabled,
    PermissionDenied,
}

impl HardwareUnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardMissing => "card_missing",
            Self::BleDeviceNotFound => "ble_device_not_found",
            Self::BluetoothDisabled => "bluetooth_disabled",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareErrorCode {
    Cancel,
    Card(CardStatus),
    HardwareUnavailable,
    Transport(TransportErrorCode),
    RecoveryFailed,
    MissingPubkey,
    MissingPath,
    InvalidPath,
    AccountLimit,
    AccountNotFound,
    UnsupportedPayload,
    ChainUnsupported,
    NotConnected,
    InvalidHexFormat,
    Timeout,
    Unknown,
}

impl HardwareErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "CANCEL",
            Self::Card(status) => status.as_str(),
            Self::HardwareUnavailable => "HARDWARE_UNAVAILABLE",
            Self::Transport(code) => code.as_str(),
            Self::RecoveryFailed => "RECOVERY_FAILED",
            Self::MissingPubkey => "MISSING_PUBKEY",
            Self::MissingPath => "MISSING_PATH",
            Self::InvalidPath => "INVALID_PATH",
            Self::AccountLimit => "ACCOUNT_LIMIT",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::UnsupportedPayload => "UNSUPPORTED_PAYLOAD",
            Self::ChainUnsupported => "CHAIN_UNSUPPORTED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidHexFormat => "INVALID_HEX_FORMAT",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HardwareErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HardwareError {
    pub code: HardwareErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl HardwareError {
    pub fn new(code: HardwareErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(HardwareErrorCode::Cancel, "User cancelled the BSIM operation.")
    }

    pub fn not_connected() -> Self {
        Self::new(
            HardwareErrorCode::NotConnected,
            "BSIM wallet has not been connected.",
        )
    }

    pub fn unavailable(reason: HardwareUnavailableReason) -> Self {
        Self::new(
            HardwareErrorCode::HardwareUnavailable,
            "BSIM hardware is unavailable.",
        )
        .with_details(json!({ "reason": reason.as_str() }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == HardwareErrorCode::Cancel
    }

    pub fn card_status(&self) -> Option<CardStatus> {
        match self.code {
            HardwareErrorCode::Card(status) => Some(status),
            _ => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<HardwareUnavailableReason> {
        if self.code != HardwareErrorCode::HardwareUnavailable {
            return None;
        }
        let reason = self.details.as_ref()?.get("reason")?.clone();
        serde_json::from_value(reason).ok()
    }
}

/// 从传输错误中解析卡片状态字：优先原生状态码，其次消息中的 4 位十六进制状态
fn resolve_card_status(error: &TransportError) -> Option<CardStatus> {
    if let Some(status) = error.native_code.as_deref().and_then(CardStatus::from_code) {
        return Some(status);
    }
    error
        .message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 4 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .find_map(CardStatus::from_code)
}

fn resolve_unavailable_reason(
    error: &TransportError,
    platform: Platform,
) -> Option<HardwareUnavailableReason> {
    use TransportErrorCode::*;

    match platform {
        Platform::Android => match error.code {
            ChannelOpenFailed | ChannelNotOpen | DeviceNotFound => {
                Some(HardwareUnavailableReason::CardMissing)
            }
            _ => None,
        },
        Platform::Ios => match error.code {
            ScanFailed => {
                let lower = error.message.to_lowercase();
                if lower.contains("permission") {
                    Some(HardwareUnavailableReason::PermissionDenied)
                } else if lower.contains("bluetooth") || lower.contains("power on") {
                    Some(HardwareUnavailableReason::BluetoothDisabled)
                } else {
                    Some(HardwareUnavailableReason::BleDeviceNotFound)
                }
            }
            CharacteristicNotFound | ReadTimeout | ChannelNotOpen => {
                Some(HardwareUnavailableReason::BleDeviceNotFound)
            }
            _ => None,
        },
    }
}

/// 把传输层错误归一化为硬件错误
pub fn normalize_transport_error(error: &TransportError, platform: Platform) -> HardwareError {
    if let Some(status) = resolve_card_status(error) {
        return HardwareError::new(HardwareErrorCode::Card(status), status.message());
    }
    if let Some(reason) = resolve_unavailable_reason(error, platform) {
        return HardwareError::unavailable(reason);
    }
    let mut normalized = HardwareError::new(
        HardwareErrorCode::Transport(error.code),
        error.message.clone(),
    );
    if let Some(native) = &error.native_code {
        normalized = normalized.with_details(json!({ "nativeCode": native }));
    }
    normalized
}

/// 把卡片层错误归一化为硬件错误
pub fn normalize_card_error(error: &CardError, platform: Platform) -> HardwareError {
    match error {
        CardError::Transport(err) => normalize_transport_error(err, platform),
        CardError::Status { code, message } => match CardStatus::from_code(code) {
            Some(status) => HardwareError::new(HardwareErrorCode::Card(status), status.message()),
            None => HardwareError::new(HardwareErrorCode::Unknown, message.clone())
                .with_details(json!({ "status": code })),
        },
        CardError::Protocol(message) => HardwareError::new(HardwareErrorCode::Unknown, message.clone()),
    }
}
