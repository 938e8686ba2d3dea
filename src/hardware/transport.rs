//! 硬件传输层
//!
//! 安全芯片通过 APDU（Android OMAPI）或 BLE 读卡器访问，两者都只暴露
//! "打开通道 / 发送一条 APDU / 关闭通道" 三个原语，平台原生实现通过 [`ApduTransport`] 注入。

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 宿主平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn default_transport(&self) -> TransportKind {
        match self {
            Self::Android => TransportKind::Apdu,
            Self::Ios => TransportKind::Ble,
        }
    }

    /// 蓝牙配对更慢，iOS 给更长的重试窗口
    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            Self::Android => 30_000,
            Self::Ios => 60_000,
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Apdu,
    Ble,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apdu => "apdu",
            Self::Ble => "ble",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apdu" => Ok(Self::Apdu),
            "ble" => Ok(Self::Ble),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// 传输层错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportErrorCode {
    UnsupportedPlatform,
    ChannelAlreadyOpen,
    ChannelNotOpen,
    ChannelOpenFailed,
    ChannelCloseFailed,
    TransmitFailed,
    InvalidApduPayload,
    SelectAidFailed,
    ScanFailed,
    DeviceNotFound,
    ServiceNotFound,
    CharacteristicNotFound,
    EnableNotificationsFailed,
    WriteFailed,
    ReadTimeout,
    SessionBusy,
}

impl TransportErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            Self::ChannelAlreadyOpen => "CHANNEL_ALREADY_OPEN",
            Self::ChannelNotOpen => "CHANNEL_NOT_OPEN",
            Self::ChannelOpenFailed => "CHANNEL_OPEN_FAILED",
            Self::ChannelCloseFailed => "CHANNEL_CLOSE_FAILED",
            Self::TransmitFailed => "TRANSMIT_FAILED",
            Self::InvalidApduPayload => "INVALID_APDU_PAYLOAD",
            Self::SelectAidFailed => "SELECT_AID_FAILED",
            Self::ScanFailed => "SCAN_FAILED",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::CharacteristicNotFound => "CHARACTERISTIC_NOT_FOUND",
            Self::EnableNotificationsFailed => "ENABLE_NOTIFICATIONS_FAILED",
            Self::WriteFailed => "WRITE_FAILED",
            Self::ReadTimeout => "READ_TIMEOUT",
            Self::SessionBusy => "SESSION_BUSY",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct TransportError {
    pub code: TransportErrorCode,
    pub message: String,
    /// 原生层返回的状态码（可能是卡片状态字）
    pub native_code: Option<String>,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            native_code: None,
        }
    }

    pub fn with_native_code(mut self, native_code: impl Into<String>) -> Self {
        self.native_code = Some(native_code.into());
        self
    }
}

/// 平台原生 APDU 通道
///
/// 实现方负责把十六进制 APDU 发给安全芯片并返回带状态字的十六进制响应。
#[async_trait]
pub trait ApduTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// 打开到指定 AID 的逻辑通道（BLE 会先扫描并连接设备）
    async fn open(&self, aid: &str) -> Result<(), TransportError>;

    async fn transmit(&self, apdu: &str) -> Result<String, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        assert_eq!(Platform::Android.default_transport(), TransportKind::Apdu);
        assert_eq!(Platform::Ios.default_transport(), TransportKind::Ble);
        assert_eq!(Platform::Ios.default_timeout_ms(), 60_000);
        assert_eq!("BLE".parse::<TransportKind>().unwrap(), TransportKind::Ble);
        assert!("nfc".parse::<TransportKind>().is_err());
    }
}
