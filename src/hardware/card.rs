//! BSIM 卡片协议
//!
//! APDU 指令构造、响应状态字解析、公钥 TLV 与 DER 签名解码，
//! 以及基于 [`ApduTransport`] 的 [`BsimCard`] 实现。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

use super::transport::{ApduTransport, TransportError, TransportErrorCode, TransportKind};

pub const BSIM_AID: &str = "A000000533C000FF860000000000054D";
pub const ICCID_AID: &str = "A0000001510000";

/// EVM 币种
pub const EVM_COIN_TYPE: u32 = 60;
pub const ALGORITHM_ECDSA_SECP256K1: u8 = 0x01;

const STATUS_SUCCESS: &str = "9000";
const STATUS_PENDING: &str = "6300";
/// 卡片持续返回 6300 时的分段上限
const MAX_PUBKEY_SEGMENTS: usize = 64;
const PUBKEY_TAG: u8 = 0xC2;

#[derive(Debug, Clone, Error)]
pub enum CardError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{message}")]
    Status { code: String, message: String },

    #[error("{0}")]
    Protocol(String),
}

impl CardError {
    fn pending(message: &str) -> Self {
        Self::Status {
            code: STATUS_PENDING.to_string(),
            message: message.to_string(),
        }
    }
}

pub type CardResult<T> = std::result::Result<T, CardError>;

/// 卡片导出的公钥记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyRecord {
    pub coin_type: u32,
    /// 真实卡槽位
    pub index: u8,
    pub alg: u8,
    /// 十六进制公钥（大写，无 0x）
    pub key: String,
}

/// 32 字节 r / s，64 位十六进制（大写，无 0x）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureComponents {
    pub r: String,
    pub s: String,
}

// ━━━━━━━━━━ APDU 指令 ━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    /// 显式 Lc；None 表示省略
    pub lc: Option<u8>,
    pub data: Vec<u8>,
    pub le: Option<u8>,
}

impl ApduCommand {
    fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> CardResult<Self> {
        let lc = u8::try_from(data.len())
            .map_err(|_| CardError::Protocol(format!("APDU data too long: {} bytes", data.len())))?;
        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            lc: Some(lc),
            data,
            le: None,
        })
    }

    /// 序列化为大写十六进制；Lc 必须与数据长度一致
    pub fn serialize(&self) -> CardResult<String> {
        let mut bytes = vec![self.cla, self.ins, self.p1, self.p2];
        match self.lc {
            Some(lc) => {
                if lc as usize != self.data.len() {
                    return Err(CardError::Protocol(format!(
                        "LC {:02X} does not match data length {}",
                        lc,
                        self.data.len()
                    )));
                }
                bytes.push(lc);
                bytes.extend_from_slice(&self.data);
            }
            None if !self.data.is_empty() => {
                return Err(CardError::Protocol(
                    "APDU command contains data but LC is missing".to_string(),
                ));
            }
            None => {}
        }
        if let Some(le) = self.le {
            bytes.push(le);
        }
        Ok(hex::encode_upper(bytes))
    }
}

pub fn build_select_aid(aid: &str) -> CardResult<ApduCommand> {
    let aid = decode_card_hex(aid)?;
    if aid.is_empty() {
        return Err(CardError::Protocol("AID must not be empty".to_string()));
    }
    ApduCommand::with_data(0x00, 0xA4, 0x04, 0x00, aid)
}

pub fn build_verify_bpin() -> ApduCommand {
    empty_with_lc(0x80, 0x7C, 0x00, 0x00)
}

pub fn build_update_bpin() -> ApduCommand {
    empty_with_lc(0x80, 0x7E, 0x00, 0x00)
}

pub fn build_derive_key(coin_type: u32, algorithm: u8) -> CardResult<ApduCommand> {
    let mut data = coin_type.to_be_bytes().to_vec();
    data.push(algorithm);
    ApduCommand::with_data(0x80, 0xA8, 0x00, 0x02, data)
}

pub fn build_sign_message(hash: &[u8], coin_type: u32, index: u8) -> CardResult<ApduCommand> {
    if hash.is_empty() {
        return Err(CardError::Protocol("Message hash must not be empty".to_string()));
    }
    let mut data = coin_type.to_be_bytes().to_vec();
    data.push(index);
    data.extend_from_slice(hash);
    ApduCommand::with_data(0x80, 0xAC, 0x00, 0x00, data)
}

pub fn build_export_pubkey(continue_reading: bool) -> ApduCommand {
    empty_with_lc(0x80, 0xC8, 0x00, if continue_reading { 0x01 } else { 0x00 })
}

pub fn build_get_version() -> ApduCommand {
    ApduCommand {
        cla: 0x00,
        ins: 0xCA,
        p1: 0x00,
        p2: 0x00,
        lc: None,
        data: Vec::new(),
        le: Some(0x02),
    }
}

pub fn build_get_iccid() -> ApduCommand {
    empty_with_lc(0x80, 0xCA, 0x00, 0x11)
}

pub fn build_export_seed(key2: &[u8]) -> CardResult<ApduCommand> {
    ApduCommand::with_data(0x80, 0x74, 0x00, 0x00, key2.to_vec())
}

pub fn build_restore_seed(key2: &[u8], cipher: &[u8]) -> CardResult<ApduCommand> {
    let mut data = key2.to_vec();
    data.extend_from_slice(cipher);
    ApduCommand::with_data(0x80, 0x76, 0x00, 0x00, data)
}

fn empty_with_lc(cla: u8, ins: u8, p1: u8, p2: u8) -> ApduCommand {
    ApduCommand {
        cla,
        ins,
        p1,
        p2,
        lc: Some(0),
        data: Vec::new(),
        le: None,
    }
}

// ━━━━━━━━━━ 响应解析 ━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduResponse {
    Success { payload: String },
    /// 6300：还有后续分段
    Pending { payload: String },
}

impl ApduResponse {
    pub fn payload(&self) -> &str {
        match self {
            Self::Success { payload } | Self::Pending { payload } => payload,
        }
    }
}

/// 解析 `payload || SW1SW2`；9000 与 91xx 视为成功，6300 为待续，其余为卡片错误
pub fn parse_apdu_response(raw: &str) -> CardResult<ApduResponse> {
    let normalized = normalize_card_hex(raw)?;
    if normalized.len() < 4 {
        return Err(CardError::Protocol(format!("APDU response too short: {}", raw)));
    }
    let (payload, status) = normalized.split_at(normalized.len() - 4);
    let payload = payload.to_string();

    if status == STATUS_SUCCESS || status.starts_with("91") {
        return Ok(ApduResponse::Success { payload });
    }
    if status == STATUS_PENDING {
        return Ok(ApduResponse::Pending { payload });
    }

    let message = super::errors::CardStatus::from_code(status)
        .map(|s| s.message())
        .unwrap_or_else(|| format!("APDU error {}", status));
    Err(CardError::Status {
        code: status.to_string(),
        message,
    })
}

// ━━━━━━━━━━ TLV / DER ━━━━━━━━━━

/// 解析一个 C2 公钥 TLV：`coinType(4) || index(1) || alg(1) || [len(1)] || key`
pub fn parse_pubkey_chunk(value: &[u8]) -> CardResult<PubkeyRecord> {
    if value.len() < 6 {
        return Err(CardError::Protocol("Pubkey TLV payload is too short".to_string()));
    }
    let coin_type = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
    let index = value[4];
    let alg = value[5];

    let mut key_start = 6;
    if value.len() > 7 {
        let candidate = value[6] as usize;
        if candidate > 0 && candidate == value.len() - 7 {
            key_start = 7;
        }
    }

    let key = &value[key_start..];
    if key.is_empty() {
        return Err(CardError::Protocol("Invalid pubkey payload length".to_string()));
    }

    Ok(PubkeyRecord {
        coin_type,
        index,
        alg,
        key: hex::encode_upper(key),
    })
}

/// 拆分拼接后的公钥流
pub fn collect_pubkey_records(stream: &[u8]) -> CardResult<Vec<PubkeyRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < stream.len() {
        if stream.len() - offset < 2 {
            return Err(CardError::Protocol("Incomplete TLV chunk in pubkey stream".to_string()));
        }
        let tag = stream[offset];
        if tag != PUBKEY_TAG {
            return Err(CardError::Protocol(format!(
                "Unexpected TLV tag {:02X}, expected C2",
                tag
            )));
        }
        offset += 1;

        let (length, size) = read_ber_length(&stream[offset..])?;
        offset += size;

        let end = offset
            .checked_add(length)
            .filter(|end| *end <= stream.len())
            .ok_or_else(|| CardError::Protocol("Incomplete TLV value".to_string()))?;
        records.push(parse_pubkey_chunk(&stream[offset..end])?);
        offset = end;
    }

    Ok(records)
}

fn read_ber_length(view: &[u8]) -> CardResult<(usize, usize)> {
    let first = *view
        .first()
        .ok_or_else(|| CardError::Protocol("Missing TLV length byte".to_string()))?;
    if first < 0x80 {
        return Ok((first as usize, 1));
    }
    let octets = (first & 0x7f) as usize;
    if octets == 0 || octets > 2 {
        return Err(CardError::Protocol(format!(
            "Unsupported length encoding: {:02X}",
            first
        )));
    }
    if view.len() < 1 + octets {
        return Err(CardError::Protocol("Incomplete TLV extended length".to_string()));
    }
    let length = view[1..=octets]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((length, 1 + octets))
}

/// 从 DER `SEQUENCE { INTEGER r, INTEGER s }` 提取 32 字节 r / s
pub fn extract_signature(der: &[u8]) -> CardResult<SignatureComponents> {
    let mut offset = 0;
    expect_tag(der, offset, 0x30, "sequence")?;
    offset += 1;

    let (seq_len, size) = read_ber_length(&der[offset..])?;
    offset += size;
    if seq_len != der.len() - offset {
        return Err(CardError::Protocol("DER sequence length mismatch".to_string()));
    }

    let (r, next) = read_der_integer(der, offset, "R")?;
    let (s, _) = read_der_integer(der, next, "S")?;

    Ok(SignatureComponents {
        r: normalize_scalar(r)?,
        s: normalize_scalar(s)?,
    })
}

fn expect_tag(bytes: &[u8], offset: usize, expected: u8, label: &str) -> CardResult<()> {
    match bytes.get(offset) {
        Some(actual) if *actual == expected => Ok(()),
        Some(actual) => Err(CardError::Protocol(format!(
            "Unexpected {} tag: 0x{:02x}",
            label, actual
        ))),
        None => Err(CardError::Protocol(format!("Missing {} tag", label))),
    }
}

fn read_der_integer<'a>(der: &'a [u8], offset: usize, label: &str) -> CardResult<(&'a [u8], usize)> {
    expect_tag(der, offset, 0x02, label)?;
    let (len, size) = read_ber_length(&der[offset + 1..])?;
    let start = offset + 1 + size;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= der.len())
        .ok_or_else(|| CardError::Protocol(format!("Truncated {} component", label)))?;
    Ok((&der[start..end], end))
}

fn normalize_scalar(scalar: &[u8]) -> CardResult<String> {
    let first_non_zero = scalar.iter().position(|b| *b != 0).unwrap_or(scalar.len());
    let trimmed = &scalar[first_non_zero..];
    if trimmed.len() > 32 {
        return Err(CardError::Protocol("Scalar component exceeds 32 bytes".to_string()));
    }
    let mut padded = [0u8; 32];
    padded[32 - trimmed.len()..].copy_from_slice(trimmed);
    Ok(hex::encode_upper(padded))
}

fn normalize_card_hex(value: &str) -> CardResult<String> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact)
        .to_string();
    if compact.len() % 2 != 0 {
        return Err(CardError::Protocol(format!(
            "Hex string must have even length: {}",
            value
        )));
    }
    if !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CardError::Protocol(format!(
            "Hex string contains non-hex characters: {}",
            value
        )));
    }
    Ok(compact.to_uppercase())
}

fn decode_card_hex(value: &str) -> CardResult<Vec<u8>> {
    let normalized = normalize_card_hex(value)?;
    hex::decode(&normalized).map_err(|e| CardError::Protocol(e.to_string()))
}

/// ASCII 口令转字节，拒绝非 ASCII 字符
fn ascii_bytes(value: &str) -> CardResult<Vec<u8>> {
    if let Some(pos) = value.chars().position(|c| !c.is_ascii()) {
        return Err(CardError::Protocol(format!(
            "Non-ASCII character detected at position {}",
            pos
        )));
    }
    Ok(value.as_bytes().to_vec())
}

// ━━━━━━━━━━ 卡片接口 ━━━━━━━━━━

/// BSIM 卡片的 SDK 能力面
#[async_trait]
pub trait BsimCard: Send + Sync {
    async fn get_version(&self) -> CardResult<String>;
    async fn get_iccid(&self) -> CardResult<String>;
    async fn verify_bpin(&self) -> CardResult<()>;
    async fn update_bpin(&self) -> CardResult<()>;
    async fn derive_key(&self, coin_type: u32, algorithm: u8) -> CardResult<()>;
    async fn export_pubkeys(&self) -> CardResult<Vec<PubkeyRecord>>;
    async fn sign_message(&self, hash: &[u8], coin_type: u32, index: u8) -> CardResult<SignatureComponents>;
    /// 返回加密后的种子（十六进制）
    async fn export_seed(&self, key2: &str) -> CardResult<String>;
    async fn restore_seed(&self, key2: &str, cipher_hex: &str) -> CardResult<()>;
}

/// 按传输方式与设备创建卡片会话
pub trait CardFactory: Send + Sync {
    fn create(&self, transport: TransportKind, device_identifier: Option<&str>) -> Arc<dyn BsimCard>;
}

struct SessionState {
    open_aid: Option<String>,
    last_used: Option<Instant>,
}

/// 基于原始 APDU 通道的卡片实现
///
/// APDU 通道每次操作都重新打开；BLE 会话在空闲超时前复用。
pub struct ApduCard<T: ApduTransport> {
    transport: T,
    idle_timeout: Duration,
    session: Mutex<SessionState>,
}

impl<T: ApduTransport> ApduCard<T> {
    pub fn new(transport: T, idle_timeout: Duration) -> Self {
        Self {
            transport,
            idle_timeout,
            session: Mutex::new(SessionState {
                open_aid: None,
                last_used: None,
            }),
        }
    }

    /// 独占执行一次卡片操作；已有操作在执行时直接返回 SESSION_BUSY
    async fn run_session<R, F, Fut>(&self, aid: &str, label: &'static str, operation: F) -> CardResult<R>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = CardResult<R>> + Send,
        R: Send,
    {
        let mut state = self.session.try_lock().map_err(|_| {
            TransportError::new(
                TransportErrorCode::SessionBusy,
                "A wallet operation is already in progress",
            )
        })?;

        let reusable = self.transport.kind() == TransportKind::Ble
            && state.open_aid.as_deref() == Some(aid)
            && state
                .last_used
                .map(|t| t.elapsed() < self.idle_timeout)
                .unwrap_or(false);

        if !reusable {
            if state.open_aid.take().is_some() {
                if let Err(e) = self.transport.close().await {
                    tracing::warn!(error = %e, "Failed to close stale BSIM session");
                }
            }
            self.transport.open(aid).await?;
            state.open_aid = Some(aid.to_string());
            tracing::debug!(transport = %self.transport.kind(), "BSIM transport opened");
        }

        tracing::debug!(label = label, transport = %self.transport.kind(), "BSIM operation start");
        let result = operation().await;

        match (&result, self.transport.kind()) {
            (_, TransportKind::Apdu) => {
                state.open_aid = None;
                if let Err(e) = self.transport.close().await {
                    tracing::warn!(error = %e, "Failed to close APDU channel");
                }
            }
            // 传输层失败（非发送失败）时丢弃 BLE 会话
            (Err(CardError::Transport(err)), TransportKind::Ble)
                if err.code != TransportErrorCode::TransmitFailed =>
            {
                state.open_aid = None;
                if let Err(e) = self.transport.close().await {
                    tracing::warn!(error = %e, "Failed to close BLE session");
                }
            }
            _ => {
                state.last_used = Some(Instant::now());
            }
        }

        match &result {
            Ok(_) => tracing::debug!(label = label, "BSIM operation success"),
            Err(e) => tracing::debug!(label = label, error = %e, "BSIM operation error"),
        }
        result
    }

    async fn dispatch(&self, command: &ApduCommand) -> CardResult<ApduResponse> {
        let raw = self.transport.transmit(&command.serialize()?).await?;
        parse_apdu_response(&raw)
    }

    async fn expect_success(&self, command: &ApduCommand, pending_message: &str) -> CardResult<String> {
        match self.dispatch(command).await? {
            ApduResponse::Success { payload } => Ok(payload),
            ApduResponse::Pending { .. } => Err(CardError::pending(pending_message)),
        }
    }
}

#[async_trait]
impl<T: ApduTransport> BsimCard for ApduCard<T> {
    async fn get_version(&self) -> CardResult<String> {
        self.run_session(BSIM_AID, "getVersion", move || async move {
            self.expect_success(&build_get_version(), "Unexpected status while reading version")
                .await
        })
        .await
    }

    async fn get_iccid(&self) -> CardResult<String> {
        self.run_session(ICCID_AID, "getIccid", move || async move {
            self.expect_success(&build_get_iccid(), "Unexpected status while reading ICCID")
                .await
        })
        .await
    }

    async fn verify_bpin(&self) -> CardResult<()> {
        self.run_session(BSIM_AID, "verifyBpin", move || async move {
            self.expect_success(
                &build_verify_bpin(),
                "Unexpected pending status during BPIN verification",
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn update_bpin(&self) -> CardResult<()> {
        self.run_session(BSIM_AID, "updateBpin", move || async move {
            self.expect_success(
                &build_update_bpin(),
                "BPIN update requires additional APDU exchange",
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn derive_key(&self, coin_type: u32, algorithm: u8) -> CardResult<()> {
        let command = build_derive_key(coin_type, algorithm)?;
        self.run_session(BSIM_AID, "deriveKey", move || async move {
            self.expect_success(&command, "Key derivation requires additional APDU exchange")
                .await
                .map(|_| ())
        })
        .await
    }

    async fn export_pubkeys(&self) -> CardResult<Vec<PubkeyRecord>> {
        self.run_session(BSIM_AID, "exportPubkeys", move || async move {
            let mut response = self.dispatch(&build_export_pubkey(false)).await?;
            let mut buffer = String::new();
            let mut segments = 0;

            loop {
                buffer.push_str(response.payload());
                if let ApduResponse::Success { .. } = response {
                    let bytes = decode_card_hex(&buffer)?;
                    return collect_pubkey_records(&bytes);
                }
                segments += 1;
                if segments > MAX_PUBKEY_SEGMENTS {
                    return Err(CardError::pending("Exceeded maximum pubkey segments"));
                }
                response = self.dispatch(&build_export_pubkey(true)).await?;
            }
        })
        .await
    }

    async fn sign_message(&self, hash: &[u8], coin_type: u32, index: u8) -> CardResult<SignatureComponents> {
        let command = build_sign_message(hash, coin_type, index)?;
        self.run_session(BSIM_AID, "signMessage", move || async move {
            let payload = self
                .expect_success(&command, "Signature requires additional APDU exchange")
                .await?;
            if payload.is_empty() {
                return Err(CardError::Status {
                    code: "A000".to_string(),
                    message: "Signature payload is empty".to_string(),
                });
            }
            extract_signature(&decode_card_hex(&payload)?)
        })
        .await
    }

    async fn export_seed(&self, key2: &str) -> CardResult<String> {
        let command = build_export_seed(&ascii_bytes(key2)?)?;
        self.run_session(BSIM_AID, "backupSeed", move || async move {
            let payload = self
                .expect_success(&command, "Seed export requires additional APDU exchange")
                .await?;
            if payload.is_empty() {
                return Err(CardError::Status {
                    code: "A000".to_string(),
                    message: "Seed export payload is empty".to_string(),
                });
            }
            Ok(payload)
        })
        .await
    }

    async fn restore_seed(&self, key2: &str, cipher_hex: &str) -> CardResult<()> {
        let command = build_restore_seed(&ascii_bytes(key2)?, &decode_card_hex(cipher_hex)?)?;
        self.run_session(BSIM_AID, "restoreSeed", move || async move {
            self.expect_success(&command, "Seed restore requires additional APDU exchange")
                .await
                .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex as StdMutex};

    use super::*;

    #[test]
    fn test_command_serialization() {
        assert_eq!(build_verify_bpin().serialize().unwrap(), "807C000000");
        assert_eq!(build_update_bpin().serialize().unwrap(), "807E000000");
        assert_eq!(build_get_version().serialize().unwrap(), "00CA000002");
        assert_eq!(build_get_iccid().serialize().unwrap(), "80CA001100");
        assert_eq!(build_export_pubkey(true).serialize().unwrap(), "80C8000100");
        assert_eq!(
            build_derive_key(EVM_COIN_TYPE, ALGORITHM_ECDSA_SECP256K1)
                .unwrap()
                .serialize()
                .unwrap(),
            "80A80002050000003C01"
        );
        assert_eq!(
            build_select_aid(BSIM_AID).unwrap().serialize().unwrap(),
            format!("00A4040010{}", BSIM_AID)
        );

        let hash = [0xAB; 32];
        let sign = build_sign_message(&hash, EVM_COIN_TYPE, 3).unwrap().serialize().unwrap();
        assert!(sign.starts_with("80AC0000250000003C03ABAB"));
    }

    #[test]
    fn test_lc_mismatch_rejected() {
        let mut command = build_derive_key(60, 1).unwrap();
        command.lc = Some(9);
        assert!(command.serialize().is_err());

        command.lc = None;
        assert!(command.serialize().is_err());
    }

    #[test]
    fn test_parse_response_statuses() {
        assert_eq!(
            parse_apdu_response("01029000").unwrap(),
            ApduResponse::Success { payload: "0102".into() }
        );
        assert_eq!(
            parse_apdu_response("aa6300").unwrap(),
            ApduResponse::Pending { payload: "AA".into() }
        );
        assert!(matches!(
            parse_apdu_response("9101").unwrap(),
            ApduResponse::Success { .. }
        ));
        match parse_apdu_response("6A88").unwrap_err() {
            CardError::Status { code, message } => {
                assert_eq!(code, "6A88");
                assert!(message.contains("Wrong BPIN"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_apdu_response("90").is_err());
    }

    #[test]
    fn test_pubkey_chunk_with_and_without_length_byte() {
        let key = [0x04u8; 65];
        let mut value = vec![0, 0, 0, 60, 2, 1];
        value.extend_from_slice(&key);
        let record = parse_pubkey_chunk(&value).unwrap();
        assert_eq!(record.coin_type, 60);
        assert_eq!(record.index, 2);
        assert_eq!(record.key.len(), 130);

        let mut prefixed = vec![0, 0, 0, 60, 2, 1, 65];
        prefixed.extend_from_slice(&key);
        assert_eq!(parse_pubkey_chunk(&prefixed).unwrap().key, record.key);
    }

    #[test]
    fn test_collect_pubkey_records() {
        let mut stream = Vec::new();
        for index in [1u8, 2] {
            let mut value = vec![0, 0, 0, 60, index, 1];
            value.extend_from_slice(&[0x11; 64]);
            stream.push(PUBKEY_TAG);
            stream.push(value.len() as u8);
            stream.extend_from_slice(&value);
        }
        let records = collect_pubkey_records(&stream).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, 2);

        stream.truncate(stream.len() - 1);
        assert!(collect_pubkey_records(&stream).is_err());
    }

    #[test]
    fn test_extract_signature_strips_sign_padding() {
        let mut r = vec![0x00];
        r.extend_from_slice(&[0x80; 32]);
        let s = vec![0x01, 0x02];
        let mut der = vec![0x30, (2 + r.len() + 2 + s.len()) as u8, 0x02, r.len() as u8];
        der.extend_from_slice(&r);
        der.extend_from_slice(&[0x02, s.len() as u8]);
        der.extend_from_slice(&s);

        let sig = extract_signature(&der).unwrap();
        assert_eq!(sig.r, "80".repeat(32));
        assert_eq!(sig.s, format!("{}0102", "0".repeat(60)));

        der[1] += 1;
        assert!(extract_signature(&der).is_err());
    }

    struct ScriptedTransport {
        kind: TransportKind,
        responses: StdMutex<VecDeque<String>>,
        sent: StdMutex<Vec<String>>,
        opened: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(kind: TransportKind, responses: &[&str]) -> Self {
            Self {
                kind,
                responses: StdMutex::new(responses.iter().map(|r| r.to_string()).collect()),
                sent: StdMutex::new(Vec::new()),
                opened: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApduTransport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn open(&self, aid: &str) -> Result<(), TransportError> {
            self.opened.lock().unwrap().push(aid.to_string());
            Ok(())
        }

        async fn transmit(&self, apdu: &str) -> Result<String, TransportError> {
            self.sent.lock().unwrap().push(apdu.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::new(TransportErrorCode::TransmitFailed, "no response"))
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_export_pubkeys_multi_segment() {
        let mut value = vec![0, 0, 0, 60, 1, 1];
        value.extend_from_slice(&[0x22; 64]);
        let mut tlv = vec![PUBKEY_TAG, value.len() as u8];
        tlv.extend_from_slice(&value);
        let hex_tlv = hex::encode_upper(&tlv);
        let (first, second) = hex_tlv.split_at(20);

        let transport = ScriptedTransport::new(
            TransportKind::Apdu,
            &[&format!("{}6300", first), &format!("{}9000", second)],
        );
        let card = ApduCard::new(transport, Duration::from_secs(60));
        let records = card.export_pubkeys().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 1);

        let sent = card.transport.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["80C8000000", "80C8000100"]);
    }

    #[tokio::test]
    async fn test_iccid_uses_its_own_aid() {
        let transport = ScriptedTransport::new(TransportKind::Apdu, &["89860012349000"]);
        let card = ApduCard::new(transport, Duration::from_secs(60));
        assert_eq!(card.get_iccid().await.unwrap(), "8986001234");
        assert_eq!(card.transport.opened.lock().unwrap().clone(), vec![ICCID_AID]);
    }

    #[tokio::test]
    async fn test_ble_session_is_reused() {
        let transport = ScriptedTransport::new(TransportKind::Ble, &["01009000", "01009000"]);
        let card = ApduCard::new(transport, Duration::from_secs(60));
        card.get_version().await.unwrap();
        card.get_version().await.unwrap();
        assert_eq!(card.transport.opened.lock().unwrap().len(), 1);
    }
}
