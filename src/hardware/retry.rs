//! 带截止时间的固定间隔重试

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::{HardwareError, HardwareErrorCode, HardwareResult};

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub delay: Duration,
    pub timeout: Duration,
    /// None 表示只受截止时间限制
    pub max_attempts: Option<u32>,
}

impl RetryOptions {
    pub fn new(delay: Duration, timeout: Duration) -> Self {
        Self {
            delay,
            timeout,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// 重复执行 `operation` 直到成功、被取消、达到次数上限或超过截止时间
///
/// 取消错误立即返回；剩余时间放不下下一次间隔即视为超时；超时后保留最后一次错误的错误码，
/// 消息改写为 `Operation timed out after {ms}ms: {原消息}`。
pub async fn retry_with_timeout<T, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
    cancel: &CancellationToken,
) -> HardwareResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HardwareResult<T>>,
{
    let deadline = Instant::now() + options.timeout;
    let max_attempts = options.max_attempts.unwrap_or(u32::MAX);
    let mut attempt = 0u32;
    let mut last_error: Option<HardwareError> = None;

    while Instant::now() < deadline && attempt < max_attempts {
        if cancel.is_cancelled() {
            return Err(HardwareError::cancelled());
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                tracing::debug!(attempt = attempt, code = %err.code, error = %err, "Hardware attempt failed");
                last_error = Some(err);
            }
        }

        // 剩余窗口不足一个间隔时不再无间隔地重试
        if attempt >= max_attempts || Instant::now() + options.delay >= deadline {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(HardwareError::cancelled()),
            _ = tokio::time::sleep(options.delay) => {}
        }
    }

    let timeout_ms = options.timeout.as_millis();
    let error = match last_error {
        Some(last) => HardwareError {
            code: last.code,
            message: format!("Operation timed out after {}ms: {}", timeout_ms, last.message),
            details: last.details,
        },
        None => HardwareError::new(
            HardwareErrorCode::Timeout,
            format!("Operation timed out after {}ms: Unknown error", timeout_ms),
        ),
    };
    tracing::warn!(code = %error.code, attempts = attempt, "Hardware retry window exhausted");
    Err(error)
}
