use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 指数退避重试：第 n 次失败后等待 `base_delay * 2^(n-1)`。
/// 最后一次的错误原样返回给调用方。
pub async fn with_backoff<T, E, F, Fut>(
    label: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!("{} 失败 (第 {}/{} 次): {}", label, attempt, max_attempts, e);
                info!("{} 等待 {}ms 后重试...", label, delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} 在 {} 次尝试后仍然失败: {}", label, max_attempts, e);
                return Err(e);
            }
        }
    }
}
