//! Retry policy for individual transport calls.
//!
//! Failures are retried at the single-request level only, never at the
//! plan level. Errors the transport classifies as permanent (including
//! every ordinary 4xx) return immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::webdav::WebDAVError;

/// Maximum attempts per transport call
pub const MAX_ATTEMPTS: u32 = 4;

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), true)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Run one transport call with retries. Only retryable errors are tried
/// again, up to [`MAX_ATTEMPTS`]; everything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(
    backoff: &Backoff,
    label: &str,
    mut op: F,
) -> Result<T, WebDAVError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WebDAVError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff.delay(attempt);
                log::debug!(
                    "Transport: {} failed (attempt {}/{}): {} — retrying in {:?}",
                    label,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff.delay_with_rng(0, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff.delay_with_rng(1, &mut rng),
            Duration::from_millis(200)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff.delay_with_rng(3, &mut rng),
            Duration::from_millis(800)
        );
        assert_eq!(
            backoff.delay_with_rng(4, &mut rng),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_backoff_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        let delay = backoff.delay_with_rng(3, &mut rng);
        assert!(delay <= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), false);
        let calls = AtomicU32::new(0);

        let result = with_retry(&backoff, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WebDAVError::Server {
                        status: 503,
                        message: String::new(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let backoff = Backoff::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&backoff, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(WebDAVError::Server {
                    status: 403,
                    message: String::new(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), false);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&backoff, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(WebDAVError::Server {
                    status: 500,
                    message: String::new(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
