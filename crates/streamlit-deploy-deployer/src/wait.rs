//! Resource readiness polling with exponential backoff and cancellation.
//!
//! Provisioned resources (load balancers, distributions, services, IAM
//! roles) become usable some time after the create call returns. This
//! module provides the single polling loop every unit uses to wait for
//! that, with exponential backoff, jitter, and cancellation.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for readiness polling.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

impl WaitConfig {
    /// Polling profile for slow global rollouts (edge distributions)
    pub fn slow_rollout() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(1800),
        }
    }

    /// Polling profile for IAM visibility delays
    pub fn iam_propagation() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Wait for a resource to become ready.
///
/// `check` returns `Ok(true)` when the resource is ready, `Ok(false)` to keep
/// polling, or an error to abort immediately. The optional cancellation token
/// aborts the wait between (and during) sleeps.
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = std::time::Instant::now();
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    loop {
        attempts += 1;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                anyhow::bail!("Wait for {} cancelled", resource_name);
            }
        }

        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "Timeout waiting for {} after {:?} ({} attempts)",
                resource_name,
                config.timeout,
                attempts
            );
        }

        match check().await {
            Ok(true) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        if let Some(token) = cancel {
                            token.cancelled().await
                        } else {
                            std::future::pending::<()>().await
                        }
                    } => {
                        anyhow::bail!("Wait for {} cancelled", resource_name);
                    }
                }
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Resource check failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_once_check_passes() {
        let calls = AtomicU32::new(0);
        let config = WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        };

        wait_for_resource(
            config,
            None,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n >= 2)
            },
            "test-resource",
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let config = WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            timeout: Duration::from_millis(30),
        };

        let err = wait_for_resource(config, None, || async { Ok(false) }, "never-ready")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timeout"));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let token = CancellationToken::new();
        token.cancel();

        let err = wait_for_resource(
            WaitConfig::default(),
            Some(&token),
            || async { Ok(false) },
            "cancelled-resource",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn check_errors_abort_immediately() {
        let err = wait_for_resource(
            WaitConfig::default(),
            None,
            || async { anyhow::bail!("boom") },
            "failing-resource",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
