//! Navigation wait conditions.
//!
//! These run on the blocking thread pool after `tab.navigate_to()` and poll
//! the page until the requested readiness condition holds, the timeout
//! expires, or the service is shutting down.

use anyhow::Result;
use headless_chrome::Tab;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::WaitCondition;

/// Default navigation timeout when the caller does not supply one.
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u32 = 30_000;

/// Hard cap on caller-supplied navigation timeouts. Anything above this is
/// clamped so a single request cannot pin a blocking thread indefinitely.
pub const MAX_NAVIGATION_TIMEOUT_MS: u32 = 120_000;

/// Interval between readiness polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolve the effective timeout: 0 means "use default", everything else is
/// capped at [`MAX_NAVIGATION_TIMEOUT_MS`].
pub fn effective_timeout(timeout_ms: u32) -> u32 {
    if timeout_ms == 0 {
        DEFAULT_NAVIGATION_TIMEOUT_MS
    } else {
        timeout_ms.min(MAX_NAVIGATION_TIMEOUT_MS)
    }
}

/// Block until `condition` holds on `tab`, for at most `timeout_ms`
/// milliseconds. Cancellation is checked at the top of every poll.
pub fn wait_for_condition(
    tab: &Arc<Tab>,
    condition: WaitCondition,
    timeout_ms: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let timeout = Duration::from_millis(u64::from(effective_timeout(timeout_ms)));
    tab.set_default_timeout(timeout);

    match condition {
        WaitCondition::Load | WaitCondition::DomContentLoaded => {
            wait_for_ready_state(tab, condition, timeout, cancel)
        }
        WaitCondition::NetworkIdle => wait_for_network_idle(tab, timeout, cancel),
    }
}

/// Poll `document.readyState` until it satisfies the condition.
fn wait_for_ready_state(
    tab: &Arc<Tab>,
    condition: WaitCondition,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let start = std::time::Instant::now();

    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("operation cancelled: service is shutting down");
        }

        let ready_state = tab
            .evaluate("document.readyState", false)?
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let reached = match condition {
            WaitCondition::Load => ready_state == "complete",
            WaitCondition::DomContentLoaded => !ready_state.is_empty() && ready_state != "loading",
            WaitCondition::NetworkIdle => unreachable!("handled by wait_for_network_idle"),
        };
        if reached {
            tracing::debug!(
                "Page reached '{}' after {:?} (readyState: {})",
                condition.as_str(),
                start.elapsed(),
                ready_state
            );
            return Ok(());
        }

        if start.elapsed() >= timeout {
            anyhow::bail!(
                "timed out waiting for '{}' after {:?}",
                condition.as_str(),
                timeout
            );
        }

        sleep(POLL_INTERVAL);
    }
}

/// Wait until the network has been quiet for ~500ms.
///
/// The CDP navigation wait blocks until the `networkIdle` lifecycle event,
/// so it runs on its own thread while this function polls for completion,
/// cancellation, and timeout.
fn wait_for_network_idle(
    tab: &Arc<Tab>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    use std::sync::Mutex;

    let start = std::time::Instant::now();
    let finished = Arc::new(Mutex::new(None::<Result<()>>));

    let tab_clone = tab.clone();
    let finished_clone = finished.clone();
    std::thread::spawn(move || {
        let result = tab_clone
            .wait_until_navigated()
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("navigation wait failed: {}", e));
        *finished_clone.lock().unwrap() = Some(result);
    });

    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("operation cancelled: service is shutting down");
        }

        {
            let mut guard = finished.lock().unwrap();
            if let Some(result) = guard.take() {
                if result.is_ok() {
                    tracing::debug!("Network idle reached after {:?}", start.elapsed());
                }
                return result;
            }
        }

        if start.elapsed() >= timeout {
            anyhow::bail!("timed out waiting for 'networkidle' after {:?}", timeout);
        }

        sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout_zero_uses_default() {
        assert_eq!(effective_timeout(0), DEFAULT_NAVIGATION_TIMEOUT_MS);
    }

    #[test]
    fn test_effective_timeout_passes_through_sane_values() {
        assert_eq!(effective_timeout(5_000), 5_000);
        assert_eq!(effective_timeout(MAX_NAVIGATION_TIMEOUT_MS), MAX_NAVIGATION_TIMEOUT_MS);
    }

    #[test]
    fn test_effective_timeout_caps_excessive_values() {
        assert_eq!(effective_timeout(u32::MAX), MAX_NAVIGATION_TIMEOUT_MS);
    }
}
