//! Retry policies for login and reconnect attempts.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::RemoteError;

/// Decides whether a failed attempt is tried again, and after how long.
pub trait RetryPolicy: Send + Sync + 'static {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] on each failure.
pub struct RetryContext<'a> {
    pub fail_count:   NonZeroU32,
    pub slept_so_far: Duration,
    pub error:        &'a RemoteError,
}

/// Never retry.
pub struct NoRetries;

impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext<'_>) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Exponential backoff without an attempt limit.
///
/// Waits `initial`, doubling up to `max`. A `FLOOD_WAIT` from the remote
/// overrides the computed delay. Cancellation is never retried.
pub struct Backoff {
    pub initial: Duration,
    pub max:     Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max:     Duration::from_secs(60),
        }
    }
}

impl Backoff {
    fn delay(&self, fail_count: u32) -> Duration {
        let exp = fail_count.saturating_sub(1).min(16);
        self.initial.saturating_mul(1u32 << exp).min(self.max)
    }
}

impl RetryPolicy for Backoff {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> ControlFlow<(), Duration> {
        if matches!(ctx.error, RemoteError::Cancelled) {
            return ControlFlow::Break(());
        }
        if let Some(secs) = ctx.error.flood_wait_seconds() {
            tracing::info!("[tgstash] FLOOD_WAIT_{secs}, sleeping before retry");
            return ControlFlow::Continue(Duration::from_secs(secs));
        }
        ControlFlow::Continue(self.delay(ctx.fail_count.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RpcError;

    fn ctx(n: u32, error: &RemoteError) -> RetryContext<'_> {
        RetryContext {
            fail_count:   NonZeroU32::new(n).unwrap(),
            slept_so_far: Duration::ZERO,
            error,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = Backoff::default();
        let err = RemoteError::Disconnected;
        let delays: Vec<_> = (1..=8)
            .map(|n| match policy.should_retry(&ctx(n, &err)) {
                ControlFlow::Continue(d) => d.as_secs(),
                ControlFlow::Break(()) => panic!("backoff gave up"),
            })
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn flood_wait_overrides_delay() {
        let err = RemoteError::Rpc(RpcError { code: 420, name: "FLOOD_WAIT".into(), value: Some(7) });
        assert_eq!(Backoff::default().should_retry(&ctx(1, &err)), ControlFlow::Continue(Duration::from_secs(7)));
    }

    #[test]
    fn cancellation_is_final() {
        let err = RemoteError::Cancelled;
        assert_eq!(Backoff::default().should_retry(&ctx(1, &err)), ControlFlow::Break(()));
        assert_eq!(NoRetries.should_retry(&ctx(1, &RemoteError::Disconnected)), ControlFlow::Break(()));
    }
}
