//! Token bucket capping global extraction starts.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use mnemo_core::RateLimit;

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket refilling `max` permits per `window`.
///
/// Protects the language-model provider from a burst of simultaneous
/// extraction starts across all users.
pub(crate) struct TokenBucket {
    max: f64,
    window: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub(crate) fn new(rate: RateLimit) -> Self {
        let max = f64::from(rate.max.max(1));
        Self {
            max,
            window: rate.window,
            state: Mutex::new(BucketState {
                tokens: max,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Waits until a permit is available and takes it.
    pub(crate) async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.refilled_at);
                state.refilled_at = now;
                state.tokens = self
                    .max
                    .min(state.tokens + elapsed.as_secs_f64() / self.window.as_secs_f64() * self.max);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64(
                    (1.0 - state.tokens) * self.window.as_secs_f64() / self.max,
                )
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("max", &self.max)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
