use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide token bucket shared by every concurrent download.
///
/// Holds at most one second's worth of tokens. Callers may overdraw the
/// bucket; the debt is paid back by sleeping until the refill catches up.
#[derive(Debug)]
pub struct RateBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// Creates a bucket refilled at `bytes_per_sec`. Returns `None` for a zero rate.
    pub fn new(bytes_per_sec: u64) -> Option<Self> {
        if bytes_per_sec == 0 {
            return None;
        }
        let rate = bytes_per_sec as f64;
        Some(Self {
            rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// Drains `amount` tokens and returns how long the caller must wait to stay within budget.
    fn take(&self, amount: u64) -> Duration {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        state.tokens -= amount as f64;

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }

    /// Waits until `amount` bytes fit in the budget.
    pub async fn acquire(&self, amount: u64) {
        let wait = self.take(amount);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
