//! Weighted multi-endpoint admission control.
//!
//! Each registered endpoint owns a token bucket of `capacity` tokens that
//! refills `capacity` tokens per whole elapsed interval. Requests declare a
//! weight and a priority; pending requests wait in a per-endpoint queue
//! ordered by ascending priority, ties broken by arrival. Rate-limited
//! responses (HTTP 429 and transport equivalents) are retried with truncated
//! exponential backoff; other failures surface to the caller.

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Backoff base for rate-limited retries.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff ceiling for rate-limited retries.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Upper bound on the cooperative delay injected from usage feedback.
const MAX_FEEDBACK_DELAY: Duration = Duration::from_secs(5);

/// Fraction of capacity at which server-reported usage starts injecting a
/// cooperative delay.
const USAGE_HIGH_WATER: f64 = 0.8;

/// Admission errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("endpoint '{0}' is not registered")]
    UnregisteredEndpoint(String),

    #[error("request is missing an identifier")]
    MissingIdentifier,

    #[error("rate limiter shut down while waiting")]
    Shutdown,
}

/// Per-request admission parameters.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Caller-supplied label used in logs; must be non-empty.
    pub identifier: String,
    /// Tokens consumed by the request.
    pub weight: u64,
    /// Smaller runs first; defaults to 0.
    pub priority: i32,
    /// Retry budget for rate-limited responses.
    pub max_attempts: u32,
}

impl RequestOptions {
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            weight: 1,
            priority: 0,
            max_attempts: 5,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Failure classification for executed operations.
#[derive(Debug)]
pub enum CallError {
    /// HTTP 429 or a transport-level equivalent; retried by the limiter.
    RateLimited(anyhow::Error),
    /// Everything else; surfaced to the caller unchanged.
    Other(anyhow::Error),
}

impl CallError {
    #[must_use]
    pub fn into_inner(self) -> anyhow::Error {
        match self {
            Self::RateLimited(e) | Self::Other(e) => e,
        }
    }
}

struct Waiter {
    priority: i32,
    seq: u64,
    weight: u64,
    ready: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // BinaryHeap pops the maximum, so the smallest (priority, seq) pair must
    // compare greatest.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

struct EndpointState {
    capacity: u64,
    refill_interval: Duration,
    tokens: u64,
    last_refill: Instant,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
    timer_armed: bool,
    cooldown_until: Option<Instant>,
}

impl EndpointState {
    fn refill(&mut self, now: Instant) {
        let interval_ms = self.refill_interval.as_millis();
        if interval_ms == 0 {
            return;
        }
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis();
        let intervals = (elapsed_ms / interval_ms) as u32;
        if intervals > 0 {
            self.tokens = self
                .tokens
                .saturating_add(self.capacity.saturating_mul(u64::from(intervals)))
                .min(self.capacity);
            self.last_refill += self.refill_interval * intervals;
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Hands tokens to eligible waiters; returns the instant the next waiter
    /// can be served, when any remain.
    fn dispatch(&mut self, now: Instant) -> Option<Instant> {
        self.refill(now);
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Some(until);
            }
        }
        while let Some(head_weight) = self.queue.peek().map(|w| w.weight) {
            if self.tokens < head_weight {
                return Some(self.last_refill + self.refill_interval);
            }
            if let Some(waiter) = self.queue.pop() {
                self.tokens -= waiter.weight;
                if waiter.ready.send(()).is_err() {
                    // Waiter dropped while queued; hand the tokens back.
                    self.tokens += waiter.weight;
                }
            }
        }
        None
    }
}

struct Inner {
    endpoints: Mutex<HashMap<String, EndpointState>>,
    jitter: Box<dyn Fn() -> Duration + Send + Sync>,
}

/// Cloneable handle to the shared limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter with randomized backoff jitter in `[0, 1s)`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_jitter(Box::new(|| {
            Duration::from_millis(rand::thread_rng().gen_range(0..1000))
        }))
    }

    /// Creates a limiter with an injected jitter source (zeroed in tests).
    #[must_use]
    pub fn with_jitter(jitter: Box<dyn Fn() -> Duration + Send + Sync>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints: Mutex::new(HashMap::new()),
                jitter,
            }),
        }
    }

    /// Registers (or replaces) an endpoint bucket.
    pub async fn register_endpoint(
        &self,
        key: impl Into<String>,
        capacity: u64,
        refill_interval: Duration,
    ) {
        let key = key.into();
        let mut endpoints = self.inner.endpoints.lock().await;
        endpoints.insert(
            key,
            EndpointState {
                capacity,
                refill_interval,
                tokens: capacity,
                last_refill: Instant::now(),
                queue: BinaryHeap::new(),
                next_seq: 0,
                timer_armed: false,
                cooldown_until: None,
            },
        );
    }

    /// Blocks until `weight` tokens are available on `key`, honoring queue
    /// priority.
    ///
    /// # Errors
    /// Returns `UnregisteredEndpoint` for unknown keys.
    pub async fn acquire(&self, key: &str, weight: u64, priority: i32) -> Result<(), RateLimitError> {
        let rx = {
            let now = Instant::now();
            let mut endpoints = self.inner.endpoints.lock().await;
            let state = endpoints
                .get_mut(key)
                .ok_or_else(|| RateLimitError::UnregisteredEndpoint(key.to_string()))?;
            state.refill(now);

            if state.queue.is_empty() && !state.in_cooldown(now) && state.tokens >= weight {
                state.tokens -= weight;
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter {
                priority,
                seq,
                weight,
                ready: tx,
            });
            self.arm_timer(key, state, now);
            rx
        };

        rx.await.map_err(|_| RateLimitError::Shutdown)
    }

    /// Runs `op` under admission control, retrying rate-limited failures
    /// with `min(60s, 1s * 2^(attempt-1) + jitter)` between attempts.
    ///
    /// # Errors
    /// Returns `MissingIdentifier`/`UnregisteredEndpoint`, or the underlying
    /// error once the retry budget is spent (rate-limited) or immediately
    /// (any other failure).
    pub async fn execute<T, F, Fut>(
        &self,
        key: &str,
        opts: RequestOptions,
        op: F,
    ) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if opts.identifier.is_empty() {
            return Err(RateLimitError::MissingIdentifier.into());
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.acquire(key, opts.weight, opts.priority).await?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(CallError::RateLimited(e)) => {
                    if attempt >= opts.max_attempts {
                        return Err(e.context(format!(
                            "'{}' still rate limited after {attempt} attempts",
                            opts.identifier
                        )));
                    }
                    let delay = backoff_delay(attempt, (self.inner.jitter)());
                    tracing::warn!(
                        identifier = %opts.identifier,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(CallError::Other(e)) => return Err(e),
            }
        }
    }

    /// Feeds a server-reported usage counter (e.g. `x-mbx-used-weight-1m`)
    /// back into the bucket. Crossing the high-water mark injects a bounded
    /// cooperative delay proportional to the overage.
    pub async fn note_usage(&self, key: &str, used_weight: u64) {
        let now = Instant::now();
        let mut endpoints = self.inner.endpoints.lock().await;
        let Some(state) = endpoints.get_mut(key) else {
            return;
        };

        let high_water = USAGE_HIGH_WATER * state.capacity as f64;
        if (used_weight as f64) < high_water || state.capacity == 0 {
            return;
        }

        let overage = used_weight as f64 - high_water;
        let fraction = (overage / state.capacity as f64).min(1.0);
        let delay = state.refill_interval.mul_f64(fraction).min(MAX_FEEDBACK_DELAY);
        let until = now + delay;
        if state.cooldown_until.is_none_or(|cur| until > cur) {
            state.cooldown_until = Some(until);
            tracing::debug!(
                endpoint = key,
                used_weight,
                delay_ms = delay.as_millis() as u64,
                "usage feedback cooldown"
            );
        }
        self.arm_timer(key, state, now);
    }

    /// Tokens currently available (diagnostics and tests).
    pub async fn available_tokens(&self, key: &str) -> Option<u64> {
        let mut endpoints = self.inner.endpoints.lock().await;
        let state = endpoints.get_mut(key)?;
        state.refill(Instant::now());
        Some(state.tokens)
    }

    fn arm_timer(&self, key: &str, state: &mut EndpointState, now: Instant) {
        if state.timer_armed {
            return;
        }
        let Some(wake_at) = next_wake(state, now) else {
            return;
        };
        state.timer_armed = true;

        let limiter = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            limiter.on_timer(&key).await;
        });
    }

    async fn on_timer(&self, key: &str) {
        let now = Instant::now();
        let mut endpoints = self.inner.endpoints.lock().await;
        let Some(state) = endpoints.get_mut(key) else {
            return;
        };
        state.timer_armed = false;
        state.dispatch(now);
        self.arm_timer(key, state, now);
    }
}

fn next_wake(state: &EndpointState, now: Instant) -> Option<Instant> {
    // One timer per endpoint: the earliest instant dispatch could make
    // progress. During a cooldown nothing runs before it ends; otherwise the
    // queue waits for the next refill.
    if state.in_cooldown(now) {
        return state.cooldown_until;
    }
    if state.queue.is_empty() {
        return None;
    }
    Some(state.last_refill + state.refill_interval)
}

/// Truncated exponential backoff for rate-limited retries.
#[must_use]
pub fn backoff_delay(attempt: u32, jitter: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE.saturating_mul(1u32 << exp);
    base.saturating_add(jitter).min(BACKOFF_CAP)
}
