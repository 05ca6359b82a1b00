// ── Pilot Engine: HTTP Retry & Circuit-Breaker ─────────────────────────────
//
// Shared retry utilities used by the language-model provider and the Discord
// REST/gateway clients.
//
// Features:
//   • Exponential backoff with ±25% jitter (base 1s, max 30s, 3 retries)
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529
//   • Respects `Retry-After` header
//   • Circuit breaker: N consecutive failures → fail fast for a cooldown
//   • Gateway reconnect helper with escalating backoff + cap

use crate::atoms::error::{EngineError, EngineResult};
use log::warn;
use rand::Rng;
use reqwest::Client;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

// ── Constants ──────────────────────────────────────────────────────────────

/// Default maximum number of retry attempts per request.
pub const MAX_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum retry delay cap in milliseconds (30 seconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Maximum reconnect delay cap in milliseconds (5 minutes).
const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

// ── Client factory ─────────────────────────────────────────────────────────

/// Build a rustls-backed client with connect and request timeouts.
pub fn build_client(timeout: Duration) -> EngineResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .user_agent(concat!("pawz-pilot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(EngineError::from)
}

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Backoff delay ──────────────────────────────────────────────────────────

/// Backoff for retry `attempt` (0-based), honouring a server Retry-After.
pub fn retry_backoff(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(10));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = match retry_after_secs {
        // Server-specified delay, capped at 60s and floored at our backoff
        Some(secs) => (secs.min(60) * 1000).max(capped_ms),
        None => capped_ms,
    };
    Duration::from_millis(apply_jitter(delay_ms))
}

/// Sleep with exponential backoff + ±25% jitter.
/// Returns the actual delay for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let delay = retry_backoff(attempt, retry_after_secs);
    tokio::time::sleep(delay).await;
    delay
}

/// Exponential backoff for gateway reconnection (longer 5-minute cap).
/// `attempt` is 0-based.
pub async fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    let delay = Duration::from_millis(apply_jitter(capped_ms));
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    (base_ms as i64 + offset).max(100) as u64
}

// ── Retry-After header parsing ─────────────────────────────────────────────

/// Parse a Retry-After value. Integer seconds, or fractional seconds as
/// Discord sends in its JSON bodies (rounded up).
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    let v = header_value.trim();
    v.parse::<u64>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64))
}

// ── Circuit Breaker ────────────────────────────────────────────────────────

/// Trips after N consecutive failures, then rejects requests for a cooldown
/// period before allowing a trial request.
///
/// States:
///   Closed  : normal operation, requests pass through
///   Open    : rejecting requests (cooldown active)
///   HalfOpen: cooldown expired, one trial request allowed
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    /// Epoch secs when the circuit was tripped open.
    tripped_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    /// `Err(message)` while the circuit is open.
    pub fn check(&self) -> Result<(), String> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < self.threshold {
            return Ok(());
        }

        let tripped = self.tripped_at.load(Ordering::Relaxed);
        let elapsed = epoch_secs().saturating_sub(tripped);
        if elapsed < self.cooldown_secs {
            Err(format!(
                "Circuit breaker open: {} consecutive failures, cooling down for {}s",
                failures,
                self.cooldown_secs - elapsed
            ))
        } else {
            Ok(())
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.tripped_at.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let prev = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if prev + 1 >= self.threshold {
            self.tripped_at.store(epoch_secs(), Ordering::Relaxed);
            warn!(
                "[circuit-breaker] Tripped after {} consecutive failures, cooling down {}s",
                prev + 1,
                self.cooldown_secs
            );
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s));
        }
        for s in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(s));
        }
    }

    #[test]
    fn parse_retry_after_valid() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("1.25"), Some(2));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for base in [100, 1000, 5000, 30_000] {
            let result = apply_jitter(base);
            let lower = (base as f64 * 0.75) as u64;
            let upper = (base as f64 * 1.25) as u64;
            assert!(
                result >= lower.max(100) && result <= upper,
                "jitter({}) = {} not in [{}, {}]",
                base,
                result,
                lower,
                upper
            );
        }
    }

    #[test]
    fn backoff_honours_retry_after() {
        let d = retry_backoff(0, Some(10));
        assert!(d >= Duration::from_millis(7_500) && d <= Duration::from_millis(12_500));
        let capped = retry_backoff(9, None);
        assert!(capped <= Duration::from_millis(37_500));
    }

    #[test]
    fn circuit_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new(3, 60);
        assert!(cb.check().is_ok());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());

        cb.record_failure();
        assert!(cb.check().is_err());

        cb.record_success();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(3, 60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn client_builds() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
