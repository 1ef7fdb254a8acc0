use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt.
///
/// The first five kinds are transient (retried after backoff); the rest end
/// the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Operation timed out (connect/read/low-speed).
    Timeout,
    /// Network-level failure (refused, reset, DNS, send/recv error).
    Connection,
    /// Server asked us to slow down (429, 503).
    Throttled,
    /// Other 5xx response.
    ServerError(u16),
    /// Connection closed before the whole body was sent.
    PartialWrite,
    /// 401/403.
    Auth(u16),
    /// Any other 4xx: the request or payload was rejected.
    ClientError(u16),
    /// Endpoint explicitly said not to retry.
    Refused,
    /// Endpoint violated the upload protocol (e.g. offset past end of payload).
    Protocol,
    /// The local payload could not be read.
    Payload,
    Cancelled,
    DeadlineExceeded,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Connection
                | FailureKind::Throttled
                | FailureKind::ServerError(_)
                | FailureKind::PartialWrite
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Connection => write!(f, "connection"),
            FailureKind::Throttled => write!(f, "throttled"),
            FailureKind::ServerError(code) => write!(f, "server error {}", code),
            FailureKind::PartialWrite => write!(f, "partial write"),
            FailureKind::Auth(code) => write!(f, "authentication rejected ({})", code),
            FailureKind::ClientError(code) => write!(f, "client error {}", code),
            FailureKind::Refused => write!(f, "refused by endpoint"),
            FailureKind::Protocol => write!(f, "protocol error"),
            FailureKind::Payload => write!(f, "payload unreadable"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Decision returned by the backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Do not retry; the transfer becomes a permanent failure.
    DoNotRetry,
    /// Retry once the given delay has elapsed.
    RetryAfter(Duration),
}

/// Exponential backoff with a ceiling and multiplicative jitter.
///
/// `delay = min(max_delay, base_delay * 2^(attempt-1)) * U[jitter_min, jitter_max)`.
/// Stateless: the random source is passed in per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Lower bound of the jitter factor (inclusive).
    pub jitter_min: f64,
    /// Upper bound of the jitter factor (exclusive). Equal bounds disable jitter.
    pub jitter_max: f64,
    /// Optional cap on attempts (including the first). `None` = bounded by deadline only.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            jitter_min: 0.8,
            jitter_max: 1.2,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Delay for `attempt` (1-based, the attempt that just failed) given its failure kind.
    pub fn compute_delay<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        kind: FailureKind,
        rng: &mut R,
    ) -> BackoffDecision {
        if !kind.is_transient() {
            return BackoffDecision::DoNotRetry;
        }
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return BackoffDecision::DoNotRetry;
            }
        }
        let raw = self.raw_delay(attempt);
        let factor = if self.jitter_max > self.jitter_min {
            rng.gen_range(self.jitter_min..self.jitter_max)
        } else {
            self.jitter_min
        };
        BackoffDecision::RetryAfter(scale(raw, factor))
    }

    /// Like `compute_delay`, but a server `Retry-After` hint raises the delay
    /// (never above `ceiling()`).
    pub fn compute_delay_with_hint<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        kind: FailureKind,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> BackoffDecision {
        match (self.compute_delay(attempt, kind, rng), retry_after) {
            (BackoffDecision::RetryAfter(d), Some(hint)) => {
                BackoffDecision::RetryAfter(d.max(hint.min(self.ceiling())))
            }
            (decision, _) => decision,
        }
    }

    /// Upper bound on any returned delay: `max_delay * jitter_max`.
    pub fn ceiling(&self) -> Duration {
        scale(self.max_delay, self.jitter_max.max(self.jitter_min))
    }

    /// Un-jittered delay: base * 2^(attempt-1), capped at max_delay.
    fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1) - 1;
        let mult = 1u32 << exp.min(31);
        self.base_delay.saturating_mul(mult).min(self.max_delay)
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn delay(p: &BackoffPolicy, attempt: u32, rng: &mut StdRng) -> Duration {
        match p.compute_delay(attempt, FailureKind::Timeout, rng) {
            BackoffDecision::RetryAfter(d) => d,
            BackoffDecision::DoNotRetry => panic!("expected retry"),
        }
    }

    #[test]
    fn permanent_kinds_short_circuit() {
        let p = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        for kind in [
            FailureKind::Auth(401),
            FailureKind::ClientError(400),
            FailureKind::Refused,
            FailureKind::Protocol,
            FailureKind::Payload,
            FailureKind::Cancelled,
            FailureKind::DeadlineExceeded,
        ] {
            assert_eq!(p.compute_delay(1, kind, &mut rng), BackoffDecision::DoNotRetry);
        }
    }

    #[test]
    fn without_jitter_schedule_doubles_then_caps() {
        let p = BackoffPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            jitter_min: 1.0,
            jitter_max: 1.0,
            max_attempts: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(delay(&p, 1, &mut rng), Duration::from_secs(60));
        assert_eq!(delay(&p, 2, &mut rng), Duration::from_secs(120));
        assert_eq!(delay(&p, 3, &mut rng), Duration::from_secs(240));
        assert_eq!(delay(&p, 6, &mut rng), Duration::from_secs(1920));
        assert_eq!(delay(&p, 7, &mut rng), Duration::from_secs(3600));
        assert_eq!(delay(&p, 1000, &mut rng), Duration::from_secs(3600));
    }

    #[test]
    fn attempt_zero_treated_as_first() {
        let p = BackoffPolicy {
            jitter_min: 1.0,
            jitter_max: 1.0,
            ..BackoffPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(delay(&p, 0, &mut rng), p.base_delay);
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let p = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..40 {
            let d = delay(&p, attempt, &mut rng);
            assert!(d <= p.max_delay.mul_f64(1.2), "attempt {} gave {:?}", attempt, d);
            let raw = p.raw_delay(attempt);
            assert!(d >= raw.mul_f64(0.8) - Duration::from_micros(1));
        }
    }

    #[test]
    fn mean_delay_is_non_decreasing() {
        let p = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            ..BackoffPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut prev = Duration::ZERO;
        for attempt in 1..12 {
            let total: Duration = (0..200).map(|_| delay(&p, attempt, &mut rng)).sum();
            let mean = total / 200;
            // Past the cap the mean hovers around max_delay; allow sampling noise there.
            assert!(mean.as_secs_f64() >= prev.as_secs_f64() * 0.9, "attempt {}", attempt);
            prev = mean;
        }
    }

    #[test]
    fn jitter_draws_are_independent_per_call() {
        let p = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(9);
        let a = delay(&p, 3, &mut rng);
        let b = delay(&p, 3, &mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn same_seed_same_schedule() {
        let p = BackoffPolicy::default();
        let mut r1 = StdRng::seed_from_u64(5);
        let mut r2 = StdRng::seed_from_u64(5);
        for attempt in 1..8 {
            assert_eq!(delay(&p, attempt, &mut r1), delay(&p, attempt, &mut r2));
        }
    }

    #[test]
    fn respects_max_attempts() {
        let p = BackoffPolicy {
            max_attempts: Some(3),
            ..BackoffPolicy::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            p.compute_delay(2, FailureKind::Throttled, &mut rng),
            BackoffDecision::RetryAfter(_)
        ));
        assert_eq!(
            p.compute_delay(3, FailureKind::Throttled, &mut rng),
            BackoffDecision::DoNotRetry
        );
    }

    #[test]
    fn retry_after_hint_raises_but_is_capped() {
        let p = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_min: 1.0,
            jitter_max: 1.0,
            max_attempts: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            p.compute_delay_with_hint(1, FailureKind::Throttled, Some(Duration::from_secs(5)), &mut rng),
            BackoffDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            p.compute_delay_with_hint(1, FailureKind::Throttled, Some(Duration::from_secs(500)), &mut rng),
            BackoffDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            p.compute_delay_with_hint(4, FailureKind::Throttled, Some(Duration::from_millis(1)), &mut rng),
            BackoffDecision::RetryAfter(Duration::from_secs(8))
        );
    }
}
