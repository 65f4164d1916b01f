//! Clock abstraction and time-window checking.
//!
//! The notary never samples wall-clock time directly: every consumer goes
//! through the [`Clock`] trait so tests can drive time deterministically.
//! Exactly one clock source is active per process.
//!
//! A [`TimeWindow`] is the validity interval a client requests for its
//! transaction. The [`TimeWindowChecker`] accepts the request iff
//! `from - tolerance <= now <= until + tolerance`; absent bounds are
//! treated as unbounded. The check is pure and never blocks.

use crate::core::error::{NotaryError, NotaryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time as milliseconds since the Unix epoch.
///
/// Wire-friendly and totally ordered; all window arithmetic happens in this
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub ms: u64,
}

impl Timestamp {
    /// Create a timestamp from a millisecond value.
    pub const fn from_ms(ms: u64) -> Self {
        Self { ms }
    }

    /// Convert a `SystemTime` to a timestamp, saturating at the epoch.
    pub fn from_system_time(t: SystemTime) -> Self {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self { ms }
    }

    /// Add a duration, saturating.
    pub fn saturating_add(self, d: Duration) -> Self {
        Self {
            ms: self.ms.saturating_add(d.as_millis() as u64),
        }
    }

    /// Subtract a duration, saturating at the epoch.
    pub fn saturating_sub(self, d: Duration) -> Self {
        Self {
            ms: self.ms.saturating_sub(d.as_millis() as u64),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.ms)
    }
}

/// Source of the current time.
///
/// Implementations must be cheap and non-blocking; the checker calls this
/// once per request.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock source used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    pub fn at(ms: u64) -> Self {
        Self {
            now_ms: std::sync::atomic::AtomicU64::new(ms),
        }
    }

    /// Set the current time.
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, std::sync::atomic::Ordering::Release);
    }

    /// Advance the current time.
    pub fn advance(&self, d: Duration) {
        self.now_ms.fetch_add(
            d.as_millis() as u64,
            std::sync::atomic::Ordering::AcqRel,
        );
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_ms(self.now_ms.load(std::sync::atomic::Ordering::Acquire))
    }
}

/// A requested validity interval. Either bound may be absent (unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Earliest acceptable notarization time.
    pub from: Option<Timestamp>,

    /// Latest acceptable notarization time.
    pub until: Option<Timestamp>,
}

impl TimeWindow {
    /// Window bounded on both sides.
    pub fn between(from: Timestamp, until: Timestamp) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    /// Window bounded below only.
    pub fn from_only(from: Timestamp) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    /// Window bounded above only.
    pub fn until_only(until: Timestamp) -> Self {
        Self {
            from: None,
            until: Some(until),
        }
    }

    /// A window with inverted bounds can never be satisfied; callers treat
    /// it as malformed before it reaches the checker.
    pub fn is_inverted(&self) -> bool {
        matches!((self.from, self.until), (Some(f), Some(u)) if f > u)
    }
}

/// Validates requested time windows against the active clock.
#[derive(Clone)]
pub struct TimeWindowChecker {
    clock: Arc<dyn Clock>,
    tolerance: Duration,
}

impl TimeWindowChecker {
    /// Create a checker over the given clock with the configured tolerance.
    pub fn new(clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        Self { clock, tolerance }
    }

    /// The configured tolerance.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Check a window against the current time.
    ///
    /// Passes iff `from - tolerance <= now <= until + tolerance`. A request
    /// without a window always passes.
    pub fn check(&self, window: Option<&TimeWindow>) -> NotaryResult<()> {
        let Some(window) = window else {
            return Ok(());
        };

        let now = self.clock.now();
        let lower_ok = window
            .from
            .map(|f| now >= f.saturating_sub(self.tolerance))
            .unwrap_or(true);
        let upper_ok = window
            .until
            .map(|u| now <= u.saturating_add(self.tolerance))
            .unwrap_or(true);

        if lower_ok && upper_ok {
            Ok(())
        } else {
            Err(NotaryError::TimeWindowOutOfBounds {
                now_ms: now.ms,
                from: window
                    .from
                    .map(|f| f.ms.to_string())
                    .unwrap_or_else(|| "-inf".into()),
                until: window
                    .until
                    .map(|u| u.ms.to_string())
                    .unwrap_or_else(|| "+inf".into()),
            })
        }
    }
}
