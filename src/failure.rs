//! Deterministic "every Nth request fails" injection.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::StatusCode;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Errors;

/// Errors that can occur when building a [`FailureInjector`].
#[derive(Debug, Error, PartialEq)]
pub enum FailureError {
    /// The sample rate is not within (0, 1].
    #[error("errors.sample must be within (0, 1], got {0}")]
    InvalidSample(f64),
}

/// Forces a configured status on exactly one of every N requests.
///
/// N is `round(1 / sample)`. The counter is owned by one compiled endpoint
/// and never shared with another.
#[derive(Debug)]
pub struct FailureInjector {
    counter: AtomicU64,
    threshold: u64,
    statuses: Vec<StatusCode>,
}

impl FailureInjector {
    /// Create a new injector.
    ///
    /// # Parameters
    ///
    /// - `sample` - Failure rate within (0, 1]
    /// - `statuses` - Candidate forced status codes; invalid codes are dropped
    ///
    /// # Returns
    ///
    /// Returns the injector, or `FailureError` when `sample` is out of range.
    /// With no usable status the injector forces 500.
    pub fn new(sample: f64, statuses: &[i64]) -> Result<Self, FailureError> {
        if !(sample > 0.0 && sample <= 1.0) {
            return Err(FailureError::InvalidSample(sample));
        }

        let threshold = ((1.0 / sample).round() as u64).max(1);

        let mut codes: Vec<StatusCode> = statuses
            .iter()
            .filter_map(|&code| {
                let status = u16::try_from(code).ok().and_then(|code| StatusCode::from_u16(code).ok());
                if status.is_none() {
                    warn!(code, "ignoring invalid failure status");
                }
                status
            })
            .collect();
        if codes.is_empty() {
            codes.push(StatusCode::INTERNAL_SERVER_ERROR);
        }

        debug!(every_nth_err = threshold, statuses = ?codes, "every Nth request will fail");
        Ok(Self { counter: AtomicU64::new(0), threshold, statuses: codes })
    }

    /// Create an injector from an endpoint's `errors` block.
    pub fn from_config(errors: &Errors) -> Result<Self, FailureError> {
        Self::new(errors.sample, &errors.statuses)
    }

    /// Number of requests per injected failure.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Count one request and decide whether it fails.
    ///
    /// # Returns
    ///
    /// Returns a randomly picked candidate status when this request is the
    /// Nth since the last failure, `None` otherwise.
    pub fn sample(&self) -> Option<StatusCode> {
        // Increment and wrap in one step so concurrent requests cannot both fire.
        let previous = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(if count + 1 >= self.threshold { 0 } else { count + 1 })
            })
            .unwrap_or_else(|count| count);

        if previous + 1 < self.threshold {
            return None;
        }

        self.statuses.choose(&mut rand::thread_rng()).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    /// Test threshold computation, rounding non-exact reciprocals.
    #[test]
    fn test_threshold() {
        let threshold = |sample| FailureInjector::new(sample, &[]).expect("valid").threshold();
        assert_eq!(threshold(1.0), 1);
        assert_eq!(threshold(0.5), 2);
        assert_eq!(threshold(0.1), 10);
        assert_eq!(threshold(0.3), 3);
        assert_eq!(threshold(0.4), 3);
        assert_eq!(threshold(0.001), 1000);
    }

    /// Test that out-of-range samples are rejected.
    #[test]
    fn test_invalid_sample() {
        assert_eq!(FailureInjector::new(0.0, &[]).unwrap_err(), FailureError::InvalidSample(0.0));
        assert!(FailureInjector::new(-0.5, &[]).is_err());
        assert!(FailureInjector::new(1.5, &[]).is_err());
        assert!(FailureInjector::new(f64::NAN, &[]).is_err());
    }

    /// Test that exactly one in N requests fails.
    #[test]
    fn test_exact_cadence() {
        let injector = FailureInjector::new(0.25, &[503]).expect("valid");

        let outcomes: Vec<Option<StatusCode>> = (0..12).map(|_| injector.sample()).collect();
        for (i, outcome) in outcomes.iter().enumerate() {
            if (i + 1) % 4 == 0 {
                assert_eq!(*outcome, Some(StatusCode::SERVICE_UNAVAILABLE), "request {}", i + 1);
            } else {
                assert_eq!(*outcome, None, "request {}", i + 1);
            }
        }
    }

    /// Test the default and the random pick among candidate statuses.
    #[test]
    fn test_statuses() {
        let injector = FailureInjector::new(1.0, &[]).expect("valid");
        assert_eq!(injector.sample(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let injector = FailureInjector::new(1.0, &[0, -1, 70_000, 502, 504]).expect("valid");
        for _ in 0..50 {
            let status = injector.sample().expect("every request fails");
            assert!(status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT);
        }
    }

    /// Test the cadence holds under concurrent requests.
    #[test]
    fn test_concurrent_cadence() {
        let injector = FailureInjector::new(0.1, &[500]).expect("valid");
        let fired = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        if injector.sample().is_some() {
                            fired.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(fired.load(Ordering::Relaxed), 200);
    }
}
