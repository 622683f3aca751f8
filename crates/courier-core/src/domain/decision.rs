//! Decision model: what happens to an envelope after an attempt.
//!
//! This is the single place attempt-count semantics live. Transports and
//! handlers only classify the outcome; the `Decider` turns it into a decision.

use std::time::Duration;

use super::envelope::Envelope;
use super::outcome::DeliveryOutcome;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Delivered / handled; archive it.
    Complete,

    /// Retry after a delay with `attempts` recorded.
    Retry {
        delay: Duration,
        attempts: u32,
        reason: String,
    },

    /// Give up.
    DeadLetter { reason: String },
}

/// Deciders are pure functions: given the envelope and the outcome of its
/// latest attempt they return the next action without side effects.
/// Applying the decision to the store is done by the caller.
pub trait Decider: Send + Sync {
    fn decide(&self, envelope: &Envelope, outcome: &DeliveryOutcome) -> Decision;
}

/// Attempt-based retry with exponential backoff:
/// - `Delivered` -> Complete
/// - `TransientFailure` and attempts < max_attempts -> Retry (attempts + 1)
/// - `TransientFailure` and attempts >= max_attempts -> DeadLetter
/// - `PermanentFailure` -> DeadLetter
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    max_attempts: u32,
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(max_attempts: u32, retry_policy: RetryPolicy) -> Self {
        Self {
            max_attempts,
            retry_policy,
        }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, envelope: &Envelope, outcome: &DeliveryOutcome) -> Decision {
        match outcome {
            DeliveryOutcome::Delivered => Decision::Complete,
            DeliveryOutcome::PermanentFailure(reason) => Decision::DeadLetter {
                reason: reason.clone(),
            },
            DeliveryOutcome::TransientFailure(reason) if envelope.attempts >= self.max_attempts => {
                Decision::DeadLetter {
                    reason: format!(
                        "max attempts reached ({}/{}): {reason}",
                        envelope.attempts, self.max_attempts
                    ),
                }
            }
            DeliveryOutcome::TransientFailure(reason) => {
                let attempts = envelope.attempts + 1;
                Decision::Retry {
                    delay: self.retry_policy.next_delay(attempts),
                    attempts,
                    reason: reason.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvelopeId, MessageTypeAlias};
    use chrono::Utc;
    use rstest::rstest;
    use ulid::Ulid;

    fn envelope_with_attempts(attempts: u32) -> Envelope {
        let mut e = Envelope::new(
            EnvelopeId::from_ulid(Ulid::new()),
            MessageTypeAlias::new("test.ping.v1"),
            vec![],
            "application/json",
            Utc::now(),
        );
        e.attempts = attempts;
        e
    }

    fn decider() -> DefaultDecider {
        DefaultDecider::new(3, RetryPolicy::default())
    }

    #[test]
    fn delivered_completes() {
        let d = decider().decide(&envelope_with_attempts(2), &DeliveryOutcome::Delivered);
        assert_eq!(d, Decision::Complete);
    }

    #[rstest]
    #[case::first(0, 1)]
    #[case::second(1, 2)]
    #[case::last(2, 3)]
    fn transient_below_max_retries(#[case] attempts: u32, #[case] expected: u32) {
        let d = decider().decide(
            &envelope_with_attempts(attempts),
            &DeliveryOutcome::transient("timeout"),
        );
        assert!(matches!(d, Decision::Retry { attempts, .. } if attempts == expected));
    }

    #[test]
    fn transient_at_max_dead_letters() {
        let d = decider().decide(
            &envelope_with_attempts(3),
            &DeliveryOutcome::transient("timeout"),
        );
        assert!(matches!(d, Decision::DeadLetter { .. }));
    }

    #[test]
    fn permanent_dead_letters_immediately() {
        let d = decider().decide(
            &envelope_with_attempts(0),
            &DeliveryOutcome::permanent("bad payload"),
        );
        assert_eq!(
            d,
            Decision::DeadLetter {
                reason: "bad payload".into()
            }
        );
    }

    #[test]
    fn retry_delays_grow() {
        let decider = decider();
        let delay = |attempts| match decider.decide(
            &envelope_with_attempts(attempts),
            &DeliveryOutcome::transient("x"),
        ) {
            Decision::Retry { delay, .. } => delay,
            other => panic!("expected retry, got {other:?}"),
        };
        assert!(delay(1) > delay(0));
        assert!(delay(2) > delay(1));
    }
}
