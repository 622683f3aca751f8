//! Outcome model: the three-way result every transport and handler reports.
//!
//! Transports and handlers only *classify* what happened. Whether that means
//! retry or dead-letter is decided in one place, the `Decider`.

use serde::{Deserialize, Serialize};

use super::errors::{CourierError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

impl DeliveryOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryOutcome::TransientFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryOutcome::PermanentFailure(reason.into())
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::TransientFailure(r) | DeliveryOutcome::PermanentFailure(r) => Some(r),
        }
    }
}

/// Configuration errors and other non-retryable failures become permanent;
/// infrastructure and transport hiccups stay transient.
impl From<&CourierError> for DeliveryOutcome {
    fn from(err: &CourierError) -> Self {
        match err.kind() {
            ErrorKind::Transient | ErrorKind::Infrastructure => {
                DeliveryOutcome::TransientFailure(err.to_string())
            }
            ErrorKind::Configuration | ErrorKind::Permanent => {
                DeliveryOutcome::PermanentFailure(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_tagged_enum() {
        let v = serde_json::to_value(DeliveryOutcome::transient("reset")).unwrap();
        assert_eq!(v["kind"], "TRANSIENT_FAILURE");
        assert_eq!(v["reason"], "reset");

        let v = serde_json::to_value(DeliveryOutcome::Delivered).unwrap();
        assert_eq!(v["kind"], "DELIVERED");
    }

    #[test]
    fn configuration_errors_are_permanent() {
        let outcome = DeliveryOutcome::from(&CourierError::UnknownScheme("ftp".into()));
        assert!(matches!(outcome, DeliveryOutcome::PermanentFailure(_)));

        let outcome = DeliveryOutcome::from(&CourierError::StoreUnavailable("down".into()));
        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
    }
}
