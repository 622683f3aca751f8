//! Domain model (IDs, envelopes, subscriptions, outcomes, decisions, ...).

pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod message_type;
pub mod outcome;
pub mod retry;
pub mod subscription;

pub use decision::{Decider, Decision, DefaultDecider};
pub use envelope::{Envelope, EnvelopeStatus};
pub use errors::{CourierError, ErrorKind};
pub use ids::{EnvelopeId, NodeId};
pub use message_type::MessageTypeAlias;
pub use outcome::DeliveryOutcome;
pub use retry::RetryPolicy;
pub use subscription::{DEFAULT_CONTENT_TYPE, Subscription};
