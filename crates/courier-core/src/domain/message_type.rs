use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable wire name for a message's logical type.
///
/// Decoupled from any Rust type name so that renaming a struct never breaks
/// routing or persisted envelopes.
///
/// # 命名規約
/// - `{namespace}.{domain}.{action}.v{major}`
/// - 例: `acme.billing.invoice-created.v1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeAlias(String);

impl MessageTypeAlias {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageTypeAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MessageTypeAlias {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
