//! Settings - 起動時に一度だけ組み立てる不変の設定
//!
//! ホスト側から渡された値をそのまま使う。実行中に書き換えない（`Arc<Settings>` で共有）。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::{NodeId, RetryPolicy};
use crate::routing::RoutingRule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Claim owner name for this process. Must be unique among nodes sharing a store.
    pub node_id: NodeId,

    pub polling_interval_ms: u64,
    /// Delay before the first sweep after start-up.
    pub first_execution_delay_ms: u64,

    pub max_attempts: u32,
    /// Claims older than this are considered abandoned.
    pub claim_timeout_ms: u64,

    /// Max envelopes claimed per sweep.
    pub batch_size: usize,
    /// Max envelopes dispatched concurrently within a sweep.
    pub max_parallelism: usize,
    /// How long shutdown waits for an in-progress sweep.
    pub shutdown_grace_ms: u64,

    pub retry: RetryPolicy,
    /// Attempts for a store write that hit a retryable error.
    pub store_retry_attempts: u32,
    /// Handled envelopes the built-in in-memory store keeps for inspection.
    pub handled_retention: usize,

    pub routing: Vec<RoutingRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(format!("node-{}", Ulid::new())),
            polling_interval_ms: 1_000,
            first_execution_delay_ms: 0,
            max_attempts: 3,
            claim_timeout_ms: 30_000,
            batch_size: 100,
            max_parallelism: 8,
            shutdown_grace_ms: 5_000,
            retry: RetryPolicy::default(),
            store_retry_attempts: 3,
            handled_retention: crate::impls::inmem_store::DEFAULT_HANDLED_RETENTION,
            routing: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn first_execution_delay(&self) -> Duration {
        Duration::from_millis(self.first_execution_delay_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
