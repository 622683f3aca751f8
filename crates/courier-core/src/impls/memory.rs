//! In-memory sender (`memory://...`).
//!
//! Records every envelope it is asked to send. Outcomes can be scripted with
//! `push_outcome`; once the script runs out every send is `Delivered`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{DeliveryOutcome, Envelope};
use crate::ports::Sender;

#[derive(Default)]
struct InMemorySenderState {
    sent: Vec<Envelope>,
    script: VecDeque<DeliveryOutcome>,
}

#[derive(Clone, Default)]
pub struct InMemorySender {
    state: Arc<Mutex<InMemorySenderState>>,
}

impl InMemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future send.
    pub async fn push_outcome(&self, outcome: DeliveryOutcome) {
        self.state.lock().await.script.push_back(outcome);
    }

    /// Every attempt so far, in order, including failed ones.
    pub async fn sent(&self) -> Vec<Envelope> {
        self.state.lock().await.sent.clone()
    }

    /// Drain the recorded attempts.
    pub async fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut self.state.lock().await.sent)
    }
}

#[async_trait]
impl Sender for InMemorySender {
    fn scheme(&self) -> &str {
        "memory"
    }

    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id))]
    async fn send(&self, envelope: &Envelope) -> DeliveryOutcome {
        let mut state = self.state.lock().await;
        state.sent.push(envelope.clone());
        let outcome = state.script.pop_front().unwrap_or(DeliveryOutcome::Delivered);
        tracing::debug!(
            message_type = %envelope.message_type,
            ?outcome,
            "envelope sent to in-memory sender"
        );
        outcome
    }
}
