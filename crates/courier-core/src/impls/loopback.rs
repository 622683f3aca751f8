//! Loopback sender (`loopback://...`).
//!
//! "Sending" writes an `Incoming` copy into this node's own store and wakes the
//! poller, which then hands it to the local handlers. The copy gets a fresh id
//! so it never collides with the outgoing record it came from.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::{DeliveryOutcome, Envelope};
use crate::ports::{Clock, EnvelopeStore, IdGenerator, Sender};

pub struct LoopbackSender {
    store: Arc<dyn EnvelopeStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl LoopbackSender {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            wake,
        }
    }
}

#[async_trait]
impl Sender for LoopbackSender {
    fn scheme(&self) -> &str {
        "loopback"
    }

    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id))]
    async fn send(&self, envelope: &Envelope) -> DeliveryOutcome {
        let incoming = envelope.to_incoming(self.ids.generate_envelope_id(), self.clock.now());
        let incoming_id = incoming.id;
        match self.store.persist(incoming).await {
            Ok(()) => {
                tracing::debug!(%incoming_id, "loopback envelope queued for local handling");
                self.wake.notify_one();
                DeliveryOutcome::Delivered
            }
            Err(e) => DeliveryOutcome::from(&e),
        }
    }
}
