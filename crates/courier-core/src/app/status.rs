//! Status - store の状態別件数

use serde::{Deserialize, Serialize};

use crate::domain::{Envelope, EnvelopeStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeCounts {
    pub outgoing: usize,
    pub scheduled: usize,
    pub incoming: usize,
    pub handled: usize,
    pub dead_letter: usize,
    /// Non-terminal envelopes currently held by some node.
    pub claimed: usize,
}

impl EnvelopeCounts {
    pub fn record(&mut self, envelope: &Envelope) {
        match envelope.status {
            EnvelopeStatus::Outgoing => self.outgoing += 1,
            EnvelopeStatus::Scheduled => self.scheduled += 1,
            EnvelopeStatus::Incoming => self.incoming += 1,
            EnvelopeStatus::Handled => self.handled += 1,
            EnvelopeStatus::DeadLetter => self.dead_letter += 1,
        }
        if envelope.owner.is_some() && !envelope.status.is_terminal() {
            self.claimed += 1;
        }
    }

    /// Envelopes still waiting for delivery or handling.
    pub fn pending(&self) -> usize {
        self.outgoing + self.scheduled + self.incoming
    }
}
