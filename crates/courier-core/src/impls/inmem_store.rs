//! In-memory envelope store.
//!
//! One `tokio::sync::Mutex` around the whole state makes every operation a
//! single atomic step, which is what the `EnvelopeStore` contract asks of a
//! transactional backend.
//!
//! Non-terminal envelopes live in their own map so sweeps never walk the
//! archive. Dead letters are kept until removed by hand; handled envelopes are
//! kept only up to `handled_retention` (oldest dropped first).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::EnvelopeCounts;
use crate::domain::{CourierError, Envelope, EnvelopeId, EnvelopeStatus, NodeId};
use crate::ports::EnvelopeStore;

/// Handled envelopes kept for inspection by default.
pub const DEFAULT_HANDLED_RETENTION: usize = 10_000;

struct InMemoryStoreState {
    /// Scheduled / outgoing / incoming envelopes. ULID ordering == creation order.
    pending: BTreeMap<EnvelopeId, Envelope>,
    dead: BTreeMap<EnvelopeId, Envelope>,
    handled: BTreeMap<EnvelopeId, Envelope>,
    /// Handled ids, oldest first.
    handled_order: VecDeque<EnvelopeId>,
    handled_retention: usize,
}

impl InMemoryStoreState {
    fn contains(&self, id: &EnvelopeId) -> bool {
        self.pending.contains_key(id) || self.dead.contains_key(id) || self.handled.contains_key(id)
    }

    fn insert(&mut self, envelope: Envelope) {
        match envelope.status {
            EnvelopeStatus::Handled => self.archive(envelope),
            EnvelopeStatus::DeadLetter => {
                self.dead.insert(envelope.id, envelope);
            }
            _ => {
                self.pending.insert(envelope.id, envelope);
            }
        }
    }

    fn archive(&mut self, envelope: Envelope) {
        let id = envelope.id;
        self.handled.insert(id, envelope);
        self.handled_order.push_back(id);
        while self.handled_order.len() > self.handled_retention {
            let Some(oldest) = self.handled_order.pop_front() else {
                break;
            };
            self.handled.remove(&oldest);
        }
    }

    /// Remove a pending envelope, provided `owner` may complete it.
    fn take_owned(
        &mut self,
        id: EnvelopeId,
        owner: &NodeId,
    ) -> Result<Option<Envelope>, CourierError> {
        match self.pending.get(&id) {
            Some(envelope) => envelope.check_owner(owner)?,
            None => return Ok(None),
        }
        Ok(self.pending.remove(&id))
    }

    fn terminal_mut(&mut self, id: EnvelopeId) -> Option<&mut Envelope> {
        match self.dead.get_mut(&id) {
            Some(envelope) => Some(envelope),
            None => self.handled.get_mut(&id),
        }
    }
}

#[derive(Clone)]
pub struct InMemoryEnvelopeStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    claim_timeout: Duration,
}

impl InMemoryEnvelopeStore {
    pub fn new(claim_timeout: Duration) -> Self {
        Self::with_handled_retention(claim_timeout, DEFAULT_HANDLED_RETENTION)
    }

    /// `handled_retention == 0` deletes envelopes as soon as they are handled.
    pub fn with_handled_retention(claim_timeout: Duration, handled_retention: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState {
                pending: BTreeMap::new(),
                dead: BTreeMap::new(),
                handled: BTreeMap::new(),
                handled_order: VecDeque::new(),
                handled_retention,
            })),
            claim_timeout,
        }
    }

    /// Every stored envelope in id order.
    pub async fn all(&self) -> Vec<Envelope> {
        let state = self.state.lock().await;
        let mut all: Vec<Envelope> = state
            .pending
            .values()
            .chain(state.handled.values())
            .chain(state.dead.values())
            .cloned()
            .collect();
        all.sort_by_key(|e| e.id);
        all
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    async fn persist(&self, envelope: Envelope) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        if state.contains(&envelope.id) {
            return Err(CourierError::DuplicateEnvelope(envelope.id));
        }
        state.insert(envelope);
        Ok(())
    }

    async fn claim_due(
        &self,
        owner: &NodeId,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Envelope>, CourierError> {
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for envelope in state.pending.values_mut() {
            if claimed.len() >= max_count {
                break;
            }
            if envelope.is_claimable(now, self.claim_timeout) {
                envelope.claim(owner.clone(), now);
                claimed.push(envelope.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_handled(&self, id: EnvelopeId, owner: &NodeId) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        if let Some(dead) = state.dead.get_mut(&id) {
            return dead.mark_handled();
        }
        match state.take_owned(id, owner)? {
            Some(mut envelope) => {
                envelope.mark_handled()?;
                state.archive(envelope);
                Ok(())
            }
            // already handled (or dropped from the archive)
            None => Ok(()),
        }
    }

    async fn reschedule(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        execution_time: DateTime<Utc>,
        attempts: u32,
        reason: Option<String>,
    ) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        if let Some(envelope) = state.pending.get_mut(&id) {
            envelope.check_owner(owner)?;
            return envelope.reschedule(execution_time, attempts, reason);
        }
        match state.terminal_mut(id) {
            Some(envelope) => envelope.reschedule(execution_time, attempts, reason),
            None => Err(CourierError::EnvelopeNotFound(id)),
        }
    }

    async fn move_to_dead_letter(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        reason: String,
    ) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        match state.take_owned(id, owner)? {
            Some(mut envelope) => {
                envelope.mark_dead(reason)?;
                state.dead.insert(id, envelope);
                Ok(())
            }
            None => match state.terminal_mut(id) {
                Some(envelope) => envelope.mark_dead(reason),
                None => Err(CourierError::EnvelopeNotFound(id)),
            },
        }
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, CourierError> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for envelope in state.pending.values_mut() {
            if envelope.owner.is_some() && envelope.claim_expired(now, self.claim_timeout) {
                envelope.release_claim();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn find(&self, id: EnvelopeId) -> Result<Option<Envelope>, CourierError> {
        let state = self.state.lock().await;
        Ok(state
            .pending
            .get(&id)
            .or_else(|| state.handled.get(&id))
            .or_else(|| state.dead.get(&id))
            .cloned())
    }

    async fn dead_letters(&self) -> Result<Vec<Envelope>, CourierError> {
        let state = self.state.lock().await;
        Ok(state.dead.values().cloned().collect())
    }

    /// `handled` counts only the envelopes still retained.
    async fn counts_by_status(&self) -> Result<EnvelopeCounts, CourierError> {
        let state = self.state.lock().await;
        let mut counts = EnvelopeCounts::default();
        for envelope in state
            .pending
            .values()
            .chain(state.handled.values())
            .chain(state.dead.values())
        {
            counts.record(envelope);
        }
        Ok(counts)
    }
}
