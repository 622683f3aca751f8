//! Test fixtures shared by the unit tests: sample messages, scripted handlers,
//! an outage-injecting store and a harness that wires a `Bus` around them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use ulid::Ulid;
use url::Url;

use crate::app::status::EnvelopeCounts;
use crate::app::{AppBuilder, Bus, MessageContext, Settings};
use crate::domain::{
    CourierError, DEFAULT_CONTENT_TYPE, Envelope, EnvelopeId, EnvelopeStatus, NodeId, Subscription,
};
use crate::impls::inmem_store::InMemoryEnvelopeStore;
use crate::impls::memory::InMemorySender;
use crate::ports::{Clock, EnvelopeStore, FixedClock};
use crate::routing::RoutingRule;
use crate::typed::{Handler, HandlerContext, HandlerError, Message};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub(crate) fn outgoing_envelope() -> Envelope {
    Envelope::outgoing(
        EnvelopeId::from_ulid(Ulid::new()),
        Ping::message_type(),
        br#"{"seq":1}"#.to_vec(),
        DEFAULT_CONTENT_TYPE,
        url("memory://peer"),
        t0(),
    )
}

// ----------------------------------------------------------------------------
// messages
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Ping {
    pub seq: u64,
}

impl Message for Ping {
    const TYPE: &'static str = "test.ping.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Pong {
    pub seq: u64,
}

impl Message for Pong {
    const TYPE: &'static str = "test.pong.v1";
}

/// Plain string message; travels as `text/plain` when the destination wants it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Text(pub String);

impl Message for Text {
    const TYPE: &'static str = "test.text.v1";
}

// ----------------------------------------------------------------------------
// handlers
// ----------------------------------------------------------------------------

/// Records every `seq` it handles.
#[derive(Clone, Default)]
pub(crate) struct RecordingHandler {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl RecordingHandler {
    pub async fn seen(&self) -> Vec<u64> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Handler<Ping> for RecordingHandler {
    async fn handle(&self, message: Ping, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        self.seen.lock().await.push(message.seq);
        Ok(())
    }
}

/// Records every `Text` it handles.
#[derive(Clone, Default)]
pub(crate) struct TextRecorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl TextRecorder {
    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Handler<Text> for TextRecorder {
    async fn handle(&self, message: Text, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        self.seen.lock().await.push(message.0);
        Ok(())
    }
}

/// Fails transiently `n` times, then succeeds.
pub(crate) struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    pub fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Ping> for FlakyHandler {
    async fn handle(&self, _message: Ping, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::transient(format!(
                "intentional failure (attempts={})",
                ctx.attempts()
            )));
        }
        Ok(())
    }
}

/// Answers every `Ping` with a `Pong`, both as a follow-up send and a reply.
pub(crate) struct PongReplier;

#[async_trait]
impl Handler<Ping> for PongReplier {
    async fn handle(&self, message: Ping, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let pong = Pong { seq: message.seq };
        ctx.send(&pong).await?;
        ctx.respond(&pong).await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// store with injected outages
// ----------------------------------------------------------------------------

/// In-memory store that can be told to fail upcoming writes with `StoreUnavailable`.
#[derive(Clone)]
pub(crate) struct OutageStore {
    inner: InMemoryEnvelopeStore,
    /// Operations still allowed through before the outage starts.
    grace: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
}

impl OutageStore {
    pub fn healthy() -> Self {
        Self {
            inner: InMemoryEnvelopeStore::new(Duration::from_secs(30)),
            grace: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The next `n` operations fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_after(0, n);
    }

    /// `ok` operations succeed, then `n` fail.
    pub fn fail_after(&self, ok: u32, n: u32) {
        self.grace.store(ok, Ordering::SeqCst);
        self.failures.store(n, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<Envelope> {
        self.inner.all().await
    }

    fn trip(&self) -> Result<(), CourierError> {
        let in_grace = self
            .grace
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if in_grace {
            return Ok(());
        }
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(CourierError::StoreUnavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EnvelopeStore for OutageStore {
    async fn persist(&self, envelope: Envelope) -> Result<(), CourierError> {
        self.trip()?;
        self.inner.persist(envelope).await
    }

    async fn claim_due(
        &self,
        owner: &NodeId,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Envelope>, CourierError> {
        self.trip()?;
        self.inner.claim_due(owner, max_count, now).await
    }

    async fn mark_handled(&self, id: EnvelopeId, owner: &NodeId) -> Result<(), CourierError> {
        self.trip()?;
        self.inner.mark_handled(id, owner).await
    }

    async fn reschedule(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        execution_time: DateTime<Utc>,
        attempts: u32,
        reason: Option<String>,
    ) -> Result<(), CourierError> {
        self.trip()?;
        self.inner
            .reschedule(id, owner, execution_time, attempts, reason)
            .await
    }

    async fn move_to_dead_letter(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        reason: String,
    ) -> Result<(), CourierError> {
        self.trip()?;
        self.inner.move_to_dead_letter(id, owner, reason).await
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, CourierError> {
        self.trip()?;
        self.inner.release_expired_claims(now).await
    }

    async fn find(&self, id: EnvelopeId) -> Result<Option<Envelope>, CourierError> {
        self.inner.find(id).await
    }

    async fn dead_letters(&self) -> Result<Vec<Envelope>, CourierError> {
        self.inner.dead_letters().await
    }

    async fn counts_by_status(&self) -> Result<EnvelopeCounts, CourierError> {
        self.inner.counts_by_status().await
    }
}

// ----------------------------------------------------------------------------
// harness
// ----------------------------------------------------------------------------

pub(crate) fn harness() -> HarnessBuilder {
    HarnessBuilder {
        app: AppBuilder::new(),
        settings: Settings {
            node_id: NodeId::new("test-node"),
            polling_interval_ms: 10,
            ..Settings::default()
        },
        rules: Vec::new(),
        subscriptions: Vec::new(),
    }
}

pub(crate) struct HarnessBuilder {
    app: AppBuilder,
    settings: Settings,
    rules: Vec<RoutingRule>,
    subscriptions: Vec<Subscription>,
}

impl HarnessBuilder {
    pub fn route<M: Message>(self, destination: &str) -> Self {
        self.rule(RoutingRule::new(M::TYPE, url(destination)))
    }

    pub fn rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Routed through a dynamic subscription, so the build-time scheme check does not apply.
    pub fn unchecked_route<M: Message>(mut self, destination: &str) -> Self {
        self.subscriptions
            .push(Subscription::new(M::TYPE, url(destination)));
        self
    }

    pub fn handler<M: Message, H: Handler<M> + 'static>(mut self, handler: H) -> Self {
        self.app = self.app.register::<M, H>(handler).unwrap();
        self
    }

    pub fn settings(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = OutageStore::healthy();
        let memory = InMemorySender::new();

        let mut settings = self.settings;
        settings.routing = self.rules;

        let mut app = self
            .app
            .settings(settings)
            .clock(clock.clone())
            .store(Arc::new(store.clone()))
            .sender(Arc::new(memory.clone()));
        for subscription in self.subscriptions {
            app = app.subscribe(subscription);
        }

        Harness {
            bus: app.build().unwrap(),
            clock,
            store,
            memory,
        }
    }
}

pub(crate) struct Harness {
    pub bus: Bus,
    pub clock: Arc<FixedClock>,
    pub store: OutageStore,
    pub memory: InMemorySender,
}

impl Harness {
    pub fn messaging(&self) -> MessageContext {
        self.bus.messaging().clone()
    }

    /// An unpersisted incoming envelope, as a listener would hand it over.
    pub fn incoming<M: Message>(&self, body: &Value) -> Envelope {
        Envelope::new(
            EnvelopeId::from_ulid(Ulid::new()),
            M::message_type(),
            serde_json::to_vec(body).unwrap(),
            DEFAULT_CONTENT_TYPE,
            self.clock.now(),
        )
    }

    /// An unpersisted outgoing envelope.
    pub fn outgoing<M: Message>(&self, destination: &str, body: &Value) -> Envelope {
        Envelope::outgoing(
            EnvelopeId::from_ulid(Ulid::new()),
            M::message_type(),
            serde_json::to_vec(body).unwrap(),
            DEFAULT_CONTENT_TYPE,
            url(destination),
            self.clock.now(),
        )
    }

    pub async fn status(&self, id: EnvelopeId) -> EnvelopeStatus {
        self.store.find(id).await.unwrap().unwrap().status
    }
}
