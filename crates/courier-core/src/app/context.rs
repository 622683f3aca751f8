//! MessageContext - アプリケーションから見た送受信 API
//!
//! # Outbox 不変条件
//! どの操作も「先に store へ永続化、その後で transport / handler を呼ぶ」。
//! 永続化が成功した時点で呼び出し側には成功を返し、配送の成否は
//! DeliveryPolicy が store に反映する（dead-letter の確認や `Delivery::wait` で観測）。
//!
//! 即時送信する envelope は自ノードが claim した状態で永続化するので、
//! 実行中の送信と poller が同じ envelope を取り合うことはない。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use url::Url;

use super::policy::DeliveryPolicy;
use super::settings::Settings;
use crate::domain::{
    CourierError, Decision, DeliveryOutcome, Envelope, EnvelopeId, EnvelopeStatus,
    MessageTypeAlias, NodeId, Subscription,
};
use crate::ports::{Clock, Dispatcher, EnvelopeStore, IdGenerator};
use crate::routing::{Route, SubscriptionTable};
use crate::serialization::SerializerRegistry;
use crate::transport::TransportRegistry;
use crate::typed::Message;

/// Handle to one in-flight immediate delivery.
///
/// Dropping it does not cancel the delivery.
pub struct Delivery {
    pub envelope_id: EnvelopeId,
    pub destination: Url,
    handle: JoinHandle<Result<Decision, CourierError>>,
}

impl Delivery {
    /// Wait for the first attempt and the decision recorded for it.
    pub async fn wait(self) -> Result<Decision, CourierError> {
        self.handle
            .await
            .map_err(|e| CourierError::Transport(format!("delivery task did not finish: {e}")))?
    }
}

/// Everything a context is wired from.
pub(crate) struct ContextParts {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn EnvelopeStore>,
    pub routes: Arc<SubscriptionTable>,
    pub transports: TransportRegistry,
    pub serializers: SerializerRegistry,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub policy: DeliveryPolicy,
    pub wake: Arc<Notify>,
}

struct ContextInner {
    settings: Arc<Settings>,
    store: Arc<dyn EnvelopeStore>,
    routes: Arc<SubscriptionTable>,
    transports: TransportRegistry,
    serializers: SerializerRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: DeliveryPolicy,
    wake: Arc<Notify>,
}

/// A message on its way out, before routing.
struct Outbound {
    message_type: MessageTypeAlias,
    body: Value,
    reply_uri: Option<Url>,
    parent: Option<Envelope>,
    execution_time: Option<DateTime<Utc>>,
}

impl Outbound {
    fn new<M: Message>(message: &M) -> Result<Self, CourierError> {
        Ok(Self {
            message_type: M::message_type(),
            body: serde_json::to_value(message)?,
            reply_uri: None,
            parent: None,
            execution_time: None,
        })
    }
}

#[derive(Clone)]
pub struct MessageContext {
    inner: Arc<ContextInner>,
}

impl MessageContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                settings: parts.settings,
                store: parts.store,
                routes: parts.routes,
                transports: parts.transports,
                serializers: parts.serializers,
                dispatcher: parts.dispatcher,
                clock: parts.clock,
                ids: parts.ids,
                policy: parts.policy,
                wake: parts.wake,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.settings.node_id
    }

    pub fn store(&self) -> &Arc<dyn EnvelopeStore> {
        &self.inner.store
    }

    pub fn routes(&self) -> &SubscriptionTable {
        &self.inner.routes
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.inner.transports
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.inner.serializers
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.inner.wake
    }

    pub fn subscribe(&self, subscription: Subscription) {
        self.inner.routes.register(subscription);
    }

    pub fn unsubscribe(&self, message_type: &MessageTypeAlias, destination: &Url) -> bool {
        self.inner.routes.unregister(message_type, destination)
    }

    // ------------------------------------------------------------------
    // outbound
    // ------------------------------------------------------------------

    /// Persist one envelope per resolved destination, then start delivering them.
    ///
    /// Returns once every envelope is persisted. No destination is a no-op.
    pub async fn send<M: Message>(&self, message: &M) -> Result<Vec<Delivery>, CourierError> {
        self.send_outbound(Outbound::new(message)?).await
    }

    /// Same path as `send`; fan-out to every subscriber.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<Vec<Delivery>, CourierError> {
        self.send(message).await
    }

    /// Bypass routing. The destination's `Accept` comes from a matching
    /// rule or subscription, else `application/json`.
    pub async fn send_to<M: Message>(
        &self,
        destination: Url,
        message: &M,
    ) -> Result<Delivery, CourierError> {
        let outbound = Outbound::new(message)?;
        let route = Route {
            accept: self
                .inner
                .routes
                .accept_for(&outbound.message_type, &destination),
            destination,
        };
        self.send_routed(outbound, route).await
    }

    /// `send`, asking receivers to reply to `reply_uri`.
    pub async fn send_with_reply<M: Message>(
        &self,
        message: &M,
        reply_uri: Url,
    ) -> Result<Vec<Delivery>, CourierError> {
        let mut outbound = Outbound::new(message)?;
        outbound.reply_uri = Some(reply_uri);
        self.send_outbound(outbound).await
    }

    /// `send` carrying correlation from `parent`.
    pub async fn send_caused_by<M: Message>(
        &self,
        parent: &Envelope,
        message: &M,
    ) -> Result<Vec<Delivery>, CourierError> {
        let mut outbound = Outbound::new(message)?;
        outbound.parent = Some(parent.clone());
        self.send_outbound(outbound).await
    }

    /// Persist as `Scheduled`; the poller sends them once due.
    pub async fn schedule_send<M: Message>(
        &self,
        message: &M,
        execution_time: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>, CourierError> {
        let mut outbound = Outbound::new(message)?;
        outbound.execution_time = Some(execution_time);
        self.schedule_outbound(outbound).await
    }

    /// `schedule_send` carrying correlation from `parent`.
    pub async fn schedule_send_caused_by<M: Message>(
        &self,
        parent: &Envelope,
        message: &M,
        execution_time: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>, CourierError> {
        let mut outbound = Outbound::new(message)?;
        outbound.execution_time = Some(execution_time);
        outbound.parent = Some(parent.clone());
        self.schedule_outbound(outbound).await
    }

    /// Reply to `original.reply_uri`; `Ok(None)` when it has none.
    pub async fn respond<M: Message>(
        &self,
        original: &Envelope,
        reply: &M,
    ) -> Result<Option<Delivery>, CourierError> {
        let Some(reply_uri) = original.reply_uri.clone() else {
            tracing::debug!(envelope_id = %original.id, "no reply uri; response skipped");
            return Ok(None);
        };
        let mut outbound = Outbound::new(reply)?;
        outbound.parent = Some(original.clone());
        let route = Route {
            accept: self
                .inner
                .routes
                .accept_for(&outbound.message_type, &reply_uri),
            destination: reply_uri,
        };
        self.send_routed(outbound, route).await.map(Some)
    }

    async fn send_outbound(&self, outbound: Outbound) -> Result<Vec<Delivery>, CourierError> {
        let routes = self.inner.routes.routes(&outbound.message_type);
        if routes.is_empty() {
            self.warn_unrouted(&outbound.message_type);
            return Ok(Vec::new());
        }
        // negotiate every destination before persisting anything
        let envelopes = self.build_envelopes(&outbound, &routes)?;
        self.persist_all(&envelopes).await?;
        Ok(envelopes
            .into_iter()
            .zip(routes)
            .map(|(e, route)| self.spawn_delivery(e, route.destination))
            .collect())
    }

    async fn schedule_outbound(&self, outbound: Outbound) -> Result<Vec<EnvelopeId>, CourierError> {
        let routes = self.inner.routes.routes(&outbound.message_type);
        if routes.is_empty() {
            self.warn_unrouted(&outbound.message_type);
            return Ok(Vec::new());
        }
        let envelopes = self.build_envelopes(&outbound, &routes)?;
        self.persist_all(&envelopes).await?;
        tracing::debug!(
            message_type = %outbound.message_type,
            count = envelopes.len(),
            execution_time = ?outbound.execution_time,
            "scheduled envelopes persisted"
        );
        Ok(envelopes.iter().map(|e| e.id).collect())
    }

    async fn send_routed(&self, outbound: Outbound, route: Route) -> Result<Delivery, CourierError> {
        let envelope = self.build_envelope(&outbound, &route)?;
        self.persist_all(std::slice::from_ref(&envelope)).await?;
        Ok(self.spawn_delivery(envelope, route.destination))
    }

    fn warn_unrouted(&self, message_type: &MessageTypeAlias) {
        tracing::warn!(%message_type, "no destinations for message type; nothing sent");
    }

    fn build_envelopes(
        &self,
        outbound: &Outbound,
        routes: &[Route],
    ) -> Result<Vec<Envelope>, CourierError> {
        routes
            .iter()
            .map(|route| self.build_envelope(outbound, route))
            .collect()
    }

    fn build_envelope(&self, outbound: &Outbound, route: &Route) -> Result<Envelope, CourierError> {
        let serializer = self.inner.serializers.negotiate(
            &outbound.message_type,
            route.destination.as_str(),
            &route.accept,
        )?;
        let payload = serializer.write(&outbound.body)?;
        let now = self.inner.clock.now();

        let mut envelope = Envelope::outgoing(
            self.inner.ids.generate_envelope_id(),
            outbound.message_type.clone(),
            payload,
            serializer.content_type(),
            route.destination.clone(),
            now,
        )
        .with_reply_uri(outbound.reply_uri.clone());

        if let Some(parent) = &outbound.parent {
            envelope = envelope.caused_by(parent);
        }
        envelope = match outbound.execution_time {
            Some(at) => envelope.scheduled_for(at),
            None => envelope.claimed_by(self.node_id().clone(), now),
        };
        Ok(envelope)
    }

    async fn persist_all(&self, envelopes: &[Envelope]) -> Result<(), CourierError> {
        let store = &self.inner.store;
        for envelope in envelopes {
            self.inner
                .policy
                .with_store_retry("persist", move || store.persist(envelope.clone()))
                .await?;
        }
        Ok(())
    }

    fn spawn_delivery(&self, envelope: Envelope, destination: Url) -> Delivery {
        let envelope_id = envelope.id;
        let ctx = self.clone();
        let handle = tokio::spawn(async move { ctx.deliver(envelope).await });
        Delivery {
            envelope_id,
            destination,
            handle,
        }
    }

    // ------------------------------------------------------------------
    // attempts
    // ------------------------------------------------------------------

    /// One send attempt through the transport registry, then the policy.
    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id, attempts = envelope.attempts))]
    pub async fn deliver(&self, envelope: Envelope) -> Result<Decision, CourierError> {
        let outcome = match envelope.destination.as_ref() {
            None => DeliveryOutcome::permanent("outgoing envelope has no destination"),
            Some(destination) => match self.inner.transports.resolve(destination) {
                Ok(sender) => sender.send(&envelope).await,
                Err(e) => {
                    tracing::error!(%destination, error = %e, "cannot deliver envelope");
                    DeliveryOutcome::from(&e)
                }
            },
        };
        self.inner.policy.apply(&envelope, &outcome).await
    }

    /// One handling attempt through the dispatcher, then the policy.
    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id, attempts = envelope.attempts))]
    pub async fn handle_incoming(&self, envelope: Envelope) -> Result<Decision, CourierError> {
        let outcome = self.inner.dispatcher.dispatch(&envelope, self).await;
        self.inner.policy.apply(&envelope, &outcome).await
    }

    /// Route a claimed envelope to `deliver` or `handle_incoming` by status.
    pub async fn process(&self, envelope: Envelope) -> Result<Decision, CourierError> {
        match envelope.status {
            EnvelopeStatus::Incoming => self.handle_incoming(envelope).await,
            _ => self.deliver(envelope).await,
        }
    }

    // ------------------------------------------------------------------
    // inbound
    // ------------------------------------------------------------------

    /// Persist the inbox copy of a received envelope, claimed by this node.
    ///
    /// Once this returns the message is durable here and the sender may be acked.
    pub async fn accept_incoming(&self, envelope: &Envelope) -> Result<Envelope, CourierError> {
        let now = self.inner.clock.now();
        let incoming = envelope
            .to_incoming(self.inner.ids.generate_envelope_id(), now)
            .claimed_by(self.node_id().clone(), now);
        self.persist_all(std::slice::from_ref(&incoming)).await?;
        Ok(incoming)
    }

    /// `accept_incoming`, then handle it right away.
    pub async fn receive(&self, envelope: Envelope) -> Result<Decision, CourierError> {
        let incoming = self.accept_incoming(&envelope).await?;
        self.handle_incoming(incoming).await
    }
}
