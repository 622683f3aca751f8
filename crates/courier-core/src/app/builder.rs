//! AppBuilder - Bus の構築とワイヤリング
//!
//! # Fail-fast 設計
//! `build()` 時に以下を検証し、不足があれば `BuildError` を返す。
//! - `expect_message_types()` で宣言した message type すべてに handler があるか
//! - 静的ルールの destination scheme すべてに Sender が登録されているか
//! - batch_size / max_parallelism / max_attempts が 0 でないか
//!
//! 省略したコンポーネントは開発用の既定値（InMemoryEnvelopeStore, SystemClock,
//! DefaultDecider）で埋める。`loopback` scheme の Sender は常に用意される。

use std::sync::Arc;

use tokio::sync::Notify;

use super::context::{ContextParts, Delivery, MessageContext};
use super::poller::Poller;
use super::policy::DeliveryPolicy;
use super::settings::Settings;
use super::status::EnvelopeCounts;
use crate::domain::{
    CourierError, Decider, DefaultDecider, Envelope, EnvelopeId, Subscription,
};
use crate::impls::inmem_store::InMemoryEnvelopeStore;
use crate::impls::loopback::LoopbackSender;
use crate::ports::{Clock, EnvelopeStore, IdGenerator, MessageSerializer, Sender, SystemClock, UlidGenerator};
use crate::routing::{RoutingRule, SubscriptionTable};
use crate::serialization::SerializerRegistry;
use crate::transport::TransportRegistry;
use crate::typed::{Handler, HandlerRegistry, Message, RegistryError};

/// # 使用例
/// ```ignore
/// let bus = AppBuilder::new()
///     .settings(settings)
///     .register::<InvoiceCreated, _>(InvoiceCreatedHandler)?
///     .expect_message_types(&[InvoiceCreated::TYPE])
///     .route(RoutingRule::new(InvoiceCreated::TYPE, "loopback://local".parse()?))
///     .build()?;
/// let poller = bus.start_poller();
/// ```
pub struct AppBuilder {
    settings: Settings,
    registry: HandlerRegistry,
    expected_types: Option<Vec<String>>,
    subscriptions: Vec<Subscription>,
    senders: Vec<Arc<dyn Sender>>,
    serializers: SerializerRegistry,
    store: Option<Arc<dyn EnvelopeStore>>,
    clock: Option<Arc<dyn Clock>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing message types: {0:?}. These were expected but have no handler.")]
    MissingMessageTypes(Vec<String>),

    #[error("No sender for scheme '{scheme}' used by routing rule destination {destination}")]
    UnknownScheme { scheme: String, destination: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            registry: HandlerRegistry::new(),
            expected_types: None,
            subscriptions: Vec::new(),
            senders: Vec::new(),
            serializers: SerializerRegistry::default(),
            store: None,
            clock: None,
            decider: None,
        }
    }

    /// Replaces all settings, including previously added routing rules.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<M, H>(handler)?;
        Ok(self)
    }

    pub fn expect_message_types(mut self, message_types: &[&str]) -> Self {
        self.expected_types = Some(message_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Append a static routing rule.
    pub fn route(mut self, rule: RoutingRule) -> Self {
        self.settings.routing.push(rule);
        self
    }

    /// Dynamic subscription registered at start-up.
    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.senders.push(sender);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializers.register(serializer);
        self
    }

    pub fn store(mut self, store: Arc<dyn EnvelopeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<Bus, BuildError> {
        self.validate_settings()?;
        self.validate_expected_types()?;

        let settings = Arc::new(self.settings);
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let store: Arc<dyn EnvelopeStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryEnvelopeStore::with_handled_retention(
                settings.claim_timeout(),
                settings.handled_retention,
            )),
        };
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(
                settings.max_attempts,
                settings.retry.clone(),
            )),
        };
        let wake = Arc::new(Notify::new());

        let mut transports = TransportRegistry::new();
        transports.register(Arc::new(LoopbackSender::new(
            store.clone(),
            ids.clone(),
            clock.clone(),
            wake.clone(),
        )));
        for sender in self.senders {
            transports.register(sender);
        }

        let routes = SubscriptionTable::new(settings.routing.clone());
        for destination in routes.static_destinations() {
            if transports.resolve(&destination).is_err() {
                return Err(BuildError::UnknownScheme {
                    scheme: destination.scheme().to_string(),
                    destination: destination.to_string(),
                });
            }
        }
        for subscription in self.subscriptions {
            routes.register(subscription);
        }

        let policy = DeliveryPolicy::new(
            settings.node_id.clone(),
            store.clone(),
            decider,
            clock.clone(),
            settings.store_retry_attempts,
        );

        tracing::info!(
            node_id = %settings.node_id,
            schemes = ?transports.schemes(),
            handled_types = self.registry.registered_types().len(),
            "bus built"
        );

        let context = MessageContext::new(ContextParts {
            settings,
            store,
            routes: Arc::new(routes),
            transports,
            serializers: self.serializers,
            dispatcher: Arc::new(self.registry),
            clock,
            ids,
            policy,
            wake,
        });
        Ok(Bus { context })
    }

    fn validate_settings(&self) -> Result<(), BuildError> {
        let s = &self.settings;
        if s.batch_size == 0 {
            return Err(BuildError::InvalidSettings("batch_size must be at least 1".into()));
        }
        if s.max_parallelism == 0 {
            return Err(BuildError::InvalidSettings(
                "max_parallelism must be at least 1".into(),
            ));
        }
        if s.max_attempts == 0 {
            return Err(BuildError::InvalidSettings("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    fn validate_expected_types(&self) -> Result<(), BuildError> {
        let Some(expected) = &self.expected_types else {
            return Ok(());
        };
        let registered = self.registry.registered_types();
        let missing: Vec<String> = expected
            .iter()
            .filter(|t| !registered.iter().any(|r| r.as_str() == t.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BuildError::MissingMessageTypes(missing))
        }
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The built runtime: a wired `MessageContext` plus inspection helpers.
pub struct Bus {
    context: MessageContext,
}

impl Bus {
    pub fn messaging(&self) -> &MessageContext {
        &self.context
    }

    pub fn start_poller(&self) -> Poller {
        Poller::spawn(self.context.clone())
    }

    pub async fn send<M: Message>(&self, message: &M) -> Result<Vec<Delivery>, CourierError> {
        self.context.send(message).await
    }

    pub async fn publish<M: Message>(&self, message: &M) -> Result<Vec<Delivery>, CourierError> {
        self.context.publish(message).await
    }

    pub async fn find(&self, id: EnvelopeId) -> Result<Option<Envelope>, CourierError> {
        self.context.store().find(id).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<Envelope>, CourierError> {
        self.context.store().dead_letters().await
    }

    pub async fn counts(&self) -> Result<EnvelopeCounts, CourierError> {
        self.context.store().counts_by_status().await
    }
}
