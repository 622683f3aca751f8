//! HandlerRegistry - message type -> 順序付き handler リスト
//!
//! 起動時に組み立てて、実行中は読むだけ（ロック不要）。
//! `Dispatcher` を実装しているので、MessageContext からはこれ 1 つを呼べばよい。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{DynHandler, Handler, HandlerContext, TypedHandler};
use super::message::Message;
use crate::app::context::MessageContext;
use crate::domain::{DeliveryOutcome, Envelope, MessageTypeAlias};
use crate::ports::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{handler}' is already registered for message type '{message_type}'")]
    AlreadyRegistered {
        message_type: String,
        handler: &'static str,
    },
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageTypeAlias, Vec<Arc<dyn DynHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `M`. Several handlers per message type are allowed
    /// and run in registration order; the same handler type twice is not.
    pub fn register<M: Message, H: Handler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let handler: Arc<dyn DynHandler> = Arc::new(TypedHandler::<M, H>::new(handler));
        let handlers = self.handlers.entry(M::message_type()).or_default();
        if handlers
            .iter()
            .any(|h| h.handler_name() == handler.handler_name())
        {
            return Err(RegistryError::AlreadyRegistered {
                message_type: M::TYPE.to_string(),
                handler: handler.handler_name(),
            });
        }
        handlers.push(handler);
        Ok(())
    }

    pub fn get(&self, message_type: &MessageTypeAlias) -> &[Arc<dyn DynHandler>] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn registered_types(&self) -> Vec<MessageTypeAlias> {
        let mut types: Vec<MessageTypeAlias> = self
            .handlers
            .iter()
            .filter(|(_, hs)| !hs.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }
}

#[async_trait]
impl Dispatcher for HandlerRegistry {
    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id, message_type = %envelope.message_type))]
    async fn dispatch(&self, envelope: &Envelope, messaging: &MessageContext) -> DeliveryOutcome {
        let handlers = self.get(&envelope.message_type);
        if handlers.is_empty() {
            tracing::warn!("no handler registered; treating envelope as handled");
            return DeliveryOutcome::Delivered;
        }

        let payload = match messaging
            .serializers()
            .read(&envelope.content_type, &envelope.payload)
        {
            Ok(payload) => payload,
            Err(e) => return DeliveryOutcome::permanent(e.to_string()),
        };

        let ctx = HandlerContext::new(envelope.clone(), messaging.clone());
        for handler in handlers {
            if let Err(e) = handler.handle_dyn(payload.clone(), &ctx).await {
                tracing::debug!(handler = handler.handler_name(), error = %e, "handler failed");
                return e.into();
            }
        }
        DeliveryOutcome::Delivered
    }

    fn handled_types(&self) -> Vec<MessageTypeAlias> {
        self.registered_types()
    }
}
