//! Handler trait - Message を処理する Handler の定義
//!
//! - ジェネリック trait (`Handler<M>`) で Message と Handler の対応をコンパイル時に保証
//! - Object-safe trait (`DynHandler`) で `Vec<Arc<dyn DynHandler>>` に格納
//! - `TypedHandler<M, H>` が両者をつなぐ（type erasure）
//!
//! 失敗は `HandlerError` の二値で宣言する。retry するかどうかを決めるのは Decider で、
//! handler ではない。

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use super::message::Message;
use crate::app::context::{Delivery, MessageContext};
use crate::domain::{CourierError, DeliveryOutcome, Envelope, EnvelopeId, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Worth another attempt (timeouts, contention, a dependency being down).
    #[error("transient: {0}")]
    Transient(String),

    /// Will fail the same way every time (bad payload, business rule violation).
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        HandlerError::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        HandlerError::Permanent(reason.into())
    }
}

impl From<HandlerError> for DeliveryOutcome {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Transient(reason) => DeliveryOutcome::TransientFailure(reason),
            HandlerError::Permanent(reason) => DeliveryOutcome::PermanentFailure(reason),
        }
    }
}

/// Lets handlers use `?` on messaging calls.
impl From<CourierError> for HandlerError {
    fn from(err: CourierError) -> Self {
        match err.kind() {
            ErrorKind::Transient | ErrorKind::Infrastructure => {
                HandlerError::Transient(err.to_string())
            }
            ErrorKind::Configuration | ErrorKind::Permanent => {
                HandlerError::Permanent(err.to_string())
            }
        }
    }
}

/// What a handler sees besides the message itself.
pub struct HandlerContext {
    envelope: Envelope,
    messaging: MessageContext,
}

impl HandlerContext {
    pub fn new(envelope: Envelope, messaging: MessageContext) -> Self {
        Self {
            envelope,
            messaging,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Failed attempts before this one.
    pub fn attempts(&self) -> u32 {
        self.envelope.attempts
    }

    pub fn messaging(&self) -> &MessageContext {
        &self.messaging
    }

    /// Send a follow-up message caused by the one being handled.
    pub async fn send<M: Message>(&self, message: &M) -> Result<Vec<Delivery>, CourierError> {
        self.messaging.send_caused_by(&self.envelope, message).await
    }

    /// Schedule a follow-up message caused by the one being handled.
    pub async fn schedule_send<M: Message>(
        &self,
        message: &M,
        execution_time: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>, CourierError> {
        self.messaging
            .schedule_send_caused_by(&self.envelope, message, execution_time)
            .await
    }

    /// Reply to the envelope's `reply_uri`; a no-op when there is none.
    pub async fn respond<M: Message>(&self, reply: &M) -> Result<Option<Delivery>, CourierError> {
        self.messaging.respond(&self.envelope, reply).await
    }

    pub fn reply_uri(&self) -> Option<&Url> {
        self.envelope.reply_uri.as_ref()
    }
}

/// # 使用例
/// ```ignore
/// struct InvoiceCreatedHandler;
///
/// #[async_trait]
/// impl Handler<InvoiceCreated> for InvoiceCreatedHandler {
///     async fn handle(&self, message: InvoiceCreated, ctx: &HandlerContext) -> Result<(), HandlerError> {
///         println!("invoice {}", message.invoice_id);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: M, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError>;

    fn message_type(&self) -> &'static str;

    /// Rust type name of the wrapped handler (diagnostics and duplicate detection).
    fn handler_name(&self) -> &'static str;
}

pub struct TypedHandler<M: Message, H: Handler<M>> {
    handler: H,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message, H: Handler<M>> TypedHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

/// Text-carried payloads (`text/plain`) arrive as JSON strings. When `M` is
/// not string-shaped, the text is parsed as a JSON literal instead (`"42"` -> `42`).
fn decode<M: Message>(payload: serde_json::Value) -> Result<M, serde_json::Error> {
    match payload {
        serde_json::Value::String(text) => {
            serde_json::from_value::<M>(serde_json::Value::String(text.clone()))
                .or_else(|e| serde_json::from_str::<M>(&text).map_err(|_| e))
        }
        other => serde_json::from_value(other),
    }
}

#[async_trait]
impl<M: Message, H: Handler<M> + 'static> DynHandler for TypedHandler<M, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        // a payload that does not decode now never will
        let message = decode::<M>(payload)
            .map_err(|e| HandlerError::permanent(format!("decode {}: {e}", M::TYPE)))?;
        self.handler.handle(message, ctx).await
    }

    fn message_type(&self) -> &'static str {
        M::TYPE
    }

    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }
}
