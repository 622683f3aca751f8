//! Dispatcher port - Incoming envelope をハンドラへ渡す
//!
//! # 契約
//! - 登録済みの 0 個以上のハンドラを順に呼び出す
//! - 結果を `DeliveryOutcome` の三値に分類して返す
//! - `MessageContext` を受け取るので、ハンドラ内から再入的に send / respond できる

use async_trait::async_trait;

use crate::app::context::MessageContext;
use crate::domain::{DeliveryOutcome, Envelope, MessageTypeAlias};

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, envelope: &Envelope, messaging: &MessageContext) -> DeliveryOutcome;

    /// Message types with at least one handler (used for start-up validation).
    fn handled_types(&self) -> Vec<MessageTypeAlias>;
}
