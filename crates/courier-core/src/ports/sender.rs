//! Sender port - destination scheme ごとの送信実装
//!
//! 各 Sender は自分の接続・リソースのライフサイクルを持ち、結果を
//! `DeliveryOutcome` の三値に分類して返すだけ。retry / dead-letter は判断しない。

use async_trait::async_trait;

use crate::domain::{DeliveryOutcome, Envelope};

/// Must be safe for concurrent use by many in-flight sends.
#[async_trait]
pub trait Sender: Send + Sync {
    /// URI scheme this sender owns (e.g. `"tcp"`).
    fn scheme(&self) -> &str;

    async fn send(&self, envelope: &Envelope) -> DeliveryOutcome;
}
