//! DeliveryPolicy - Decider の判断を store に反映する
//!
//! # フロー
//! 1. `Decider::decide(envelope, outcome)` で Decision を得る（純粋関数）
//! 2. Decision を store 操作に変換（mark_handled / reschedule / move_to_dead_letter）
//! 3. store 操作が retryable なエラー（StoreUnavailable など）で失敗したら短い backoff で再試行
//!
//! store への書き込みは自ノード（`owner`）名義。claim が期限切れで他ノードに移っていたら
//! `ClaimLost` になり、結果は捨てられる（envelope は新しい holder が処理する）。
//!
//! 再試行しきっても失敗した場合は呼び出し側にエラーを返す。envelope は claim されたまま残り、
//! claim timeout 後に別の sweep で拾い直される。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    CourierError, Decider, Decision, DeliveryOutcome, Envelope, NodeId, RetryPolicy,
};
use crate::ports::{Clock, EnvelopeStore, chrono_duration};

pub struct DeliveryPolicy {
    owner: NodeId,
    store: Arc<dyn EnvelopeStore>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    store_retry_attempts: u32,
    store_backoff: RetryPolicy,
}

impl DeliveryPolicy {
    pub fn new(
        owner: NodeId,
        store: Arc<dyn EnvelopeStore>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        store_retry_attempts: u32,
    ) -> Self {
        Self {
            owner,
            store,
            decider,
            clock,
            store_retry_attempts: store_retry_attempts.max(1),
            store_backoff: RetryPolicy::new(
                Duration::from_millis(50),
                2.0,
                Duration::from_secs(1),
            ),
        }
    }

    pub async fn apply(
        &self,
        envelope: &Envelope,
        outcome: &DeliveryOutcome,
    ) -> Result<Decision, CourierError> {
        let decision = self.decider.decide(envelope, outcome);
        let id = envelope.id;
        let store = &self.store;
        let owner = &self.owner;

        match &decision {
            Decision::Complete => {
                self.with_store_retry("mark_handled", move || store.mark_handled(id, owner))
                    .await?;
            }
            Decision::Retry {
                delay,
                attempts,
                reason,
            } => {
                let execution_time = self.clock.now() + chrono_duration(*delay);
                let attempts = *attempts;
                tracing::debug!(
                    envelope_id = %id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "rescheduling envelope"
                );
                self.with_store_retry("reschedule", move || {
                    store.reschedule(id, owner, execution_time, attempts, Some(reason.clone()))
                })
                .await?;
            }
            Decision::DeadLetter { reason } => {
                tracing::warn!(
                    envelope_id = %id,
                    message_type = %envelope.message_type,
                    attempts = envelope.attempts,
                    reason = %reason,
                    "moving envelope to dead letter"
                );
                self.with_store_retry("move_to_dead_letter", move || {
                    store.move_to_dead_letter(id, owner, reason.clone())
                })
                .await?;
            }
        }
        Ok(decision)
    }

    /// Retry `op` while it fails with a retryable error, up to `store_retry_attempts` tries.
    pub async fn with_store_retry<T, F, Fut>(
        &self,
        op_name: &'static str,
        mut op: F,
    ) -> Result<T, CourierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CourierError>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && tries < self.store_retry_attempts => {
                    let delay = self.store_backoff.next_delay(tries);
                    tracing::debug!(op = op_name, tries, error = %e, "store operation failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
