//! EnvelopeStore port - envelope の永続化と claim の正本（source of truth）
//!
//! # 設計原則
//! - 各操作は単一トランザクションとして原子的に実装すること
//! - `claim_due` が唯一の同期点。同じ store を共有する複数 worker / ノード間でも、
//!   同じ envelope を同時に二重処理しない
//! - claim の期限切れ回収（`release_expired_claims`）がクラッシュ越しの at-least-once を保証する
//! - 完了系の操作（mark_handled / reschedule / move_to_dead_letter）は `owner` を受け取る。
//!   別ノードが claim を持っていたら `ClaimLost` で拒否する（期限切れ後の遅れた結果で
//!   他ノードの claim を外さない）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::EnvelopeCounts;
use crate::domain::{CourierError, Envelope, EnvelopeId, NodeId};

#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Write a new envelope. Fails with `DuplicateEnvelope` if the id exists.
    async fn persist(&self, envelope: Envelope) -> Result<(), CourierError>;

    /// Atomically claim up to `max_count` due, unclaimed (or claim-expired)
    /// non-terminal envelopes for `owner` and return them.
    async fn claim_due(
        &self,
        owner: &NodeId,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Envelope>, CourierError>;

    /// Archive (or delete) as handled. Idempotent, including for unknown ids.
    async fn mark_handled(&self, id: EnvelopeId, owner: &NodeId) -> Result<(), CourierError>;

    /// Release the claim, record `attempts`, set the new due time.
    async fn reschedule(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        execution_time: DateTime<Utc>,
        attempts: u32,
        reason: Option<String>,
    ) -> Result<(), CourierError>;

    /// Terminal transition; releases the claim.
    async fn move_to_dead_letter(
        &self,
        id: EnvelopeId,
        owner: &NodeId,
        reason: String,
    ) -> Result<(), CourierError>;

    /// Release claims older than the store's claim timeout. Returns how many.
    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, CourierError>;

    async fn find(&self, id: EnvelopeId) -> Result<Option<Envelope>, CourierError>;

    async fn dead_letters(&self) -> Result<Vec<Envelope>, CourierError>;

    async fn counts_by_status(&self) -> Result<EnvelopeCounts, CourierError>;
}
