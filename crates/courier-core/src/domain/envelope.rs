//! Envelope - 配送中メッセージ 1 件とその配送メタデータ
//!
//! Envelope は store が唯一の正本（source of truth）です。
//! 状態遷移はメソッド経由でのみ行い、以下の不変条件を守ります。
//! - `{Scheduled|Outgoing|Incoming} -> Handled` または `-> DeadLetter` の単調遷移
//! - 終端状態からは復活しない
//! - `attempts` は減らない

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::CourierError;
use super::ids::{EnvelopeId, NodeId};
use super::message_type::MessageTypeAlias;

/// Envelope lifecycle.
///
/// State transitions:
/// - Outgoing -> Handled (delivered)
/// - Outgoing -> Outgoing (rescheduled with backoff, attempts + 1)
/// - Scheduled -> Handled / DeadLetter (once due, sent by the poller)
/// - Incoming -> Handled / DeadLetter (after local handling)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// Waiting to be sent to `destination`.
    Outgoing,

    /// Waiting for `execution_time` before it is sent.
    Scheduled,

    /// Received; waiting for local handling.
    Incoming,

    /// Delivered or handled successfully.
    Handled,

    /// Failed permanently or exhausted its attempts.
    DeadLetter,
}

impl EnvelopeStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EnvelopeStatus::Handled | EnvelopeStatus::DeadLetter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub message_type: MessageTypeAlias,
    pub payload: Vec<u8>,
    pub content_type: String,

    /// `None` for purely local / incoming envelopes.
    pub destination: Option<Url>,

    /// Where replies to this message should go.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_uri: Option<Url>,

    pub status: EnvelopeStatus,

    /// Failed attempts recorded so far.
    pub attempts: u32,

    /// Not eligible for send/handling before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    // pass-through only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EnvelopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<EnvelopeId>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Envelope {
    pub fn new(
        id: EnvelopeId,
        message_type: MessageTypeAlias,
        payload: Vec<u8>,
        content_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            message_type,
            payload,
            content_type: content_type.into(),
            destination: None,
            reply_uri: None,
            status: EnvelopeStatus::Incoming,
            attempts: 0,
            execution_time: None,
            owner: None,
            claimed_at: None,
            causation_id: None,
            conversation_id: None,
            created_at,
            last_error: None,
        }
    }

    /// An outgoing envelope bound for `destination`.
    pub fn outgoing(
        id: EnvelopeId,
        message_type: MessageTypeAlias,
        payload: Vec<u8>,
        content_type: impl Into<String>,
        destination: Url,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut envelope = Self::new(id, message_type, payload, content_type, created_at);
        envelope.destination = Some(destination);
        envelope.status = EnvelopeStatus::Outgoing;
        envelope
    }

    /// Hold until `at`; the poller sends it once due.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.status = EnvelopeStatus::Scheduled;
        self.execution_time = Some(at);
        self
    }

    pub fn with_reply_uri(mut self, reply_uri: Option<Url>) -> Self {
        self.reply_uri = reply_uri;
        self
    }

    /// Copy correlation from the envelope that caused this one.
    pub fn caused_by(mut self, parent: &Envelope) -> Self {
        self.causation_id = Some(parent.id);
        self.conversation_id = Some(parent.conversation_id.unwrap_or(parent.id));
        self
    }

    /// Claimed by `owner` at `now` (used when persisting work this node is about to do itself).
    pub fn claimed_by(mut self, owner: NodeId, now: DateTime<Utc>) -> Self {
        self.owner = Some(owner);
        self.claimed_at = Some(now);
        self
    }

    /// The inbox-side copy of a received envelope.
    ///
    /// Gets a fresh id so it never collides with the sender's record when both
    /// nodes share one store; the original id is kept as causation.
    pub fn to_incoming(&self, id: EnvelopeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            message_type: self.message_type.clone(),
            payload: self.payload.clone(),
            content_type: self.content_type.clone(),
            destination: None,
            reply_uri: self.reply_uri.clone(),
            status: EnvelopeStatus::Incoming,
            attempts: 0,
            execution_time: None,
            owner: None,
            claimed_at: None,
            causation_id: Some(self.id),
            conversation_id: Some(self.conversation_id.unwrap_or(self.id)),
            created_at: now,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execution_time.is_none_or(|at| at <= now)
    }

    /// Claim held past `claim_timeout`?
    pub fn claim_expired(&self, now: DateTime<Utc>, claim_timeout: Duration) -> bool {
        match self.claimed_at {
            Some(claimed_at) => match chrono::Duration::from_std(claim_timeout) {
                Ok(timeout) => claimed_at + timeout <= now,
                Err(_) => false,
            },
            None => self.owner.is_some(),
        }
    }

    /// Eligible for `claim_due`?
    pub fn is_claimable(&self, now: DateTime<Utc>, claim_timeout: Duration) -> bool {
        !self.status.is_terminal()
            && self.is_due(now)
            && (self.owner.is_none() || self.claim_expired(now, claim_timeout))
    }

    pub fn claim(&mut self, owner: NodeId, now: DateTime<Utc>) {
        self.owner = Some(owner);
        self.claimed_at = Some(now);
    }

    /// `owner` may complete this envelope: it holds the claim, or nobody does.
    pub fn check_owner(&self, owner: &NodeId) -> Result<(), CourierError> {
        match &self.owner {
            Some(holder) if holder != owner => Err(CourierError::ClaimLost {
                id: self.id,
                holder: holder.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn release_claim(&mut self) {
        self.owner = None;
        self.claimed_at = None;
    }

    /// Idempotent: handling an already handled envelope is a no-op.
    pub fn mark_handled(&mut self) -> Result<(), CourierError> {
        match self.status {
            EnvelopeStatus::Handled => Ok(()),
            EnvelopeStatus::DeadLetter => Err(self.invalid("mark handled")),
            _ => {
                self.status = EnvelopeStatus::Handled;
                self.release_claim();
                Ok(())
            }
        }
    }

    /// Release the claim, bump attempts, set a new due time.
    ///
    /// A scheduled envelope that failed its send becomes outgoing: it is no
    /// longer waiting for its original schedule, only for the backoff.
    pub fn reschedule(
        &mut self,
        execution_time: DateTime<Utc>,
        attempts: u32,
        error: Option<String>,
    ) -> Result<(), CourierError> {
        if self.status.is_terminal() {
            return Err(self.invalid("reschedule"));
        }
        if attempts < self.attempts {
            return Err(CourierError::AttemptsDecreased {
                id: self.id,
                current: self.attempts,
                requested: attempts,
            });
        }
        if self.status == EnvelopeStatus::Scheduled {
            self.status = EnvelopeStatus::Outgoing;
        }
        self.attempts = attempts;
        self.execution_time = Some(execution_time);
        if error.is_some() {
            self.last_error = error;
        }
        self.release_claim();
        Ok(())
    }

    pub fn mark_dead(&mut self, reason: impl Into<String>) -> Result<(), CourierError> {
        match self.status {
            EnvelopeStatus::DeadLetter => Ok(()),
            EnvelopeStatus::Handled => Err(self.invalid("dead-letter")),
            _ => {
                self.status = EnvelopeStatus::DeadLetter;
                self.last_error = Some(reason.into());
                self.release_claim();
                Ok(())
            }
        }
    }

    fn invalid(&self, action: &'static str) -> CourierError {
        CourierError::InvalidTransition {
            id: self.id,
            status: self.status,
            action,
        }
    }
}
