//! Errors - エラー型と運用分類
//!
//! すべての失敗は `ErrorKind` に分類されます。
//! - Configuration: 設定ミス（未登録 scheme、共通 content type なし）。リトライしない
//! - Transient: 一時的なエラー（リトライ推奨）
//! - Permanent: 恒久的なエラー（リトライ無意味、dead-letter 行き）
//! - Infrastructure: store の障害。sweep はそのサイクルを諦めて次の tick で再試行

use thiserror::Error;

use super::envelope::EnvelopeStatus;
use super::ids::{EnvelopeId, NodeId};
use super::message_type::MessageTypeAlias;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Clone, Error)]
pub enum CourierError {
    #[error("no sender registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error(
        "no common content type for message_type={message_type} destination={destination} (accepts {accepted:?})"
    )]
    NoCommonContentType {
        message_type: MessageTypeAlias,
        destination: String,
        accepted: Vec<String>,
    },

    #[error("no serializer registered for content type '{0}'")]
    NoSerializer(String),

    #[error("envelope {0} already exists")]
    DuplicateEnvelope(EnvelopeId),

    #[error("envelope {0} not found")]
    EnvelopeNotFound(EnvelopeId),

    #[error("envelope {id} cannot {action} from status {status:?}")]
    InvalidTransition {
        id: EnvelopeId,
        status: EnvelopeStatus,
        action: &'static str,
    },

    #[error("envelope {id} attempts cannot decrease ({current} -> {requested})")]
    AttemptsDecreased {
        id: EnvelopeId,
        current: u32,
        requested: u32,
    },

    /// The claim expired and another node holds the envelope now.
    #[error("envelope {id} is claimed by {holder}; outcome from this node discarded")]
    ClaimLost { id: EnvelopeId, holder: NodeId },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("transport failed: {0}")]
    Transport(String),
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::UnknownScheme(_)
            | CourierError::NoCommonContentType { .. }
            | CourierError::NoSerializer(_) => ErrorKind::Configuration,
            CourierError::StoreUnavailable(_) => ErrorKind::Infrastructure,
            CourierError::Transport(_) => ErrorKind::Transient,
            CourierError::DuplicateEnvelope(_)
            | CourierError::EnvelopeNotFound(_)
            | CourierError::InvalidTransition { .. }
            | CourierError::AttemptsDecreased { .. }
            | CourierError::ClaimLost { .. }
            | CourierError::Serialization(_) => ErrorKind::Permanent,
        }
    }

    /// Worth retrying the same operation later?
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Infrastructure)
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(e: serde_json::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unknown_scheme(CourierError::UnknownScheme("ftp".into()), ErrorKind::Configuration)]
    #[case::no_serializer(CourierError::NoSerializer("text/csv".into()), ErrorKind::Configuration)]
    #[case::store(CourierError::StoreUnavailable("down".into()), ErrorKind::Infrastructure)]
    #[case::transport(CourierError::Transport("reset".into()), ErrorKind::Transient)]
    #[case::serialization(CourierError::Serialization("bad".into()), ErrorKind::Permanent)]
    fn errors_are_classified(#[case] err: CourierError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn only_transient_and_infrastructure_are_retryable() {
        assert!(CourierError::StoreUnavailable("down".into()).is_retryable());
        assert!(!CourierError::UnknownScheme("ftp".into()).is_retryable());
    }
}
