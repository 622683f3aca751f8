//! SerializerRegistry - content type から serializer を引く
//!
//! 送信時は destination の `Accept` 集合と自分が書ける content type の共通部分から
//! 1 つ選ぶ。共通部分がなければ送信時に設定エラーとして返す（黙って落とさない）。

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{CourierError, MessageTypeAlias};
use crate::impls::serializers::{JsonSerializer, PlainTextSerializer};
use crate::ports::MessageSerializer;

#[derive(Clone)]
pub struct SerializerRegistry {
    serializers: HashMap<String, Arc<dyn MessageSerializer>>,
}

impl SerializerRegistry {
    pub fn empty() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }

    /// Last registration for a content type wins.
    pub fn register(&mut self, serializer: Arc<dyn MessageSerializer>) {
        self.serializers
            .insert(serializer.content_type().to_string(), serializer);
    }

    pub fn get(&self, content_type: &str) -> Result<Arc<dyn MessageSerializer>, CourierError> {
        self.serializers
            .get(content_type)
            .cloned()
            .ok_or_else(|| CourierError::NoSerializer(content_type.to_string()))
    }

    /// Pick the first content type of `accept` this node can write.
    ///
    /// `accept` is canonical (sorted), so the choice is deterministic.
    pub fn negotiate(
        &self,
        message_type: &MessageTypeAlias,
        destination: &str,
        accept: &[String],
    ) -> Result<Arc<dyn MessageSerializer>, CourierError> {
        accept
            .iter()
            .find_map(|ct| self.serializers.get(ct).cloned())
            .ok_or_else(|| CourierError::NoCommonContentType {
                message_type: message_type.clone(),
                destination: destination.to_string(),
                accepted: accept.to_vec(),
            })
    }

    pub fn read(&self, content_type: &str, bytes: &[u8]) -> Result<serde_json::Value, CourierError> {
        self.get(content_type)?.read(bytes)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonSerializer));
        registry.register(Arc::new(PlainTextSerializer));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias() -> MessageTypeAlias {
        MessageTypeAlias::new("test.ping.v1")
    }

    #[test]
    fn negotiates_first_writable_content_type() {
        let registry = SerializerRegistry::default();
        let accept = vec!["application/x-protobuf".to_string(), "text/plain".to_string()];
        let chosen = registry.negotiate(&alias(), "tcp://peer", &accept).unwrap();
        assert_eq!(chosen.content_type(), "text/plain");
    }

    #[test]
    fn no_common_content_type_is_a_configuration_error() {
        let registry = SerializerRegistry::default();
        let accept = vec!["application/x-protobuf".to_string()];
        let err = registry
            .negotiate(&alias(), "tcp://peer", &accept)
            .err()
            .unwrap();
        assert!(matches!(err, CourierError::NoCommonContentType { .. }));
        assert_eq!(err.kind(), crate::domain::ErrorKind::Configuration);
    }

    #[test]
    fn unknown_content_type_cannot_be_read() {
        let registry = SerializerRegistry::empty();
        assert!(matches!(
            registry.read("application/json", b"{}"),
            Err(CourierError::NoSerializer(_))
        ));
    }
}
