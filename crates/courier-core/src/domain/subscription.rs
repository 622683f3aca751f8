//! Subscription - destination の購読宣言
//!
//! `(message_type, destination)` が identity。同じ組を再登録すると
//! `accept` / `service_name` が置き換わる（last write wins）。

use serde::{Deserialize, Serialize};
use url::Url;

use super::message_type::MessageTypeAlias;

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub message_type: MessageTypeAlias,
    pub destination: Url,

    #[serde(default)]
    pub service_name: String,

    /// Canonical (sorted, deduplicated) content types. Never empty.
    #[serde(default = "default_accept", deserialize_with = "deserialize_accept")]
    accept: Vec<String>,
}

fn default_accept() -> Vec<String> {
    vec![DEFAULT_CONTENT_TYPE.to_string()]
}

fn deserialize_accept<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(canonical_accept(raw.unwrap_or_default()))
}

pub(crate) fn canonical_accept(mut accept: Vec<String>) -> Vec<String> {
    if accept.is_empty() {
        return default_accept();
    }
    accept.sort();
    accept.dedup();
    accept
}

impl Subscription {
    pub fn new(message_type: impl Into<MessageTypeAlias>, destination: Url) -> Self {
        Self {
            message_type: message_type.into(),
            destination,
            service_name: String::new(),
            accept: default_accept(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Unspecified / empty means `application/json`.
    pub fn with_accept<I, S>(mut self, accept: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_accept(accept);
        self
    }

    pub fn set_accept<I, S>(&mut self, accept: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accept = canonical_accept(accept.into_iter().map(Into::into).collect());
    }

    pub fn accept(&self) -> &[String] {
        &self.accept
    }

    /// Stable string key: `{message_type}/{url-encoded destination}`.
    pub fn id(&self) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(self.destination.as_str().as_bytes()).collect();
        format!("{}/{}", self.message_type, encoded)
    }

    pub fn key(&self) -> (MessageTypeAlias, Url) {
        (self.message_type.clone(), self.destination.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> Url {
        Url::parse("tcp://localhost:2201/").unwrap()
    }

    #[test]
    fn accept_defaults_to_json() {
        let sub = Subscription::new("test.ping.v1", dest());
        assert_eq!(sub.accept(), ["application/json"]);

        let sub = sub.with_accept(Vec::<String>::new());
        assert_eq!(sub.accept(), ["application/json"]);
    }

    #[test]
    fn accept_is_canonical_so_equality_ignores_order() {
        let a = Subscription::new("test.ping.v1", dest()).with_accept(["text/plain", "application/json"]);
        let b = Subscription::new("test.ping.v1", dest()).with_accept(["application/json", "text/plain", "text/plain"]);
        assert_eq!(a, b);
        assert_eq!(a.accept(), ["application/json", "text/plain"]);
    }

    #[test]
    fn id_url_encodes_destination() {
        let sub = Subscription::new("test.ping.v1", dest());
        assert_eq!(sub.id(), "test.ping.v1/tcp%3A%2F%2Flocalhost%3A2201%2F");
    }

    #[test]
    fn deserialized_accept_is_canonical() {
        let json = r#"{
            "message_type": "test.ping.v1",
            "destination": "tcp://localhost:2201/",
            "accept": ["text/plain", "application/json"]
        }"#;
        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.accept(), ["application/json", "text/plain"]);

        let json = r#"{ "message_type": "test.ping.v1", "destination": "tcp://localhost:2201/" }"#;
        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.accept(), ["application/json"]);
    }
}
