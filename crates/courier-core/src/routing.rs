//! SubscriptionTable - message type から destination を解決する
//!
//! # 構成
//! - **静的ルール**（`RoutingRule`）: 起動時の設定から。`message_type = None` は全メッセージ宛て
//! - **動的購読**（`Subscription`）: 実行中に `register` / `unregister` で upsert / 削除
//!
//! 解決結果は両者の和集合（destination で重複排除）。一致なしはエラーではなく空集合。
//! 同じ destination が両方にある場合、`Accept` は動的購読の値が優先されます。

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::subscription::canonical_accept;
use crate::domain::{DEFAULT_CONTENT_TYPE, MessageTypeAlias, Subscription};

/// Static publish rule supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// `None` routes every message type.
    #[serde(default)]
    pub message_type: Option<MessageTypeAlias>,

    pub destinations: Vec<Url>,

    /// Empty means `application/json`.
    #[serde(default)]
    pub accept: Vec<String>,
}

impl RoutingRule {
    pub fn new(message_type: impl Into<MessageTypeAlias>, destination: Url) -> Self {
        Self {
            message_type: Some(message_type.into()),
            destinations: vec![destination],
            accept: Vec::new(),
        }
    }

    /// Catch-all rule.
    pub fn all_messages_to(destination: Url) -> Self {
        Self {
            message_type: None,
            destinations: vec![destination],
            accept: Vec::new(),
        }
    }

    pub fn with_accept<I, S>(mut self, accept: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accept = accept.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, message_type: &MessageTypeAlias) -> bool {
        self.message_type
            .as_ref()
            .is_none_or(|rule_type| rule_type == message_type)
    }
}

/// One resolved destination with the content types it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Url,
    pub accept: Vec<String>,
}

pub struct SubscriptionTable {
    rules: Vec<RoutingRule>,
    dynamic: RwLock<HashMap<(MessageTypeAlias, Url), Subscription>>,
}

impl SubscriptionTable {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules,
            dynamic: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Upsert by `(message_type, destination)`.
    pub fn register(&self, subscription: Subscription) {
        let mut dynamic = self.dynamic.write().unwrap_or_else(|e| e.into_inner());
        dynamic.insert(subscription.key(), subscription);
    }

    /// Returns whether a subscription was removed.
    pub fn unregister(&self, message_type: &MessageTypeAlias, destination: &Url) -> bool {
        let mut dynamic = self.dynamic.write().unwrap_or_else(|e| e.into_inner());
        dynamic
            .remove(&(message_type.clone(), destination.clone()))
            .is_some()
    }

    /// Dynamic subscriptions, ordered by id.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let dynamic = self.dynamic.read().unwrap_or_else(|e| e.into_inner());
        let mut subscriptions: Vec<Subscription> = dynamic.values().cloned().collect();
        subscriptions.sort_by_key(|s| s.id());
        subscriptions
    }

    pub fn resolve(&self, message_type: &MessageTypeAlias) -> Vec<Url> {
        self.routes(message_type)
            .into_iter()
            .map(|route| route.destination)
            .collect()
    }

    /// Static rules first (in declaration order), then dynamic subscriptions.
    pub fn routes(&self, message_type: &MessageTypeAlias) -> Vec<Route> {
        let mut routes: Vec<Route> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(message_type)) {
            for destination in &rule.destinations {
                if routes.iter().any(|r| &r.destination == destination) {
                    continue;
                }
                routes.push(Route {
                    destination: destination.clone(),
                    accept: canonical_accept(rule.accept.clone()),
                });
            }
        }

        let dynamic = self.dynamic.read().unwrap_or_else(|e| e.into_inner());
        let mut subscribed: Vec<&Subscription> = dynamic
            .values()
            .filter(|s| &s.message_type == message_type)
            .collect();
        subscribed.sort_by(|a, b| a.destination.as_str().cmp(b.destination.as_str()));

        for subscription in subscribed {
            let accept = subscription.accept().to_vec();
            match routes
                .iter_mut()
                .find(|r| r.destination == subscription.destination)
            {
                Some(existing) => existing.accept = accept,
                None => routes.push(Route {
                    destination: subscription.destination.clone(),
                    accept,
                }),
            }
        }
        routes
    }

    /// Accept set for an explicitly addressed destination.
    pub fn accept_for(&self, message_type: &MessageTypeAlias, destination: &Url) -> Vec<String> {
        self.routes(message_type)
            .into_iter()
            .find(|r| &r.destination == destination)
            .map(|r| r.accept)
            .unwrap_or_else(|| vec![DEFAULT_CONTENT_TYPE.to_string()])
    }

    /// Every destination named by a static rule.
    pub fn static_destinations(&self) -> Vec<Url> {
        let mut destinations: Vec<Url> = Vec::new();
        for destination in self.rules.iter().flat_map(|r| r.destinations.iter()) {
            if !destinations.contains(destination) {
                destinations.push(destination.clone());
            }
        }
        destinations
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
