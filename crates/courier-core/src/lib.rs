//! courier-core
//!
//! Durable, store-backed message delivery: outbox/inbox envelopes, routing,
//! pluggable transports and typed handlers.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, subscription, outcome, decision, retry, errors）
//! - **ports**: 抽象化レイヤー（EnvelopeStore, Sender, MessageSerializer, Dispatcher, Clock など）
//! - **routing**: 静的ルール + 動的 subscription による宛先解決
//! - **serialization**: content type のネゴシエーション
//! - **transport**: scheme → Sender の解決
//! - **app**: 配送エンジン（builder, context, policy, poller, settings）
//! - **typed**: 型付き Message / Handler API
//! - **impls**: 実装（InMemoryEnvelopeStore, loopback, memory, tcp, serializers）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod routing;
pub mod serialization;
pub mod transport;
pub mod typed;

#[cfg(test)]
mod testing;
