//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryEnvelopeStore**: 開発・テスト用の正本（プロセス内のみ）
//! - **LoopbackSender** (`loopback://`): 自ノードの inbox へ直接書き込む
//! - **InMemorySender** (`memory://`): 送信内容を記録するだけのテスト用 transport
//! - **TcpSender / TcpReceiver** (`tcp://`): 長さプレフィクス付きフレームでノード間配送
//! - **JsonSerializer / PlainTextSerializer**: 既定の content type
//!
//! 永続 backend（RDB など）は別クレートで `EnvelopeStore` を実装する想定。

pub mod inmem_store;
pub mod loopback;
pub mod memory;
pub mod serializers;
pub mod tcp;

pub use self::inmem_store::InMemoryEnvelopeStore;
pub use self::loopback::LoopbackSender;
pub use self::memory::InMemorySender;
pub use self::serializers::{JsonSerializer, PlainTextSerializer};
pub use self::tcp::{TcpReceiver, TcpSender};
