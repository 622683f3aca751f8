//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協力者（永続化 backend、transport、serializer、
//! handler dispatch）へのインターフェースで、エンジン本体は実装の詳細を知りません。

pub mod clock;
pub mod dispatch;
pub mod envelope_store;
pub mod id_generator;
pub mod sender;
pub mod serializer;

pub use self::clock::{Clock, FixedClock, SystemClock, chrono_duration};
pub use self::dispatch::Dispatcher;
pub use self::envelope_store::EnvelopeStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::sender::Sender;
pub use self::serializer::MessageSerializer;
