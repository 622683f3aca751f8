//! App - アプリケーション層
//!
//! ports を組み合わせて配送エンジンを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / Bus**: 構築とワイヤリング（起動時検証）
//! - **MessageContext**: send / publish / schedule_send / respond / receive
//! - **DeliveryPolicy**: Decider の判断を store に反映
//! - **Poller**: due になった envelope の回収ループ
//! - **Settings**: 不変の設定

pub mod builder;
pub mod context;
pub mod poller;
pub mod policy;
pub mod settings;
pub mod status;

pub use self::builder::{AppBuilder, BuildError, Bus};
pub use self::context::{Delivery, MessageContext};
pub use self::poller::{Poller, SweepReport};
pub use self::policy::DeliveryPolicy;
pub use self::settings::Settings;
pub use self::status::EnvelopeCounts;
