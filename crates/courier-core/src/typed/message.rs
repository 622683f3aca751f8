//! Message trait - 型付きメッセージの定義
//!
//! Rust の型名ではなく `const TYPE` が wire 上の名前（MessageTypeAlias）になります。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::MessageTypeAlias;

/// Binds a Rust type to its message type alias.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct InvoiceCreated {
///     invoice_id: String,
/// }
///
/// impl Message for InvoiceCreated {
///     const TYPE: &'static str = "acme.billing.invoice-created.v1";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `{namespace}.{domain}.{action}.v{major}`
    const TYPE: &'static str;

    fn message_type() -> MessageTypeAlias {
        MessageTypeAlias::new(Self::TYPE)
    }
}
