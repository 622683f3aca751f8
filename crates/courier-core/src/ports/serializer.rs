//! MessageSerializer port - content type ごとの payload 変換
//!
//! メッセージは一度 `serde_json::Value` を経由して、content type ごとの
//! serializer で bytes に変換されます（型消去のため）。

use crate::domain::CourierError;

pub trait MessageSerializer: Send + Sync {
    fn content_type(&self) -> &str;

    fn write(&self, message: &serde_json::Value) -> Result<Vec<u8>, CourierError>;

    fn read(&self, bytes: &[u8]) -> Result<serde_json::Value, CourierError>;
}
