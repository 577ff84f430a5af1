//! Errors - 入力値の検証エラー
//!
//! 名前・prefix・cron 式などの値オブジェクトは構築時に検証します。
//! 不正な値はデプロイ前（config 読み込み時）に失敗させます。

use thiserror::Error;

/// ValidationError は値オブジェクトの検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bucket name '{name}': {reason}")]
    InvalidBucketName { name: String, reason: &'static str },

    #[error("invalid object key '{0}'")]
    InvalidObjectKey(String),

    #[error("invalid key prefix '{0}': must be non-empty and end with '/'")]
    InvalidPrefix(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}
