//! Platform - 関数を実行するホスト側の仕組み
//!
//! - **ComputeHost**: 関数の登録と invocation 実行（timeout 付き）
//! - **InvocationLog**: 全 invocation の記録
//! - **RetryPolicy**: 非同期配送の再送ポリシー

pub mod host;
pub mod log;
pub mod retry;

pub use self::host::{ComputeError, ComputeHost};
pub use self::log::{DEFAULT_LOG_CAPACITY, InvocationLog};
pub use self::retry::{MAX_RETRY_DELAY, RetryPolicy, RetryPolicyError};
