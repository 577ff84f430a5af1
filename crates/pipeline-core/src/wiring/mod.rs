//! Wiring - ステージ間の配線（トリガーの登録と解除）
//!
//! - **schedule**: cron で extract を起動する time trigger
//! - **notification**: `raw/` 以下の作成イベントを transform へ配送する EventRouter
//! - **ingress**: extract への公開 HTTP エンドポイント
//!
//! どの binding も明示的な create / destroy のライフサイクルを持ち、
//! 所有者は `Deployment` です。

pub mod ingress;
pub mod notification;
pub mod schedule;

use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::{BucketName, FunctionName, KeyPrefix, ValidationError};
use crate::ports::StorageError;

pub use self::ingress::{HttpIngress, bind_http, router};
pub use self::notification::EventRouter;
pub use self::schedule::{ScheduleBinding, bind_schedule};

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("{prefix} on bucket {bucket} is already bound to {existing}; cannot bind it to {requested}")]
    SubscriptionConflict {
        bucket: BucketName,
        prefix: KeyPrefix,
        existing: FunctionName,
        requested: FunctionName,
    },

    #[error("target function {0} is not deployed")]
    FunctionNotDeployed(FunctionName),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("binding HTTP ingress on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
