//! Provision - 共有リソースの冪等なブートストラップ

pub mod bucket;

pub use self::bucket::{
    BucketPlan, BucketProvisioner, BucketSpec, ProvisionAction, ProvisionError, Reconciled, plan,
};
