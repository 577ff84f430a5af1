//! Domain model: buckets, objects, grants, functions, triggers and invocation records.

pub mod bucket;
pub mod errors;
pub mod function;
pub mod grant;
pub mod ids;
pub mod invocation;
pub mod object;
pub mod schedule;
pub mod subscription;

pub use bucket::{AccountId, BucketHandle, BucketName};
pub use errors::ValidationError;
pub use function::{BUCKET_ENV, FunctionName, FunctionSpec, StageEnv};
pub use grant::{PermissionGrant, Principal, Right, Rights};
pub use ids::{EventId, InvocationId, ScheduleId, SubscriptionId};
pub use invocation::{InvocationOutcome, InvocationRecord, OutcomeKind, Trigger};
pub use object::{
    KeyPrefix, ObjectCreated, ObjectKey, StoredObject, WritePrecondition, WriteResult,
};
pub use schedule::{CronExpr, ScheduleSpec};
pub use subscription::{Subscription, SubscriptionSpec};
