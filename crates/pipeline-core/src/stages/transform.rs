//! Transform stage: `raw/<path>/<stem>.csv` -> `transformed/<path>/<stem>-transformed.csv`.
//!
//! 出力 key は入力 key 全体（raw prefix 以降のパスを含む）から決まり、`DoesNotExist` 条件付きで書き込みます。
//! 同じイベントが二度届いても二度目は「既に存在」で成功扱いになり、書き直しません。

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};

use super::weather::{TRANSFORMED_HEADER, TransformedRow, decode_raw, encode};
use crate::domain::{BucketName, KeyPrefix, ObjectKey, ValidationError, WritePrecondition, WriteResult};
use crate::ports::{InvocationContext, StageError, StageHandler};

pub struct TransformHandler {
    raw_prefix: KeyPrefix,
    output_prefix: KeyPrefix,
}

impl TransformHandler {
    pub fn new(raw_prefix: KeyPrefix, output_prefix: KeyPrefix) -> Self {
        Self {
            raw_prefix,
            output_prefix,
        }
    }
}

/// The part of an `ObjectCreated` notification this stage needs.
#[derive(Debug, Deserialize)]
struct ObjectRef {
    key: ObjectKey,
    #[serde(default)]
    bucket: Option<BucketName>,
}

/// Deterministic output location for an input key.
///
/// The path below `raw_prefix` is kept, so distinct inputs never share an
/// output key. Keys outside `raw_prefix` keep their whole path.
pub fn output_key(
    raw_prefix: &KeyPrefix,
    output_prefix: &KeyPrefix,
    input: &ObjectKey,
) -> Result<ObjectKey, ValidationError> {
    let relative = input
        .as_str()
        .strip_prefix(raw_prefix.as_str())
        .unwrap_or(input.as_str());
    let (dir, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, relative),
    };
    if file.is_empty() {
        return Err(ValidationError::InvalidObjectKey(input.to_string()));
    }
    let stem = match file.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file,
    };
    match dir {
        Some(dir) => output_prefix.join(&format!("{dir}/{stem}-transformed.csv")),
        None => output_prefix.join(&format!("{stem}-transformed.csv")),
    }
}

#[async_trait]
impl StageHandler for TransformHandler {
    async fn handle(&self, ctx: &InvocationContext, payload: Value) -> Result<Value, StageError> {
        let object: ObjectRef = serde_json::from_value(payload)
            .map_err(|e| StageError::InvalidPayload(format!("expected an object-created event: {e}")))?;

        let bucket = ctx.bucket()?;
        if let Some(from) = &object.bucket
            && from != &bucket
        {
            return Err(StageError::InvalidPayload(format!(
                "event is for bucket {from}, this function reads {bucket}"
            )));
        }

        let input = ctx.get(&object.key).await?;
        let rows: Vec<TransformedRow> = decode_raw(&input.data)?
            .iter()
            .map(|row| row.transform())
            .collect();
        let data = encode(&TRANSFORMED_HEADER, &rows)?;

        let key = output_key(&self.raw_prefix, &self.output_prefix, &object.key)?;
        let deduplicated = match ctx
            .put(&key, Bytes::from(data), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Created { .. } => {
                tracing::info!(invocation = %ctx.invocation_id, input = %object.key, output = %key, rows = rows.len(), "transformed object written");
                false
            }
            WriteResult::PreconditionFailed => {
                tracing::info!(invocation = %ctx.invocation_id, input = %object.key, output = %key, "output already present; duplicate delivery");
                true
            }
        };

        Ok(json!({
            "statusCode": 200,
            "body": "Weather data processed and uploaded successfully",
            "key": key,
            "rows": rows.len(),
            "deduplicated": deduplicated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rstest::rstest;

    use super::*;
    use crate::domain::{
        AccountId, BUCKET_ENV, FunctionName, InvocationId, PermissionGrant, Principal, Rights,
        StageEnv,
    };
    use crate::impls::InMemoryObjectStore;
    use crate::ports::{ObjectStore, SystemClock, UlidGenerator};

    const RAW: &str = "City,Temperature,Description,Humidity,Wind Speed,Visibility\n\
                       Tokyo,20.0,scattered clouds,40,5.0,10000\n\
                       London,8.5,mist,93,1.2,\n";

    fn bucket() -> BucketName {
        BucketName::parse("weather-bucket").unwrap()
    }

    fn prefix(p: &str) -> KeyPrefix {
        KeyPrefix::parse(p).unwrap()
    }

    fn key(k: &str) -> ObjectKey {
        ObjectKey::parse(k).unwrap()
    }

    async fn setup(rights: Option<Rights>) -> (Arc<InMemoryObjectStore>, InvocationContext) {
        let store = Arc::new(InMemoryObjectStore::new(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        ));
        store
            .create_bucket(&bucket(), &AccountId::default())
            .await
            .unwrap();

        let seeder = Principal::new("role/seeder");
        store
            .grant(&PermissionGrant {
                principal: seeder.clone(),
                bucket: bucket(),
                rights: Rights::WRITE,
            })
            .await
            .unwrap();
        store
            .put(
                &seeder,
                &bucket(),
                &key("raw/openweather-2024-01-01.csv"),
                Bytes::from_static(RAW.as_bytes()),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let function = FunctionName::parse("transform").unwrap();
        if let Some(rights) = rights {
            store
                .grant(&PermissionGrant {
                    principal: function.execution_role(),
                    bucket: bucket(),
                    rights,
                })
                .await
                .unwrap();
        }
        let ctx = InvocationContext::new(
            InvocationId::from_ulid(ulid::Ulid::new()),
            function.clone(),
            function.execution_role(),
            StageEnv::new().with(BUCKET_ENV, bucket().as_str()),
            Utc::now(),
            store.clone(),
        );
        (store, ctx)
    }

    fn handler() -> TransformHandler {
        TransformHandler::new(prefix("raw/"), prefix("transformed/"))
    }

    fn event(k: &str) -> Value {
        json!({"bucket": "weather-bucket", "key": k})
    }

    #[rstest]
    #[case("raw/openweather-2024-01-01.csv", "transformed/openweather-2024-01-01-transformed.csv")]
    #[case("raw/2024-01-01.json", "transformed/2024-01-01-transformed.csv")]
    #[case("raw/tokyo/data.csv", "transformed/tokyo/data-transformed.csv")]
    #[case("raw/a/b/file", "transformed/a/b/file-transformed.csv")]
    #[case("raw/.hidden", "transformed/.hidden-transformed.csv")]
    #[case("other/x.csv", "transformed/other/x-transformed.csv")]
    fn output_key_is_derived_from_the_input(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(
            output_key(&prefix("raw/"), &prefix("transformed/"), &key(input))
                .unwrap()
                .as_str(),
            expected
        );
    }

    #[rstest]
    #[case("raw/")]
    #[case("raw/tokyo/")]
    fn key_without_file_name_has_no_output(#[case] input: &str) {
        assert!(output_key(&prefix("raw/"), &prefix("transformed/"), &key(input)).is_err());
    }

    #[tokio::test]
    async fn same_file_name_in_different_directories_both_get_output() {
        let (store, ctx) = setup(Some(Rights::READ_WRITE)).await;
        let seeder = Principal::new("role/seeder");
        for input in ["raw/tokyo/data.csv", "raw/london/data.csv"] {
            store
                .put(
                    &seeder,
                    &bucket(),
                    &key(input),
                    Bytes::from_static(RAW.as_bytes()),
                    WritePrecondition::None,
                )
                .await
                .unwrap();
        }
        let handler = handler();

        let tokyo = handler.handle(&ctx, event("raw/tokyo/data.csv")).await.unwrap();
        let london = handler.handle(&ctx, event("raw/london/data.csv")).await.unwrap();

        assert_eq!(tokyo["deduplicated"], false);
        assert_eq!(london["deduplicated"], false);
        assert!(store.peek(&bucket(), &key("transformed/tokyo/data-transformed.csv")).is_some());
        assert!(store.peek(&bucket(), &key("transformed/london/data-transformed.csv")).is_some());
    }

    #[tokio::test]
    async fn writes_transformed_csv() {
        let (store, ctx) = setup(Some(Rights::READ_WRITE)).await;
        let handler = handler();

        let response = handler
            .handle(&ctx, event("raw/openweather-2024-01-01.csv"))
            .await
            .unwrap();

        assert_eq!(response["deduplicated"], false);
        let out = store
            .peek(&bucket(), &key("transformed/openweather-2024-01-01-transformed.csv"))
            .unwrap();
        let text = String::from_utf8(out.data.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "City,Temperature_F,Description_Simplified,Humidity_Normalized,Wind Speed_km/h,Visibility_km"
        );
        assert_eq!(lines[1], "Tokyo,68.0,scattered,0.4,18.0,10.0");
        assert!(lines[2].starts_with("London,47."));
        assert!(lines[2].contains(",mist,0.93,"));
        assert!(lines[2].ends_with(','));
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_rewrite() {
        let (store, ctx) = setup(Some(Rights::READ_WRITE)).await;
        let handler = handler();
        let out = key("transformed/openweather-2024-01-01-transformed.csv");

        handler
            .handle(&ctx, event("raw/openweather-2024-01-01.csv"))
            .await
            .unwrap();
        let first = store.peek(&bucket(), &out).unwrap();

        let response = handler
            .handle(&ctx, event("raw/openweather-2024-01-01.csv"))
            .await
            .unwrap();

        assert_eq!(response["deduplicated"], true);
        assert_eq!(store.peek(&bucket(), &out).unwrap(), first);
    }

    #[tokio::test]
    async fn missing_grant_is_access_denied_and_writes_nothing() {
        let (store, ctx) = setup(None).await;
        let handler = handler();

        let err = handler
            .handle(&ctx, event("raw/openweather-2024-01-01.csv"))
            .await
            .unwrap_err();

        assert!(err.is_access_denied());
        assert_eq!(store.keys(&bucket()).len(), 1);
    }

    #[tokio::test]
    async fn read_only_grant_fails_on_write() {
        let (store, ctx) = setup(Some(Rights::READ)).await;
        let handler = handler();

        let err = handler
            .handle(&ctx, event("raw/openweather-2024-01-01.csv"))
            .await
            .unwrap_err();

        assert!(err.is_access_denied());
        assert_eq!(store.keys(&bucket()).len(), 1);
    }

    #[rstest]
    #[case::empty(json!({}))]
    #[case::no_key(json!({"bucket": "weather-bucket"}))]
    #[case::bad_key(json!({"key": ""}))]
    #[case::other_bucket(json!({"bucket": "other-bucket", "key": "raw/openweather-2024-01-01.csv"}))]
    #[tokio::test]
    async fn malformed_events_are_rejected(#[case] payload: Value) {
        let (_store, ctx) = setup(Some(Rights::READ_WRITE)).await;
        let handler = handler();

        let err = handler.handle(&ctx, payload).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidPayload(_)));
    }
}
