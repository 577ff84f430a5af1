//! Extract stage: current weather for a city list -> `raw/openweather-<date>-<id>.csv`.
//!
//! payload の形は保証されない（スケジュールは `{}`、HTTP は任意）。
//! `{"cities": [...]}` だけを解釈し、それ以外は無視します。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use super::weather::{RAW_HEADER, RawRow, encode};
use crate::domain::{KeyPrefix, ObjectKey, WritePrecondition, WriteResult};
use crate::ports::{InvocationContext, StageError, StageHandler, WeatherSource};

pub struct ExtractHandler {
    source: Arc<dyn WeatherSource>,
    cities: Vec<String>,
    raw_prefix: KeyPrefix,
}

impl ExtractHandler {
    pub fn new(source: Arc<dyn WeatherSource>, cities: Vec<String>, raw_prefix: KeyPrefix) -> Self {
        Self {
            source,
            cities,
            raw_prefix,
        }
    }

    fn object_key(&self, ctx: &InvocationContext) -> Result<ObjectKey, StageError> {
        let name = format!(
            "openweather-{}-{}.csv",
            ctx.started_at.format("%Y-%m-%d"),
            ctx.invocation_id
        );
        Ok(self.raw_prefix.join(&name)?)
    }
}

/// Cities requested through the payload, if it has a usable `cities` list.
fn requested_cities(payload: &Value) -> Option<Vec<String>> {
    let cities: Vec<String> = payload
        .get("cities")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (!cities.is_empty()).then_some(cities)
}

#[async_trait]
impl StageHandler for ExtractHandler {
    async fn handle(&self, ctx: &InvocationContext, payload: Value) -> Result<Value, StageError> {
        let cities = match requested_cities(&payload) {
            Some(cities) => cities,
            None => {
                if payload != json!({}) {
                    tracing::debug!(invocation = %ctx.invocation_id, "payload has no usable cities; using defaults");
                }
                self.cities.clone()
            }
        };

        let mut rows = Vec::with_capacity(cities.len());
        for city in &cities {
            match self.source.current(city).await {
                Ok(reading) => rows.push(RawRow::from(reading)),
                Err(e) => {
                    tracing::warn!(invocation = %ctx.invocation_id, city = %city, error = %e, "skipping city")
                }
            }
        }
        if rows.is_empty() {
            tracing::warn!(invocation = %ctx.invocation_id, "no city could be fetched; writing header only");
        }

        let key = self.object_key(ctx)?;
        let data = encode(&RAW_HEADER, &rows)?;
        match ctx
            .put(&key, Bytes::from(data), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Created { .. } => {
                tracing::info!(invocation = %ctx.invocation_id, key = %key, rows = rows.len(), "raw object written")
            }
            WriteResult::PreconditionFailed => {
                tracing::warn!(invocation = %ctx.invocation_id, key = %key, "raw object already present")
            }
        }

        Ok(json!({
            "statusCode": 200,
            "body": "CSV file uploaded",
            "key": key,
            "rows": rows.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use super::*;
    use crate::domain::{
        AccountId, BUCKET_ENV, BucketName, FunctionName, InvocationId, PermissionGrant, Rights,
        StageEnv,
    };
    use crate::impls::InMemoryObjectStore;
    use crate::ports::{ObjectStore, SourceError, SystemClock, UlidGenerator, WeatherReading};

    /// Canned readings; unknown cities fail with 404.
    struct StubSource(HashMap<String, WeatherReading>);

    impl StubSource {
        fn with(cities: &[&str]) -> Self {
            Self(
                cities
                    .iter()
                    .map(|c| {
                        (
                            c.to_string(),
                            WeatherReading {
                                city: c.to_string(),
                                temperature_c: 10.0,
                                description: "clear sky".to_string(),
                                humidity_pct: 50.0,
                                wind_speed_ms: 2.0,
                                visibility_m: Some(9000.0),
                            },
                        )
                    })
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl WeatherSource for StubSource {
        async fn current(&self, city: &str) -> Result<WeatherReading, SourceError> {
            self.0.get(city).cloned().ok_or_else(|| SourceError::Status {
                city: city.to_string(),
                status: 404,
            })
        }
    }

    fn bucket() -> BucketName {
        BucketName::parse("weather-bucket").unwrap()
    }

    async fn context(store: Arc<InMemoryObjectStore>, grant: bool) -> InvocationContext {
        let function = FunctionName::parse("extract").unwrap();
        store
            .create_bucket(&bucket(), &AccountId::default())
            .await
            .unwrap();
        if grant {
            store
                .grant(&PermissionGrant {
                    principal: function.execution_role(),
                    bucket: bucket(),
                    rights: Rights::WRITE,
                })
                .await
                .unwrap();
        }
        InvocationContext::new(
            InvocationId::from_ulid(ulid::Ulid::new()),
            function.clone(),
            function.execution_role(),
            StageEnv::new().with(BUCKET_ENV, bucket().as_str()),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            store,
        )
    }

    fn new_store() -> Arc<InMemoryObjectStore> {
        Arc::new(InMemoryObjectStore::new(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        ))
    }

    fn handler(source: StubSource, cities: &[&str]) -> ExtractHandler {
        ExtractHandler::new(
            Arc::new(source),
            cities.iter().map(|c| c.to_string()).collect(),
            KeyPrefix::parse("raw/").unwrap(),
        )
    }

    #[tokio::test]
    async fn writes_one_row_per_fetched_city_under_raw() {
        let store = new_store();
        let ctx = context(store.clone(), true).await;
        let extract = handler(StubSource::with(&["Tokyo", "London"]), &["Tokyo", "London", "Atlantis"]);

        let response = extract.handle(&ctx, json!({})).await.unwrap();

        assert_eq!(response["rows"], 2);
        let keys = store.keys(&bucket());
        assert_eq!(keys.len(), 1);
        let key = &keys[0];
        assert_eq!(
            key.as_str(),
            format!("raw/openweather-2024-01-01-{}.csv", ctx.invocation_id)
        );
        let text = String::from_utf8(store.peek(&bucket(), key).unwrap().data.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("City,Temperature,Description,Humidity,Wind Speed,Visibility\n"));
    }

    #[tokio::test]
    async fn payload_can_override_cities() {
        let store = new_store();
        let ctx = context(store.clone(), true).await;
        let extract = handler(StubSource::with(&["Tokyo", "Oslo"]), &["Tokyo"]);

        extract
            .handle(&ctx, json!({"cities": ["Oslo"]}))
            .await
            .unwrap();

        let key = &store.keys(&bucket())[0];
        let text = String::from_utf8(store.peek(&bucket(), key).unwrap().data.to_vec()).unwrap();
        assert!(text.contains("Oslo"));
        assert!(!text.contains("Tokyo"));
    }

    #[rstest]
    #[case::empty_object(json!({}))]
    #[case::null(json!(null))]
    #[case::string(json!("hello"))]
    #[case::cities_not_a_list(json!({"cities": "Oslo"}))]
    #[case::empty_list(json!({"cities": []}))]
    #[case::unknown_fields(json!({"foo": 1}))]
    fn unknown_payload_shapes_fall_back_to_defaults(#[case] payload: Value) {
        assert_eq!(requested_cities(&payload), None);
    }

    #[tokio::test]
    async fn missing_grant_surfaces_as_access_denied() {
        let store = new_store();
        let ctx = context(store.clone(), false).await;
        let extract = handler(StubSource::with(&["Tokyo"]), &["Tokyo"]);

        let err = extract.handle(&ctx, json!({})).await.unwrap_err();
        assert!(err.is_access_denied());
        assert!(store.keys(&bucket()).is_empty());
    }
}
