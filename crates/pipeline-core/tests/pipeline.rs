//! End-to-end behaviour of a deployed pipeline against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde_json::json;

use pipeline_core::app::{Deployment, DeploymentBuilder};
use pipeline_core::config::{HttpConfig, StackConfig};
use pipeline_core::domain::{
    AccountId, BucketHandle, BucketName, KeyPrefix, ObjectKey, OutcomeKind, PermissionGrant,
    Principal, StoredObject, Trigger, WritePrecondition, WriteResult,
};
use pipeline_core::impls::InMemoryObjectStore;
use pipeline_core::platform::RetryPolicy;
use pipeline_core::ports::{
    Clock, ObjectEventStream, ObjectStore, SourceError, StorageError, SystemClock, UlidGenerator,
    WeatherReading, WeatherSource,
};
use pipeline_core::provision::BucketProvisioner;
use pipeline_core::stages::{ExtractHandler, TransformHandler};

const WAIT: Duration = Duration::from_secs(5);

struct FixedWeather;

#[async_trait]
impl WeatherSource for FixedWeather {
    async fn current(&self, city: &str) -> Result<WeatherReading, SourceError> {
        Ok(WeatherReading {
            city: city.to_string(),
            temperature_c: 20.0,
            description: "light rain".to_string(),
            humidity_pct: 80.0,
            wind_speed_ms: 3.0,
            visibility_m: Some(8000.0),
        })
    }
}

/// Delegates to the in-memory store but never applies grants for one principal.
struct WithheldGrant {
    inner: Arc<InMemoryObjectStore>,
    withheld: Principal,
}

#[async_trait]
impl ObjectStore for WithheldGrant {
    async fn describe_bucket(&self, name: &BucketName) -> Result<Option<BucketHandle>, StorageError> {
        self.inner.describe_bucket(name).await
    }

    async fn create_bucket(
        &self,
        name: &BucketName,
        owner: &AccountId,
    ) -> Result<BucketHandle, StorageError> {
        self.inner.create_bucket(name, owner).await
    }

    async fn grant(&self, grant: &PermissionGrant) -> Result<(), StorageError> {
        if grant.principal == self.withheld {
            return Ok(());
        }
        self.inner.grant(grant).await
    }

    async fn put(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError> {
        self.inner.put(caller, bucket, key, data, precondition).await
    }

    async fn get(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<StoredObject, StorageError> {
        self.inner.get(caller, bucket, key).await
    }

    async fn on_create(
        &self,
        bucket: &BucketName,
        prefix: &KeyPrefix,
    ) -> Result<ObjectEventStream, StorageError> {
        self.inner.on_create(bucket, prefix).await
    }
}

/// Wall-clock time that follows tokio's (possibly paused) clock.
struct TokioClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.origin + chrono::Duration::from_std(self.start.elapsed()).unwrap_or_default()
    }
}

fn new_store() -> Arc<InMemoryObjectStore> {
    Arc::new(InMemoryObjectStore::new(
        Arc::new(SystemClock),
        Arc::new(UlidGenerator::new(SystemClock)),
    ))
}

fn config(http_enabled: bool) -> StackConfig {
    StackConfig {
        http: HttpConfig {
            enabled: http_enabled,
            listen: "127.0.0.1:0".to_string(),
        },
        delivery: RetryPolicy::no_retry(),
        cities: vec!["Tokyo".to_string(), "Oslo".to_string()],
        ..StackConfig::default()
    }
}

fn builder(config: StackConfig, store: Arc<dyn ObjectStore>) -> DeploymentBuilder {
    let stack = config.resolve().unwrap();
    let extract = ExtractHandler::new(
        Arc::new(FixedWeather),
        stack.cities.clone(),
        stack.raw_prefix.clone(),
    );
    let transform = TransformHandler::new(stack.raw_prefix.clone(), stack.output_prefix.clone());
    DeploymentBuilder::new(stack)
        .with_store(store)
        .extract(Arc::new(extract))
        .transform(Arc::new(transform))
}

async fn deploy(config: StackConfig, store: Arc<dyn ObjectStore>) -> Deployment {
    builder(config, store).build().unwrap().deploy().await.unwrap()
}

fn keys_under(store: &InMemoryObjectStore, bucket: &BucketName, prefix: &str) -> Vec<ObjectKey> {
    store
        .keys(bucket)
        .into_iter()
        .filter(|k| k.as_str().starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn extract_output_flows_into_transform() {
    let store = new_store();
    let deployment = deploy(config(false), store.clone()).await;
    let bucket = deployment.bucket().name.clone();
    let extract = deployment.plan().extract.name.clone();
    let transform = deployment.plan().transform.name.clone();

    let record = deployment.invoke(&extract, json!({})).await.unwrap();
    assert!(record.outcome.is_success());
    let raw_key = record.outcome.response.as_ref().unwrap()["key"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(raw_key.starts_with("raw/openweather-"));

    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    let runs = deployment.log().for_function(&transform);
    assert_eq!(runs[0].payload["key"], raw_key.as_str());
    assert!(runs[0].outcome.is_success());

    let transformed = keys_under(&store, &bucket, "transformed/");
    assert_eq!(transformed.len(), 1);
    let stem = raw_key.trim_start_matches("raw/").trim_end_matches(".csv");
    assert_eq!(
        transformed[0].as_str(),
        format!("transformed/{stem}-transformed.csv")
    );
    let text = String::from_utf8(store.peek(&bucket, &transformed[0]).unwrap().data.to_vec()).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("Tokyo,68.0,light,0.8,"));

    deployment.teardown().await;
}

#[tokio::test]
async fn http_request_runs_the_whole_pipeline() {
    let store = new_store();
    let deployment = deploy(config(true), store.clone()).await;
    let url = deployment.function_url().unwrap().to_string();
    let transform = deployment.plan().transform.name.clone();

    let response = reqwest::Client::new()
        .post(&url)
        .body("not json at all")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-invocation-id"));
    assert_eq!(response.text().await.unwrap(), "CSV file uploaded");

    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    assert_eq!(
        keys_under(&store, &deployment.bucket().name, "transformed/").len(),
        1
    );

    let report = deployment.teardown().await;
    assert!(report.http_stopped);
    assert!(reqwest::get(&url).await.is_err());
}

#[tokio::test]
async fn any_object_under_raw_triggers_transform_with_its_key() {
    let store = new_store();
    let deployment = deploy(config(false), store.clone()).await;
    let transform = deployment.plan().transform.name.clone();

    store
        .put(
            &deployment.plan().extract.principal(),
            &deployment.bucket().name,
            &ObjectKey::parse("raw/2024-01-01.json").unwrap(),
            Bytes::from_static(b"City,Temperature,Description,Humidity,Wind Speed,Visibility\n"),
            WritePrecondition::None,
        )
        .await
        .unwrap();

    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    let record = &deployment.log().for_function(&transform)[0];
    assert_eq!(record.payload["key"], "raw/2024-01-01.json");
    assert!(matches!(record.trigger, Trigger::Notification { .. }));
    assert!(
        store
            .peek(
                &deployment.bucket().name,
                &ObjectKey::parse("transformed/2024-01-01-transformed.csv").unwrap()
            )
            .is_some()
    );

    deployment.teardown().await;
}

#[tokio::test]
async fn keys_outside_raw_never_trigger_transform() {
    let store = new_store();
    let deployment = deploy(config(false), store.clone()).await;
    let writer = deployment.plan().extract.principal();

    for key in ["other/a.csv", "rawfile.csv", "transformed/x.csv"] {
        store
            .put(
                &writer,
                &deployment.bucket().name,
                &ObjectKey::parse(key).unwrap(),
                Bytes::from_static(b"x"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(deployment.log().records().is_empty());
    deployment.teardown().await;
}

#[tokio::test]
async fn concurrent_ensure_bucket_yields_one_container() {
    let store = new_store();
    let provisioner = Arc::new(BucketProvisioner::new(store.clone(), AccountId::default()));
    let name = BucketName::parse("open-weather-upload-bucket").unwrap();

    let calls: Vec<_> = (0..5)
        .map(|_| {
            let provisioner = Arc::clone(&provisioner);
            let name = name.clone();
            tokio::spawn(async move { provisioner.ensure_bucket(&name).await })
        })
        .collect();
    let mut handles = Vec::new();
    for call in calls {
        handles.push(call.await.unwrap().unwrap());
    }

    assert!(handles.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(store.bucket_count(), 1);
    assert_eq!(store.create_calls(&name), 1);
}

#[tokio::test(start_paused = true)]
async fn schedule_fires_extract_at_noon_without_http() {
    let store = new_store();
    let clock = Arc::new(TokioClock {
        origin: Utc.with_ymd_and_hms(2024, 1, 1, 11, 59, 0).unwrap(),
        start: tokio::time::Instant::now(),
    });
    let deployment = builder(config(false), store.clone())
        .with_clock(clock)
        .build()
        .unwrap()
        .deploy()
        .await
        .unwrap();
    assert!(deployment.function_url().is_none());
    let extract = deployment.plan().extract.name.clone();
    let transform = deployment.plan().transform.name.clone();

    assert!(
        deployment
            .log()
            .wait_for(&extract, 1, Duration::from_secs(2 * 3600))
            .await
    );
    let record = &deployment.log().for_function(&extract)[0];
    assert!(matches!(record.trigger, Trigger::Schedule { .. }));
    assert_eq!(record.payload, json!({}));
    assert_eq!(record.started_at.hour(), 12);

    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    assert_eq!(deployment.log().for_function(&extract).len(), 1);
    deployment.teardown().await;
}

#[tokio::test]
async fn transform_without_grant_fails_and_writes_nothing() {
    let inner = new_store();
    let stack = config(false).resolve().unwrap();
    let store = Arc::new(WithheldGrant {
        inner: inner.clone(),
        withheld: stack.transform.principal(),
    });
    let deployment = deploy(config(false), store).await;
    let extract = deployment.plan().extract.name.clone();
    let transform = deployment.plan().transform.name.clone();

    let record = deployment.invoke(&extract, json!({})).await.unwrap();
    assert!(record.outcome.is_success());

    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    let failed = &deployment.log().for_function(&transform)[0];
    assert_eq!(failed.outcome.kind, OutcomeKind::Failed);
    assert!(failed.outcome.access_denied);
    assert!(keys_under(&inner, &deployment.bucket().name, "transformed/").is_empty());

    let counts = deployment.counts();
    assert_eq!(counts[&transform].failed, 1);
    assert_eq!(counts[&transform].access_denied, 1);
    deployment.teardown().await;
}

#[tokio::test]
async fn redelivered_event_does_not_duplicate_output() {
    let store = new_store();
    let deployment = deploy(config(false), store.clone()).await;
    let bucket = deployment.bucket().name.clone();
    let extract = deployment.plan().extract.name.clone();
    let transform = deployment.plan().transform.name.clone();

    deployment.invoke(&extract, json!({})).await.unwrap();
    assert!(deployment.log().wait_for(&transform, 1, WAIT).await);
    let raw = keys_under(&store, &bucket, "raw/").remove(0);
    let output = keys_under(&store, &bucket, "transformed/").remove(0);
    let first = store.peek(&bucket, &output).unwrap();

    assert_eq!(store.redeliver(&bucket, &raw).unwrap(), 1);
    assert!(deployment.log().wait_for(&transform, 2, WAIT).await);

    let runs = deployment.log().for_function(&transform);
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].outcome.response.as_ref().unwrap()["deduplicated"], true);
    assert_eq!(keys_under(&store, &bucket, "transformed/").len(), 1);
    assert_eq!(store.peek(&bucket, &output).unwrap(), first);
    deployment.teardown().await;
}

#[tokio::test]
async fn same_file_name_under_different_raw_paths_is_transformed_twice() {
    let store = new_store();
    let deployment = deploy(config(false), store.clone()).await;
    let bucket = deployment.bucket().name.clone();
    let transform = deployment.plan().transform.name.clone();

    for key in ["raw/tokyo/data.csv", "raw/london/data.csv"] {
        store
            .put(
                &deployment.plan().extract.principal(),
                &bucket,
                &ObjectKey::parse(key).unwrap(),
                Bytes::from_static(b"City,Temperature,Description,Humidity,Wind Speed,Visibility\n"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
    }

    assert!(deployment.log().wait_for(&transform, 2, WAIT).await);
    for run in deployment.log().for_function(&transform) {
        assert_eq!(run.outcome.response.as_ref().unwrap()["deduplicated"], false);
    }
    let mut outputs: Vec<String> = keys_under(&store, &bucket, "transformed/")
        .iter()
        .map(|k| k.as_str().to_string())
        .collect();
    outputs.sort();
    assert_eq!(
        outputs,
        vec![
            "transformed/london/data-transformed.csv",
            "transformed/tokyo/data-transformed.csv",
        ]
    );
    deployment.teardown().await;
}
