//! Config - スタック定義の読み込みと検証
//!
//! JSON ファイル（全フィールド省略可）を `StackConfig` に読み込み、
//! `resolve()` で値オブジェクトへ変換します。不正な設定はデプロイ前に失敗させます。

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    AccountId, BucketName, CronExpr, FunctionName, FunctionSpec, KeyPrefix, StageEnv,
    ValidationError,
};
use crate::observability::LogFormat;
use crate::platform::{DEFAULT_LOG_CAPACITY, RetryPolicy, RetryPolicyError};

pub const DEFAULT_BUCKET: &str = "open-weather-upload-bucket";
pub const DEFAULT_EXTRACT_FUNCTION: &str = "OpenWeatherPLambdaExtract";
pub const DEFAULT_TRANSFORM_FUNCTION: &str = "OpenWeatherPLambdaUpload";

pub const DEFAULT_CITIES: [&str; 5] = ["Tokyo", "London", "Stockholm", "Sao Paulo", "Mexico City"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Delivery(#[from] RetryPolicyError),

    #[error("function {0}: timeout must be greater than zero")]
    ZeroTimeout(String),

    #[error("function {0}: memory_mb must be greater than zero")]
    ZeroMemory(String),

    #[error("extract and transform must have different names (both are {0})")]
    DuplicateFunctionName(String),

    #[error("raw prefix {raw} and output prefix {output} overlap; transform output would retrigger transform")]
    OverlappingPrefixes { raw: String, output: String },

    #[error("invalid listen address {addr}: {source}")]
    InvalidListen {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("at least one city is required")]
    NoCities,

    #[error("invocation_log_capacity must be greater than zero")]
    ZeroLogCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Falls back to the role's default name when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub memory_mb: u32,
    pub timeout_secs: u64,
    pub environment: BTreeMap<String, String>,
}

impl FunctionConfig {
    fn named(name: &str) -> Self {
        Self {
            function_name: Some(name.to_string()),
            memory_mb: 128,
            timeout_secs: 30,
            environment: BTreeMap::new(),
        }
    }

    pub fn to_spec(&self, default_name: &str) -> Result<FunctionSpec, ConfigError> {
        let name = FunctionName::parse(
            self.function_name
                .clone()
                .unwrap_or_else(|| default_name.to_string()),
        )?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout(name.to_string()));
        }
        if self.memory_mb == 0 {
            return Err(ConfigError::ZeroMemory(name.to_string()));
        }
        let mut spec = FunctionSpec::new(name).with_timeout(Duration::from_secs(self.timeout_secs));
        spec.memory_mb = self.memory_mb;
        spec.environment = StageEnv::from(self.environment.clone());
        Ok(spec)
    }
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            function_name: None,
            ..Self::named("")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub minute: String,
    pub hour: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            minute: "0".to_string(),
            hour: "12".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Declared stack. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub bucket_name: String,
    pub owner: String,
    pub raw_prefix: String,
    pub output_prefix: String,
    pub extract: FunctionConfig,
    pub transform: FunctionConfig,
    pub schedule: ScheduleConfig,
    pub http: HttpConfig,
    pub delivery: RetryPolicy,
    pub cities: Vec<String>,
    pub log_format: LogFormat,

    /// Invocation records kept in memory; older ones are dropped.
    pub invocation_log_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_BUCKET.to_string(),
            owner: AccountId::default().as_str().to_string(),
            raw_prefix: "raw/".to_string(),
            output_prefix: "transformed/".to_string(),
            extract: FunctionConfig::named(DEFAULT_EXTRACT_FUNCTION),
            transform: FunctionConfig::named(DEFAULT_TRANSFORM_FUNCTION),
            schedule: ScheduleConfig::default(),
            http: HttpConfig::default(),
            delivery: RetryPolicy::default_async(),
            cities: DEFAULT_CITIES.iter().map(|c| c.to_string()).collect(),
            log_format: LogFormat::default(),
            invocation_log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// `StackConfig` after validation, in domain types.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStack {
    pub bucket: BucketName,
    pub owner: AccountId,
    pub raw_prefix: KeyPrefix,
    pub output_prefix: KeyPrefix,
    pub extract: FunctionSpec,
    pub transform: FunctionSpec,
    pub schedule: CronExpr,
    pub http_listen: Option<SocketAddr>,
    pub delivery: RetryPolicy,
    pub cities: Vec<String>,
    pub invocation_log_capacity: usize,
}

impl StackConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    pub fn resolve(&self) -> Result<ResolvedStack, ConfigError> {
        let bucket = BucketName::parse(self.bucket_name.clone())?;
        if self.owner.trim().is_empty() {
            return Err(ValidationError::Empty("owner").into());
        }

        let raw_prefix = KeyPrefix::parse(self.raw_prefix.clone())?;
        let output_prefix = KeyPrefix::parse(self.output_prefix.clone())?;
        if !raw_prefix.is_disjoint(&output_prefix) {
            return Err(ConfigError::OverlappingPrefixes {
                raw: raw_prefix.to_string(),
                output: output_prefix.to_string(),
            });
        }

        let extract = self.extract.to_spec(DEFAULT_EXTRACT_FUNCTION)?;
        let transform = self.transform.to_spec(DEFAULT_TRANSFORM_FUNCTION)?;
        if extract.name == transform.name {
            return Err(ConfigError::DuplicateFunctionName(extract.name.to_string()));
        }

        let schedule = CronExpr::daily_at(self.schedule.minute.clone(), self.schedule.hour.clone());
        schedule.compile()?;

        let http_listen = if self.http.enabled {
            let addr = self
                .http
                .listen
                .parse()
                .map_err(|source| ConfigError::InvalidListen {
                    addr: self.http.listen.clone(),
                    source,
                })?;
            Some(addr)
        } else {
            None
        };

        let cities: Vec<String> = self
            .cities
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if cities.is_empty() {
            return Err(ConfigError::NoCities);
        }
        self.delivery.validate()?;
        if self.invocation_log_capacity == 0 {
            return Err(ConfigError::ZeroLogCapacity);
        }

        Ok(ResolvedStack {
            bucket,
            owner: AccountId::new(self.owner.clone()),
            raw_prefix,
            output_prefix,
            extract,
            transform,
            schedule,
            http_listen,
            delivery: self.delivery.clone(),
            cities,
            invocation_log_capacity: self.invocation_log_capacity,
        })
    }
}
