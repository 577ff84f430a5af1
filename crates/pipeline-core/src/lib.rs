//! pipeline-core
//!
//! Coordination core for a two-stage, event-driven ingestion pipeline:
//! a scheduled extract stage writes objects under `raw/`, and every object
//! created there triggers a transform stage that writes under `transformed/`.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, bucket, object, grant, function, schedule, subscription, invocation）
//! - **ports**: 抽象化レイヤー（ObjectStore, StageHandler, WeatherSource, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryObjectStore, OpenWeatherClient）
//! - **platform**: 関数の実行ホスト（ComputeHost, InvocationLog, RetryPolicy）
//! - **provision**: bucket の冪等な reconcile
//! - **wiring**: schedule / notification / HTTP ingress の bind
//! - **stages**: サンプルワークロード（extract, transform）
//! - **app**: スタックの組み立て・デプロイ・撤去
//! - **config**: スタック設定の読み込みと検証
//! - **observability**: ログ初期化と invocation 集計

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod platform;
pub mod ports;
pub mod provision;
pub mod stages;
pub mod wiring;
