//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryObjectStore**: 開発・テスト用のオブジェクトストレージ
//! - **OpenWeatherClient**: reqwest による天気 API クライアント

pub mod inmem_store;
pub mod openweather;

pub use self::inmem_store::{InMemoryObjectStore, StorageOp};
pub use self::openweather::{API_KEY_ENV, OpenWeatherClient};
