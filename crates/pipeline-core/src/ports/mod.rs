//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。外部システム（オブジェクト
//! ストレージ、天気 API、時刻）へのインターフェースを定義し、
//! 実装の詳細は `impls` に置きます。

pub mod clock;
pub mod id_generator;
pub mod object_store;
pub mod stage;
pub mod weather_source;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::{ObjectEventStream, ObjectStore, StorageError};
pub use self::stage::{InvocationContext, StageError, StageHandler};
pub use self::weather_source::{SourceError, WeatherReading, WeatherSource};
