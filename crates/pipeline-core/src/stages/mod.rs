//! Stages - パイプラインに載せるサンプルワークロード
//!
//! - **extract**: 天気 API から取得して `raw/` に CSV を置く
//! - **transform**: `raw/` の CSV を変換して `transformed/` に置く
//!
//! 変換内容そのものは例であり、配線側はこれに依存しません。

pub mod extract;
pub mod transform;
pub mod weather;

pub use self::extract::ExtractHandler;
pub use self::transform::{TransformHandler, output_key};
pub use self::weather::{RAW_HEADER, RawRow, TRANSFORMED_HEADER, TransformedRow};
