//! App - パイプラインの組み立てとデプロイ
//!
//! # 主要コンポーネント
//! - **StackPlan**: 宣言されたスタック（`synth` の出力）
//! - **DeploymentBuilder**: ステージの登録と起動時検証（Fail-fast）
//! - **Deployment**: bucket / 関数 / grant / トリガーのライフサイクル

pub mod builder;
pub mod deployment;
pub mod stack;

pub use self::builder::{BuildError, DeploymentBuilder, PipelineApp};
pub use self::deployment::{DeployError, Deployment, FUNCTION_URL_OUTPUT, TeardownReport};
pub use self::stack::{HttpPlan, StackPlan};
