//! DeploymentBuilder - パイプラインの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 宣言されたステージに handler がなければ build() で失敗
//! - 外部依存（store / clock / id）は差し替え可能、省略時は in-memory / システム時刻

use std::sync::Arc;

use super::deployment::{DeployError, Deployment};
use super::stack::StackPlan;
use crate::config::ResolvedStack;
use crate::impls::InMemoryObjectStore;
use crate::ports::{Clock, IdGenerator, ObjectStore, StageHandler, SystemClock, UlidGenerator};

/// DeploymentBuilder はパイプラインを構築
///
/// # 使用例
/// ```ignore
/// let deployment = DeploymentBuilder::new(config.resolve()?)
///     .extract(Arc::new(extract_handler))
///     .transform(Arc::new(transform_handler))
///     .build()?
///     .deploy()
///     .await?;
/// ```
pub struct DeploymentBuilder {
    stack: ResolvedStack,
    store: Option<Arc<dyn ObjectStore>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    extract: Option<Arc<dyn StageHandler>>,
    transform: Option<Arc<dyn StageHandler>>,
}

/// BuildError はパイプライン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing stage handlers: {0:?}. These stages are declared but no handler was given.")]
    MissingStages(Vec<&'static str>),
}

impl DeploymentBuilder {
    pub fn new(stack: ResolvedStack) -> Self {
        Self {
            stack,
            store: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            extract: None,
            transform: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn extract(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.extract = Some(handler);
        self
    }

    pub fn transform(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.transform = Some(handler);
        self
    }

    /// # 検証
    /// - extract / transform の両方に handler があるか
    pub fn build(self) -> Result<PipelineApp, BuildError> {
        let (extract, transform) = match (self.extract, self.transform) {
            (Some(extract), Some(transform)) => (extract, transform),
            (extract, transform) => {
                let mut missing = Vec::new();
                if extract.is_none() {
                    missing.push("extract");
                }
                if transform.is_none() {
                    missing.push("transform");
                }
                return Err(BuildError::MissingStages(missing));
            }
        };

        let store: Arc<dyn ObjectStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryObjectStore::new(
                Arc::clone(&self.clock),
                Arc::clone(&self.ids),
            )),
        };

        Ok(PipelineApp {
            plan: StackPlan::from_stack(&self.stack),
            store,
            clock: self.clock,
            ids: self.ids,
            extract,
            transform,
        })
    }
}

/// A validated pipeline, ready to deploy.
pub struct PipelineApp {
    pub(crate) plan: StackPlan,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) extract: Arc<dyn StageHandler>,
    pub(crate) transform: Arc<dyn StageHandler>,
}

impl PipelineApp {
    pub fn plan(&self) -> &StackPlan {
        &self.plan
    }

    pub async fn deploy(self) -> Result<Deployment, DeployError> {
        Deployment::apply(self).await
    }
}
