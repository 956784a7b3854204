use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::AppError;
use crate::schema::OutputShape;

/// One configured extraction task.
///
/// `run` is synchronous and may block for a long time; the executor calls it
/// on a blocking thread, never on the async scheduler.
pub trait RunnableGraph: Send {
    fn run(self: Box<Self>) -> Result<Value, AppError>;
}

/// Constructs runnable graphs for the three extraction strategies.
pub trait GraphEngine: Send + Sync {
    /// Single-source extraction. `source` is a URL or a local file path.
    fn smart(
        &self,
        prompt: &str,
        source: &str,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError>;

    /// Extraction across every source, merged into one answer.
    fn multi(
        &self,
        prompt: &str,
        sources: &[String],
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError>;

    /// Search-driven extraction. `query` defaults to the prompt when absent.
    fn search(
        &self,
        prompt: &str,
        query: Option<&str>,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError>;
}
