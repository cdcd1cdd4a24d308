//! Question embeddings for example retrieval.

use async_trait::async_trait;

pub mod fake;
pub mod openai;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector for one question. Every call for the same model returns the same length.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn name(&self) -> &'static str;

    /// Model identifier recorded next to stored embeddings.
    fn model_id(&self) -> String;

    /// `name (model)`, for logs and error messages.
    fn describe(&self) -> String {
        format!("{} ({})", self.name(), self.model_id())
    }
}
