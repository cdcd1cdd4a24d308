//! Few-shot example retrieval by embedding similarity.

pub mod store;

use crate::errors::{PipelineError, PipelineResult};
use crate::model::Example;
use crate::providers::embedder::Embedder;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Examples handed to the generator per request.
pub const TOP_K: usize = 5;

/// Cosine similarity; zero for mismatched lengths or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot_product / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// In-memory index of verified examples. Read-only once shared.
#[derive(Debug, Clone, Default)]
pub struct ExampleIndex {
    examples: Vec<Example>,
}

impl ExampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embedding dimension shared by every entry, if any entry exists.
    pub fn dimension(&self) -> Option<usize> {
        self.examples.first().map(|e| e.embedding.len())
    }

    /// Appends an example; its embedding must match the index dimension.
    pub fn insert(&mut self, example: Example) -> PipelineResult<()> {
        if example.embedding.is_empty() {
            return Err(PipelineError::Config {
                message: format!("example {} has an empty embedding", example.id),
            });
        }
        if let Some(dim) = self.dimension() {
            if dim != example.embedding.len() {
                return Err(PipelineError::Config {
                    message: format!(
                        "example {} has embedding dimension {} (index uses {})",
                        example.id,
                        example.embedding.len(),
                        dim
                    ),
                });
            }
        }
        self.examples.push(example);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter()
    }

    /// Top `k` examples by descending similarity; ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Example> {
        let mut scored: Vec<(f32, &Example)> = self
            .examples
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.into_iter().take(k).map(|(_, e)| e.clone()).collect()
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<ExampleIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<ExampleIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &ExampleIndex {
        &self.index
    }

    /// Examples most similar to `question`.
    ///
    /// Fails with `EmbeddingUnavailable` when the embedder errors or returns a vector the
    /// index cannot compare against.
    pub async fn retrieve(&self, question: &str, k: usize) -> PipelineResult<Vec<Example>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(question).await.map_err(|e| {
            PipelineError::EmbeddingUnavailable {
                message: format!("{}: {:#}", self.embedder.describe(), e),
            }
        })?;
        if let Some(dim) = self.index.dimension() {
            if query.len() != dim {
                return Err(PipelineError::EmbeddingUnavailable {
                    message: format!(
                        "query embedding has dimension {} but the index uses {}",
                        query.len(),
                        dim
                    ),
                });
            }
        }
        let hits = self.index.search(&query, k);
        debug!(k, hits = hits.len(), "retrieved examples");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::providers::embedder::fake::FakeEmbedder;

    fn example(id: u64, embedding: Vec<f32>) -> Example {
        Example {
            id,
            question: format!("q{id}"),
            sql: format!("SELECT {id}"),
            embedding,
        }
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_ranks_by_similarity_and_keeps_insertion_order_on_ties() {
        let mut index = ExampleIndex::new();
        index.insert(example(1, vec![0.0, 1.0])).unwrap();
        index.insert(example(2, vec![1.0, 0.0])).unwrap();
        index.insert(example(3, vec![1.0, 1.0])).unwrap();
        index.insert(example(4, vec![2.0, 0.0])).unwrap();

        let ids: Vec<u64> = index.search(&[1.0, 0.0], 3).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn insert_rejects_dimension_mismatch() {
        let mut index = ExampleIndex::new();
        index.insert(example(1, vec![1.0, 0.0])).unwrap();
        assert!(index.insert(example(2, vec![1.0, 0.0, 0.0])).is_err());
        assert!(index.insert(example(3, vec![])).is_err());
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn retrieve_returns_at_most_k() {
        let mut index = ExampleIndex::new();
        for id in 0..8 {
            index.insert(example(id, vec![1.0, id as f32])).unwrap();
        }
        let retriever = Retriever::new(
            Arc::new(FakeEmbedder::new("f", vec![1.0, 0.0])),
            Arc::new(index),
        );
        let hits = retriever.retrieve("anything", TOP_K).await.unwrap();
        assert_eq!(hits.len(), TOP_K);
        assert_eq!(hits[0].id, 0);
    }

    #[tokio::test]
    async fn embedder_failure_maps_to_embedding_unavailable() {
        let mut index = ExampleIndex::new();
        index.insert(example(1, vec![1.0])).unwrap();
        let retriever = Retriever::new(
            Arc::new(FakeEmbedder::unavailable("f", "503 from embeddings")),
            Arc::new(index),
        );
        let err = retriever.retrieve("q", TOP_K).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
        assert!(err.to_string().contains("503 from embeddings"));
    }

    #[tokio::test]
    async fn wrong_query_dimension_is_unavailable() {
        let mut index = ExampleIndex::new();
        index.insert(example(1, vec![1.0, 0.0])).unwrap();
        let retriever = Retriever::new(
            Arc::new(FakeEmbedder::new("f", vec![1.0, 0.0, 0.0])),
            Arc::new(index),
        );
        let err = retriever.retrieve("q", TOP_K).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
    }
}
