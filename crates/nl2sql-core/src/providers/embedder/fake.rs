use super::Embedder;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Mode {
    Fixed(Vec<f32>),
    /// Bag of words hashed into `dim` buckets; questions sharing words land close together.
    Hashed(usize),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct FakeEmbedder {
    pub model: String,
    calls: Arc<AtomicUsize>,
    mode: Mode,
}

impl FakeEmbedder {
    pub fn new(model: &str, vec: Vec<f32>) -> Self {
        Self::with_mode(model, Mode::Fixed(vec))
    }

    pub fn hashed(model: &str, dim: usize) -> Self {
        Self::with_mode(model, Mode::Hashed(dim.max(1)))
    }

    /// Every call fails, as a provider outage would.
    pub fn unavailable(model: &str, message: &str) -> Self {
        Self::with_mode(model, Mode::Unavailable(message.to_string()))
    }

    fn with_mode(model: &str, mode: Mode) -> Self {
        Self {
            model: model.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
            mode,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bucket(word: &str, dim: usize) -> usize {
    let digest = Sha256::digest(word.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) % dim as u64) as usize
}

pub(crate) fn hashed_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dim];
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        vec[bucket(&word.to_lowercase(), dim)] += 1.0;
    }
    vec
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            Mode::Fixed(vec) => Ok(vec.clone()),
            Mode::Hashed(dim) => Ok(hashed_embedding(text, *dim)),
            Mode::Unavailable(message) => anyhow::bail!("{}", message),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
