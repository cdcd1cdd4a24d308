use super::Embedder;
use crate::providers::llm::openai::DEFAULT_BASE_URL;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(15);

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbedder {
    base_url: String,
    model: String,
    api_key: String,
    dimensions: Option<usize>,
    client: reqwest::Client,
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

impl OpenAIEmbedder {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            api_key,
            dimensions: None,
            client: http_client(DEFAULT_EMBEDDING_TIMEOUT),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Requests shortened vectors; responses of any other length are rejected.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn request_body(&self, text: &str) -> Value {
        let mut body = json!({
            "input": text,
            "model": self.model,
            "encoding_format": "float",
        });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }
        body
    }
}

fn parse_embedding(body: &Value) -> anyhow::Result<Vec<f32>> {
    let values = body
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .context("embeddings response has no data[0].embedding")?;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .map(|f| f as f32)
                .with_context(|| format!("embedding component {i} is not a number"))
        })
        .collect()
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .context("embeddings request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("embeddings API returned {status}: {}", detail.trim());
        }

        let body: Value = resp.json().await.context("embeddings response is not JSON")?;
        let vector = parse_embedding(&body)?;
        if vector.is_empty() {
            anyhow::bail!("embeddings API returned an empty vector");
        }
        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                anyhow::bail!(
                    "embeddings API returned {} dimensions, expected {expected}",
                    vector.len()
                );
            }
        }
        Ok(vector)
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_dimensions_only_when_set() {
        let plain = OpenAIEmbedder::new("m".into(), "k".into());
        assert!(plain.request_body("q").get("dimensions").is_none());

        let short = plain.with_dimensions(8);
        assert_eq!(short.request_body("q")["dimensions"], 8);
    }

    #[test]
    fn non_numeric_components_are_rejected() {
        let body = json!({ "data": [{ "embedding": [0.5, "x"] }] });
        let err = parse_embedding(&body).unwrap_err();
        assert!(err.to_string().contains("component 1"));
    }
}
