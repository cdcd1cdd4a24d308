use crate::model::Strategy;
use sha2::{Digest, Sha256};

/// Cache key for a completion: the same prompt under the same strategy yields the same key.
pub fn cache_key(strategy: Strategy, prompt: &str) -> String {
    let mut h = Sha256::new();
    h.update(strategy.as_str().as_bytes());
    h.update(b"\n");
    h.update(prompt.as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_strategy_and_prompt() {
        let a = cache_key(Strategy::SchemaFirst, "p");
        assert_eq!(a.len(), 64);
        assert_eq!(a, cache_key(Strategy::SchemaFirst, "p"));
        assert_ne!(a, cache_key(Strategy::ChainOfThought, "p"));
        assert_ne!(a, cache_key(Strategy::SchemaFirst, "q"));
    }
}
