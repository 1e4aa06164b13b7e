//! HTTP-backed embedder (production adapter)
//!
//! Calls an external embedding service over HTTP rather than running
//! inference locally: text in, vector out, served by an external
//! embedding model the engine treats as an opaque capability.

use super::{normalize, BackoffPolicy, EmbedError, Embedder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an HTTP POST to an external embedding service.
///
/// The wire contract is intentionally minimal: `{"input": [...]}` in,
/// `{"embeddings": [[...], ...]}` out, one vector per input in order.
pub struct HttpEmbedder {
    endpoint: String,
    dimensions: usize,
    client: reqwest::blocking::Client,
    backoff: BackoffPolicy,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Self {
        Self::with_backoff(endpoint, dimensions, BackoffPolicy::default())
    }

    pub fn with_backoff(
        endpoint: impl Into<String>,
        dimensions: usize,
        backoff: BackoffPolicy,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client build");
        Self {
            endpoint: endpoint.into(),
            dimensions,
            client,
            backoff,
        }
    }

    fn post_once(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedError::Invalid("empty text".into()));
        }

        let body = EmbedRequest { input: texts };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            return Err(EmbedError::Unavailable(format!(
                "server returned {}",
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            return Err(EmbedError::Invalid(format!(
                "server returned {}",
                resp.status()
            )));
        }

        let parsed: EmbedResponse = resp
            .json()
            .map_err(|e| EmbedError::Unavailable(format!("bad response body: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::Unavailable(
                "embedding count mismatch".to_string(),
            ));
        }
        for v in &parsed.embeddings {
            if v.len() != self.dimensions {
                return Err(EmbedError::Invalid(format!(
                    "expected dimension {}, got {}",
                    self.dimensions,
                    v.len()
                )));
            }
        }

        let mut out = parsed.embeddings;
        for v in out.iter_mut() {
            normalize(v);
        }
        Ok(out)
    }

    fn post_with_retry(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = None;
        for attempt in 1..=self.backoff.max_attempts {
            match self.post_once(texts) {
                Ok(v) => return Ok(v),
                Err(e @ EmbedError::Invalid(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embed request failed, retrying");
                    last_err = Some(e);
                    if attempt < self.backoff.max_attempts {
                        std::thread::sleep(self.backoff.delay_for_attempt(attempt));
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EmbedError::Unavailable("exhausted retries".into())))
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = self.post_with_retry(&[text])?;
        Ok(v.pop().expect("single-item batch"))
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.post_with_retry(texts) {
            Ok(v) => Ok(v),
            Err(EmbedError::Invalid(e)) => Err(EmbedError::Invalid(e)),
            Err(_) => {
                // whole-batch call failed after retries; fall back to per-item
                // so one bad item doesn't sink an otherwise-healthy batch.
                texts.iter().map(|t| self.embed(t)).collect()
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(2))
            .send()
            .map(|r| r.status().is_success() || r.status().as_u16() == 405)
            .unwrap_or(false)
    }
}
