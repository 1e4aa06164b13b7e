//! Embedder capability
//!
//! The embedder is a pure function `text -> Vec<f32>` backed by an external
//! service call rather than local inference, so this module exposes a small
//! trait with two implementations: an HTTP-backed production adapter and a
//! deterministic in-process fake for tests.

mod client;
mod fake;

pub use client::HttpEmbedder;
pub use fake::FakeEmbedder;

/// Embedder error kinds: transient vs permanent
#[derive(Debug, Clone)]
pub enum EmbedError {
    /// Transient, retryable (e.g. network failure, rate limit)
    Unavailable(String),
    /// Permanent, never retried (e.g. empty text)
    Invalid(String),
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::Unavailable(e) => write!(f, "embedder unavailable: {e}"),
            EmbedError::Invalid(e) => write!(f, "invalid embedder input: {e}"),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Backoff policy for retrying transient embedder failures (base 500ms,
/// cap 30s, max 5 attempts)
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            cap_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given attempt (1-indexed), exponential with a cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self.base_ms.saturating_mul(factor).min(self.cap_ms);
        std::time::Duration::from_millis(ms)
    }
}

/// `embed(text) -> vector<float, D>` contract
pub trait Embedder: Send + Sync {
    /// Fixed dimension D this embedder produces
    fn dimensions(&self) -> usize;

    /// Embed a single piece of text. Pure w.r.t. model + text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a batch, preserving input order. On partial failure the whole
    /// batch fails; callers fall back to per-item `embed`.
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// `true` if the embedder is currently reachable (used by `get_health`)
    fn is_ready(&self) -> bool {
        true
    }
}

/// Embed with bounded exponential-backoff retry on transient failures
/// Callers retry on transient failures with bounded exponential backoff.
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    policy: BackoffPolicy,
) -> Result<Vec<f32>, EmbedError> {
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match embedder.embed(text) {
            Ok(v) => return Ok(v),
            Err(EmbedError::Invalid(e)) => return Err(EmbedError::Invalid(e)),
            Err(e @ EmbedError::Unavailable(_)) => {
                tracing::warn!(attempt, error = %e, "embedder call failed, retrying");
                last_err = Some(e);
                if attempt < policy.max_attempts {
                    std::thread::sleep(policy.delay_for_attempt(attempt));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EmbedError::Unavailable("exhausted retries".into())))
}

/// L2-normalize a vector in place (shared by both embedder implementations)
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}
