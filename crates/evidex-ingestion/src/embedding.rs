//! Embedding client — converts chunk text into vectors via the external
//! `/v1/embeddings` service.
//!
//! Batches of up to `batch_size` texts run in adaptive parallel groups.
//! Rate-limit responses honour the server's `try again in X.XXXs` hint;
//! network errors back off exponentially. The adaptive-parallelism counters
//! live inside the one client value the process owns, behind a mutex.

use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use evidex_common::error::{EvidexError, Result};
use evidex_common::rate_limit::{Endpoint, RateLimiter};

use crate::models::{Stage, StageError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    /// Texts per request.
    pub batch_size: usize,
    /// Starting number of concurrent batches in a group.
    pub initial_parallel: usize,
    /// Ceiling the adaptive controller may climb back to.
    pub max_parallel: usize,
    /// Attempts per batch before it fails terminally.
    pub max_retries: u32,
    /// Per-batch launch stagger inside a group.
    pub stagger: Duration,
}

impl EmbeddingConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            base_url: None,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions: 1536,
            batch_size: 200,
            initial_parallel: 3,
            max_parallel: 5,
            max_retries: 5,
            stagger: Duration::from_millis(200),
        }
    }
}

/// Adaptive-parallelism state: two consecutive rate-limited batches halve
/// the group width (floor 1); a full minute without rate limiting raises it
/// by one, up to the configured maximum.
struct AdaptiveState {
    parallel: usize,
    consecutive_rate_limited: u32,
    last_rate_limit: Instant,
}

impl AdaptiveState {
    fn new(initial: usize) -> Self {
        Self {
            parallel: initial.max(1),
            consecutive_rate_limited: 0,
            last_rate_limit: Instant::now(),
        }
    }

    fn current(&mut self, max_parallel: usize, now: Instant) -> usize {
        if now.duration_since(self.last_rate_limit) >= Duration::from_secs(60) {
            self.parallel = (self.parallel + 1).min(max_parallel.max(1));
            self.last_rate_limit = now;
        }
        self.parallel
    }

    fn note_batch(&mut self, rate_limited: bool, now: Instant) {
        if rate_limited {
            self.consecutive_rate_limited += 1;
            self.last_rate_limit = now;
            if self.consecutive_rate_limited >= 2 {
                self.parallel = (self.parallel / 2).max(1);
                self.consecutive_rate_limited = 0;
            }
        } else {
            self.consecutive_rate_limited = 0;
        }
    }
}

/// Result of embedding a slice of texts. `vectors[i]` is `None` when the
/// batch containing text `i` failed terminally; each such batch also
/// contributes one stage=embed error.
pub struct EmbedOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub errors: Vec<StageError>,
}

enum BatchError {
    RateLimited { hint: Option<f64> },
    Network(String),
    Fatal(String),
}

pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    limiter: RateLimiter,
    state: Mutex<AdaptiveState>,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig, limiter: RateLimiter) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let state = Mutex::new(AdaptiveState::new(config.initial_parallel));
        Ok(Self {
            client,
            config,
            limiter,
            state,
        })
    }

    /// Embed all texts; output order equals input order. Failed batches
    /// surface as `None` runs plus one error each — the caller decides
    /// whether to drop or abort.
    #[instrument(skip(self, texts), fields(n = texts.len()))]
    pub async fn embed_all(&self, texts: &[String]) -> EmbedOutcome {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut errors = Vec::new();
        if texts.is_empty() {
            return EmbedOutcome { vectors, errors };
        }

        let batches: Vec<&[String]> = texts.chunks(self.config.batch_size).collect();
        let mut next = 0usize;

        while next < batches.len() {
            // Inter-group pacing; the adaptive controller handles the rest.
            self.limiter.acquire(Endpoint::Embedding).await;

            let parallel = {
                let mut state = self.state.lock().await;
                state.current(self.config.max_parallel, Instant::now())
            };
            let group = &batches[next..(next + parallel).min(batches.len())];

            let tasks = group.iter().enumerate().map(|(i, batch)| async move {
                if i > 0 {
                    // Stagger launches to avoid a thundering herd.
                    tokio::time::sleep(self.config.stagger * i as u32).await;
                }
                self.embed_batch(batch).await
            });

            // join_all preserves submission order regardless of completion order.
            for result in futures::future::join_all(tasks).await {
                match result {
                    Ok(batch_vectors) => {
                        vectors.extend(batch_vectors.into_iter().map(Some));
                    }
                    Err((batch_len, message)) => {
                        warn!(batch_len, "embedding batch failed terminally: {message}");
                        vectors.extend(std::iter::repeat_with(|| None).take(batch_len));
                        errors.push(StageError::new(Stage::Embed, message));
                    }
                }
            }
            next += group.len();
        }

        EmbedOutcome { vectors, errors }
    }

    /// Strict variant: every vector or an error. Output length and order
    /// match the input.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let outcome = self.embed_all(texts).await;
        if let Some(err) = outcome.errors.into_iter().next() {
            return Err(EvidexError::Pipeline(err.message));
        }
        outcome
            .vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EvidexError::Pipeline("embedding returned a gap".to_string()))
    }

    /// One batch with the retry policy. Errors carry the batch length so the
    /// caller can pad the output.
    async fn embed_batch(&self, batch: &[String]) -> std::result::Result<Vec<Vec<f32>>, (usize, String)> {
        let mut retries_left = self.config.max_retries;
        let mut attempt: u32 = 0;
        let mut was_rate_limited = false;

        loop {
            match self.request_embeddings(batch).await {
                Ok(vectors) => {
                    let mut state = self.state.lock().await;
                    state.note_batch(was_rate_limited, Instant::now());
                    return Ok(vectors);
                }
                Err(BatchError::RateLimited { hint }) => {
                    was_rate_limited = true;
                    {
                        let mut state = self.state.lock().await;
                        state.note_batch(true, Instant::now());
                    }
                    if retries_left == 0 {
                        return Err((batch.len(), "rate limited after all retries".to_string()));
                    }
                    retries_left -= 1;
                    let base = hint.unwrap_or(2.0) * 1.1;
                    let jitter = rand::thread_rng().gen_range(0.0..0.5);
                    let wait = Duration::from_secs_f64(base + jitter);
                    debug!(?wait, "rate limited; honouring server hint");
                    tokio::time::sleep(wait).await;
                }
                Err(BatchError::Network(message)) => {
                    if retries_left == 0 {
                        return Err((batch.len(), format!("network error after all retries: {message}")));
                    }
                    retries_left -= 1;
                    let wait = Duration::from_secs(1u64 << attempt.min(5));
                    debug!(?wait, "network error; backing off: {message}");
                    tokio::time::sleep(wait).await;
                }
                Err(BatchError::Fatal(message)) => {
                    return Err((batch.len(), message));
                }
            }
            attempt += 1;
        }
    }

    async fn request_embeddings(
        &self,
        batch: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, BatchError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{base}/v1/embeddings");
        let body = serde_json::json!({
            "model": &self.config.model,
            "input": batch,
            "dimensions": self.config.dimensions,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BatchError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Err(BatchError::RateLimited {
                hint: parse_retry_hint(&text),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if is_rate_limit_payload(&text) {
                return Err(BatchError::RateLimited {
                    hint: parse_retry_hint(&text),
                });
            }
            return Err(BatchError::Fatal(format!(
                "embedding service returned HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BatchError::Network(e.to_string()))?;
        let data = payload["data"]
            .as_array()
            .ok_or_else(|| BatchError::Fatal("embedding response missing data array".to_string()))?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|xs| xs.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                    .unwrap_or_default()
            })
            .collect();

        if vectors.len() != batch.len() {
            return Err(BatchError::Fatal(format!(
                "embedding count mismatch: sent {}, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Parse the server's `try again in X.XXXs` hint out of an error payload.
fn parse_retry_hint(body: &str) -> Option<f64> {
    lazy_static! {
        static ref HINT: Regex = Regex::new(r"try again in ([0-9]+(?:\.[0-9]+)?)s").unwrap();
    }
    HINT.captures(body)
        .and_then(|caps| caps[1].parse().ok())
}

/// Some gateways return rate-limit payloads under other HTTP statuses.
fn is_rate_limit_payload(body: &str) -> bool {
    body.contains("rate_limit") || body.contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_hint() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 1.500s.","type":"tokens"}}"#;
        assert_eq!(parse_retry_hint(body), Some(1.5));
        assert_eq!(parse_retry_hint("try again in 20s"), Some(20.0));
        assert_eq!(parse_retry_hint("no hint at all"), None);
    }

    #[test]
    fn test_rate_limit_payload_detection() {
        assert!(is_rate_limit_payload(r#"{"error":{"type":"rate_limit_exceeded"}}"#));
        assert!(!is_rate_limit_payload(r#"{"error":{"type":"invalid_request"}}"#));
    }

    #[test]
    fn test_adaptive_halves_after_two_consecutive_rate_limits() {
        let now = Instant::now();
        let mut state = AdaptiveState::new(4);
        state.note_batch(true, now);
        assert_eq!(state.parallel, 4);
        state.note_batch(true, now);
        assert_eq!(state.parallel, 2);
        state.note_batch(true, now);
        state.note_batch(true, now);
        assert_eq!(state.parallel, 1);
        // Floor is 1.
        state.note_batch(true, now);
        state.note_batch(true, now);
        assert_eq!(state.parallel, 1);
    }

    #[test]
    fn test_adaptive_success_resets_streak() {
        let now = Instant::now();
        let mut state = AdaptiveState::new(4);
        state.note_batch(true, now);
        state.note_batch(false, now);
        state.note_batch(true, now);
        // Never two in a row: width untouched.
        assert_eq!(state.parallel, 4);
    }

    #[test]
    fn test_adaptive_recovers_after_quiet_minute() {
        let mut state = AdaptiveState::new(4);
        let now = Instant::now();
        state.note_batch(true, now);
        state.note_batch(true, now);
        assert_eq!(state.parallel, 2);

        // Within the quiet minute: unchanged.
        assert_eq!(state.current(5, now + Duration::from_secs(30)), 2);
        // After a full quiet minute: one step back up.
        assert_eq!(state.current(5, now + Duration::from_secs(61)), 3);
        // The step resets the window; no immediate second bump.
        assert_eq!(state.current(5, now + Duration::from_secs(62)), 3);
        // Ceiling holds.
        assert_eq!(state.current(3, now + Duration::from_secs(200)), 3);
    }

    #[test]
    fn test_embedding_config_defaults() {
        let cfg = EmbeddingConfig::new("key".to_string());
        assert_eq!(cfg.model, "text-embedding-3-small");
        assert_eq!(cfg.dimensions, 1536);
        assert_eq!(cfg.batch_size, 200);
        assert_eq!(cfg.initial_parallel, 3);
        assert_eq!(cfg.max_retries, 5);
    }
}
