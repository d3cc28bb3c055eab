//! Per-endpoint token-bucket rate limiting.
//!
//! NCBI allows 3 req/s without an API key and 10 req/s with one; the
//! embedding service is paced at the batch-group level by its client, so its
//! bucket only spaces group launches. Callers suspend in `acquire` until a
//! token frees — no busy waiting, no dropped requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Third-party endpoints with independent ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    PubMed,
    Embedding,
}

/// PubMed request ceiling for the given key situation.
pub fn pubmed_rps(has_api_key: bool) -> f64 {
    if has_api_key {
        10.0
    } else {
        3.0
    }
}

struct Bucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: f64) -> Self {
        Self {
            rate,
            capacity: rate.max(1.0),
            tokens: rate.max(1.0),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token bucket keyed by endpoint. Cheap to clone and share.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<Endpoint, Bucket>>>,
}

impl RateLimiter {
    pub fn new(pubmed_rps: f64, embedding_rps: f64) -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(Endpoint::PubMed, Bucket::new(pubmed_rps));
        buckets.insert(Endpoint::Embedding, Bucket::new(embedding_rps));
        Self {
            buckets: Arc::new(Mutex::new(buckets)),
        }
    }

    /// Suspend until a request slot for `endpoint` is available.
    pub async fn acquire(&self, endpoint: Endpoint) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(endpoint)
                    .or_insert_with(|| Bucket::new(1.0));
                let now = Instant::now();
                bucket.refill(now);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Time until one whole token accrues.
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubmed_rps_defaults() {
        assert_eq!(pubmed_rps(false), 3.0);
        assert_eq!(pubmed_rps(true), 10.0);
    }

    #[tokio::test]
    async fn test_burst_within_capacity_is_immediate() {
        let limiter = RateLimiter::new(3.0, 1.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(Endpoint::PubMed).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(2.0, 1.0);
        limiter.acquire(Endpoint::PubMed).await;
        limiter.acquire(Endpoint::PubMed).await;
        let start = Instant::now();
        limiter.acquire(Endpoint::PubMed).await;
        // Bucket was empty; the third acquire needed ~0.5 s of refill.
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_endpoints_are_independent() {
        let limiter = RateLimiter::new(1.0, 1.0);
        limiter.acquire(Endpoint::PubMed).await;
        let start = Instant::now();
        limiter.acquire(Endpoint::Embedding).await;
        // Draining PubMed must not delay the embedding bucket.
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
