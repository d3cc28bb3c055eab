//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!
//! All calls go through the shared [`RateLimiter`]: 3 req/s without an NCBI
//! API key, 10 req/s with one.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};

use evidex_common::error::{EvidexError, Result};
use evidex_common::rate_limit::{Endpoint, RateLimiter};

use crate::models::IngestionConfig;

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// efetch accepts at most this many ids per request.
const FETCH_SUB_BATCH: usize = 500;

const USER_AGENT: &str = concat!("evidex/", env!("CARGO_PKG_VERSION"), " (medical evidence ingestion)");

pub struct PubMedClient {
    client: Client,
    limiter: RateLimiter,
    api_key: Option<String>,
}

impl PubMedClient {
    pub fn new(api_key: Option<String>, limiter: RateLimiter) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            limiter,
            api_key,
        })
    }

    /// Search PubMed and return matching PMIDs, server order preserved.
    /// An empty result set is an empty Vec, not an error.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        self.limiter.acquire(Endpoint::PubMed).await;

        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmax", max_results.to_string()),
            ("retmode", "json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        let resp = self.client.get(ESEARCH_URL).query(&params).send().await?;
        if !resp.status().is_success() {
            return Err(EvidexError::Protocol(format!(
                "esearch returned HTTP {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let pmids: Vec<String> = body["esearchresult"]["idlist"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();

        debug!(n = pmids.len(), "esearch returned PMIDs");
        Ok(pmids)
    }

    /// Fetch raw PubMed XML for the given PMIDs. Requests are split into
    /// sub-batches of at most 500 ids, paced by the rate limiter, and the
    /// bodies are concatenated in caller order.
    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    pub async fn fetch(&self, pmids: &[String]) -> Result<String> {
        if pmids.is_empty() {
            return Ok(String::new());
        }

        let mut bodies = Vec::new();
        for sub_batch in pmids.chunks(FETCH_SUB_BATCH) {
            self.limiter.acquire(Endpoint::PubMed).await;

            let mut params = vec![
                ("db", "pubmed".to_string()),
                ("id", sub_batch.join(",")),
                ("retmode", "xml".to_string()),
            ];
            if let Some(key) = &self.api_key {
                params.push(("api_key", key.clone()));
            }

            let resp = self.client.get(EFETCH_URL).query(&params).send().await?;
            if !resp.status().is_success() {
                return Err(EvidexError::Protocol(format!(
                    "efetch returned HTTP {}",
                    resp.status()
                )));
            }
            let body = resp.text().await?;
            if body.trim().is_empty() {
                warn!(n = sub_batch.len(), "efetch returned an empty body");
            }
            bodies.push(body);
        }

        Ok(bodies.join("\n"))
    }
}

// ── Query building ────────────────────────────────────────────────────────────

/// Build the esearch term for a topic under the run's filters:
/// topic against Title/Abstract, AND-ed with the optional year range,
/// language, abstract requirement, humans filter, and publication types.
pub fn build_query(topic: &str, config: &IngestionConfig) -> String {
    let mut clauses = vec![format!("({topic}[Title/Abstract])")];

    match (config.from_year, config.to_year) {
        (Some(from), Some(to)) => clauses.push(format!("{from}:{to}[dp]")),
        (Some(from), None) => clauses.push(format!("{from}:3000[dp]")),
        (None, Some(to)) => clauses.push(format!("1800:{to}[dp]")),
        (None, None) => {}
    }

    if let Some(lang) = &config.language {
        clauses.push(format!("{lang}[Language]"));
    }
    if config.require_abstract {
        clauses.push("hasabstract[text]".to_string());
    }
    if config.humans_only {
        clauses.push("humans[MeSH Terms]".to_string());
    }
    if let Some(types) = &config.publication_types {
        if !types.is_empty() {
            let ored = types
                .iter()
                .map(|t| format!("\"{t}\"[Publication Type]"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({ored})"));
        }
    }

    clauses.join(" AND ")
}
