//! Environment configuration.
//!
//! All runtime secrets arrive through the environment (or a `.env` file):
//!   DATABASE_URL        — Postgres connection string, pgvector-enabled (required)
//!   EMBEDDING_API_KEY   — key for the embedding service (required)
//!   EMBEDDING_BASE_URL  — override for the embedding endpoint (optional)
//!   NCBI_API_KEY        — raises the PubMed rate limit from 3 to 10 req/s (optional)

use sha2::{Digest, Sha256};

use crate::error::{EvidexError, Result};

#[derive(Debug, Clone)]
pub struct Env {
    pub database_url: String,
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub ncbi_api_key: Option<String>,
}

impl Env {
    /// Load configuration from the process environment, honouring `.env`.
    pub fn load() -> Result<Self> {
        // .env is optional; a missing file is not an error.
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            embedding_api_key: require("EMBEDDING_API_KEY")?,
            embedding_base_url: optional("EMBEDDING_BASE_URL"),
            ncbi_api_key: optional("NCBI_API_KEY"),
        })
    }
}

fn require(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| {
        EvidexError::Config(format!("required environment variable {name} is not set"))
    })
}

fn optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// A short, non-reversible fingerprint of a secret for display in `check-env`.
/// Never print the value itself.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{}", &hex[..12])
}

/// Presence report for `check-env`: (name, set?, fingerprint-or-dash).
pub fn check_env() -> Vec<(&'static str, bool, String)> {
    let _ = dotenvy::dotenv();
    ["DATABASE_URL", "EMBEDDING_API_KEY", "NCBI_API_KEY"]
        .iter()
        .map(|&name| match optional(name) {
            Some(v) => (name, true, fingerprint(&v)),
            None => (name, false, "-".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("postgres://user:pw@localhost/evidex");
        let b = fingerprint("postgres://user:pw@localhost/evidex");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 12);
    }

    #[test]
    fn test_fingerprint_does_not_leak_value() {
        let secret = "sk-very-secret-key";
        assert!(!fingerprint(secret).contains("secret"));
    }
}
