//! evidex-common — shared infrastructure for the Evidex ingestion pipeline:
//! error taxonomy, environment configuration, and outbound rate limiting.

pub mod env;
pub mod error;
pub mod rate_limit;

pub use error::{EvidexError, Result};
