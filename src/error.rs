//! Error handling for Carteira
//!
//! Defines custom error types and establishes a unified Result type
//! using anyhow for context chaining and error propagation.

use thiserror::Error;

/// Core error types for portfolio operations
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("database error: {0}")]
    DbError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("enrichment error: {0}")]
    EnrichmentError(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Result type alias for portfolio operations
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = PortfolioError::DbError("connection failed".to_string());
        assert_eq!(err.to_string(), "database error: connection failed");
    }

    #[test]
    fn test_validation_error_variant() {
        let err = PortfolioError::ValidationError("resgate not valid for br_stock".to_string());
        assert!(err.to_string().starts_with("validation error"));
    }

    #[test]
    fn test_anyhow_context_chains_errors() {
        use anyhow::Context;
        let result: Result<()> =
            Err(anyhow::anyhow!("original error")).context("failed to process transaction");
        match result {
            Err(e) => {
                let msg = e.to_string();
                assert!(msg.contains("failed to process transaction"));
                let debug_msg = format!("{:?}", e);
                assert!(debug_msg.contains("original error") || msg.contains("original error"));
            }
            Ok(_) => panic!("expected error"),
        }
    }
}
