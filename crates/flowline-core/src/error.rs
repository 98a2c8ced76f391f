// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Flowline message pipeline.

use thiserror::Error;

/// The primary error type used across all Flowline crates.
#[derive(Debug, Error)]
pub enum FlowlineError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Stream transport errors (publish failure, consumer-group failure).
    ///
    /// These are the only errors a consumer loop is allowed to see from a
    /// handler invocation; everything else degrades to a logged fallback.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// External messaging-provider errors (API failure, rejected request).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FlowlineError {
    /// Shorthand for a transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        FlowlineError::Transport {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_construct_and_display() {
        let e = FlowlineError::Config("bad key".into());
        assert!(e.to_string().contains("configuration error"));

        let e = FlowlineError::Storage {
            source: Box::new(std::io::Error::other("disk gone")),
        };
        assert!(e.to_string().contains("disk gone"));

        let e = FlowlineError::transport("publish failed");
        assert_eq!(e.to_string(), "transport error: publish failed");

        let e = FlowlineError::Provider {
            message: "503 from upstream".into(),
            source: None,
        };
        assert!(e.to_string().contains("503"));
    }
}
