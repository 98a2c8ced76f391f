// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge.
//!
//! Converts Figment deserialization errors into miette diagnostics with
//! valid key listings, rendered at startup before the process exits.

use miette::Diagnostic;
use thiserror::Error;

/// A configuration error with diagnostic information.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// An unknown key was found in the configuration.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(flowline::config::unknown_key),
        help("valid keys: {valid_keys}")
    )]
    UnknownKey {
        /// The unrecognized key name.
        key: String,
        /// List of valid keys for the section.
        valid_keys: String,
    },

    /// A configuration value failed deserialization.
    #[error("invalid configuration value: {detail}")]
    #[diagnostic(code(flowline::config::invalid_value))]
    InvalidValue {
        /// Description of the failure, including the key path when known.
        detail: String,
    },

    /// A semantic validation error for a config value.
    #[error("validation error: {message}")]
    #[diagnostic(code(flowline::config::validation))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Convert a `figment::Error` into a list of `ConfigError` diagnostics.
///
/// A figment error may aggregate several underlying errors; each is
/// converted to its own diagnostic so all problems surface in one run.
pub fn figment_to_config_errors(err: figment::Error) -> Vec<ConfigError> {
    use figment::error::Kind;

    let mut errors = Vec::new();
    for error in err {
        let path = error.path.join(".");
        let config_error = match &error.kind {
            Kind::UnknownField(field, expected) => ConfigError::UnknownKey {
                key: if path.is_empty() {
                    field.clone()
                } else {
                    format!("{path}.{field}")
                },
                valid_keys: expected.join(", "),
            },
            other => ConfigError::InvalidValue {
                detail: if path.is_empty() {
                    other.to_string()
                } else {
                    format!("{path}: {other}")
                },
            },
        };
        errors.push(config_error);
    }
    errors
}

/// Render all config errors to stderr as miette reports.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        let report = miette::Report::msg(format!("{error}"));
        eprintln!("{report:?}");
        if let Some(help) = error.help() {
            eprintln!("  help: {help}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_becomes_unknown_key() {
        let err = crate::loader::load_config_from_str("[engine]\nbogus = 1\n").unwrap_err();
        let errors = figment_to_config_errors(err);
        assert!(!errors.is_empty());
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ConfigError::UnknownKey { key, .. } if key.contains("bogus")))
        );
    }

    #[test]
    fn type_mismatch_becomes_invalid_value() {
        let err =
            crate::loader::load_config_from_str("[scheduler]\npoll_ms = \"soon\"\n").unwrap_err();
        let errors = figment_to_config_errors(err);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ConfigError::InvalidValue { .. }))
        );
    }
}
