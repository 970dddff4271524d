use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(#[source] Arc<OrthoError>),
    /// A field failed validation after all layers were merged.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Dotted field name, such as `retry.max_attempts`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}
