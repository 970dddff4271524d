//! Error types for parsing and structural rewriting.
//!
//! Every fallible operation in `layerfix-syntax` reports a [`SyntaxError`].
//! Layers treat these errors as recoverable: a failed structural transform
//! triggers the pattern fallback rather than aborting the pipeline.

use thiserror::Error;

use crate::language::SupportedLanguage;

/// Errors from parsing and rewrite operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyntaxError {
    /// Failed to initialise the Tree-sitter parser for a language.
    #[error("failed to initialise parser for {language}: {message}")]
    ParserInitError {
        /// The language that failed to initialise.
        language: SupportedLanguage,
        /// Description of the failure.
        message: String,
    },

    /// The source could not be parsed cleanly.
    #[error("failed to parse {language}: {message}")]
    ParseError {
        /// The language that failed to parse.
        language: SupportedLanguage,
        /// Description of the failure.
        message: String,
    },

    /// A rewrite produced output that could not be accepted.
    #[error("rewrite failed: {message}")]
    RewriteError {
        /// Description of the rewrite failure.
        message: String,
    },

    /// A pattern fallback was rejected by the structural gate.
    #[error("pattern fallback `{fallback}` rejected: {reason}")]
    FallbackRejected {
        /// Name of the fallback whose output was discarded.
        fallback: String,
        /// Why the output failed the gate.
        reason: String,
    },

    /// Internal error indicating a bug or system failure.
    #[error("internal error: {message}")]
    InternalError {
        /// Description of the internal error.
        message: String,
    },
}

impl SyntaxError {
    /// Creates a parser initialisation error.
    #[must_use]
    pub fn parser_init(language: SupportedLanguage, message: impl Into<String>) -> Self {
        Self::ParserInitError {
            language,
            message: message.into(),
        }
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(language: SupportedLanguage, message: impl Into<String>) -> Self {
        Self::ParseError {
            language,
            message: message.into(),
        }
    }

    /// Creates a rewrite error.
    #[must_use]
    pub fn rewrite(message: impl Into<String>) -> Self {
        Self::RewriteError {
            message: message.into(),
        }
    }

    /// Creates a fallback rejection error.
    #[must_use]
    pub fn fallback_rejected(fallback: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FallbackRejected {
            fallback: fallback.into(),
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Returns true when the error came from parsing the input buffer.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::ParseError { .. })
    }
}
