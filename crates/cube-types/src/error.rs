//! Validation errors raised before any storage interaction.

/// A request field failed validation.
///
/// The `Display` output doubles as the log line emitted when a request is
/// dropped, e.g. `invalid type: Click` or `invalid start: yesterday`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The event-type name does not match `^[a-z][a-zA-Z0-9_]+$`.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// A timestamp field could not be parsed.
    #[error("invalid {field}: {value}")]
    InvalidTime {
        /// Which request field was rejected (`time`, `start`, `stop`).
        field: &'static str,
        /// The raw value as received.
        value: String,
    },

    /// An external event key was neither a string nor a number.
    #[error("invalid id: {0}")]
    InvalidKey(String),

    /// A regular-expression predicate did not compile.
    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why the regex engine rejected it.
        reason: String,
    },
}
