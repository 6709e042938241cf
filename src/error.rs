//! Error types for scenario.
//!
//! Every fallible operation returns `Result<T, ScenarioError>` instead of
//! panicking. Nothing is retried and nothing is swallowed: the only
//! non-fatal condition in the crate (storage meta-event decomposition) is
//! logged, not returned.

use thiserror::Error;

/// Result type alias for scenario operations.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Unified error type for all scenario operations.
///
/// # Design
///
/// Variants are grouped by who is at fault:
/// 1. Caller mistakes (configuration, lookups)
/// 2. Internal invariant violations (unknown meta-events)
/// 3. Replay failures (strict policy)
/// 4. Failures raised by the unit under test
#[derive(Debug, Error)]
pub enum ScenarioError {
    // ===== Caller Errors =====
    /// Invalid builder arguments or state that violates a model invariant.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// A container, relation or network requested by name does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What kind of entity was looked up.
        kind: &'static str,
        /// The name or id that was requested.
        name: String,
    },

    // ===== Internal Errors =====
    /// Meta-event name outside the fixed catalog.
    #[error("Internal error: unknown meta-event {0}")]
    UnknownMetaEvent(String),

    // ===== Replay Errors =====
    /// Strict replay saw a call that differs from the recorded one.
    #[error(
        "Replay mismatch at {call_site}[{cursor}]: expected {expected}, got {actual}"
    )]
    ReplayMismatch {
        /// Call-site key of the memo.
        call_site: String,
        /// Cursor position at which the mismatch occurred.
        cursor: usize,
        /// Recorded call signature.
        expected: String,
        /// Live call signature.
        actual: String,
    },

    /// Strict replay ran past the end of the recorded log.
    #[error("Replay exhausted at {call_site}[{cursor}]: no recorded call left")]
    ReplayExhausted {
        /// Call-site key of the memo.
        call_site: String,
        /// Cursor position past the end of the log.
        cursor: usize,
    },

    /// Archive hash does not match its payload.
    #[error("Archive integrity violation: hash mismatch")]
    ArchiveIntegrity,

    // ===== Unit Errors =====
    /// The unit under test returned an error while handling an event.
    #[error("Uncaught error in unit code while handling {event}: {message}")]
    UncaughtUnitError {
        /// Name of the event being dispatched.
        event: String,
        /// Rendered error raised by the unit.
        message: String,
    },

    // ===== Collaborator Errors =====
    /// No diff collaborator was provided.
    #[error("Diff unavailable: no state differ configured")]
    DiffUnavailable,

    // ===== I/O Errors =====
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ScenarioError {
    /// Create a configuration error with a message.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a lookup failure.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Check if this error signals an internal invariant violation.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::UnknownMetaEvent(_))
    }

    /// Check if this error was raised by the call-replay cache.
    #[must_use]
    pub const fn is_replay_failure(&self) -> bool {
        matches!(
            self,
            Self::ReplayMismatch { .. } | Self::ReplayExhausted { .. }
        )
    }
}
