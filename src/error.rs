use std::sync::Arc;

use thiserror::Error;

use crate::config::FlagValueType;

/// Represents a result type for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while configuring or evaluating flags.
///
/// Evaluation is designed to degrade rather than fail, so most of these never reach a caller of
/// the evaluation API. The only evaluation-time error is [`Error::Failed`], which is raised when
/// the effective error strategy of a flag is `FAIL`.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested flag is not present in the registry.
    #[error("flag not found")]
    FlagNotFound,

    /// The remote flag store could not be reached at all.
    #[error("remote flag store unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote flag store answered but could not evaluate the flag.
    #[error("remote evaluation of flag {key} failed: {message}")]
    RemoteEvaluation {
        /// Key of the flag.
        key: String,
        /// Error reported by the store.
        message: String,
    },

    /// A value does not have the type required by the flag.
    #[error("invalid flag type (expected: {expected}, found: {found})")]
    InvalidType {
        /// Type the value was coerced to.
        expected: FlagValueType,
        /// JSON type of the offending value.
        found: String,
    },

    /// An object flag payload is not valid JSON.
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    #[error("invalid json payload")]
    InvalidJson(#[source] Arc<serde_json::Error>),

    /// Declarative flag configuration could not be parsed.
    #[error("error parsing flag configuration")]
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// The default value configured for a flag disagrees with its value type.
    #[error("default value of flag {name} is not a valid {expected}")]
    InvalidDefaultValue {
        /// Name of the flag.
        name: String,
        /// Value type of the flag.
        expected: FlagValueType,
    },

    /// Two flags with different names share the same key.
    #[error("flags {first} and {second} share the key {key}")]
    DuplicateFlagKey {
        /// The shared key.
        key: String,
        /// Name of one flag, the lowest in alphabetical order.
        first: String,
        /// Name of the other flag.
        second: String,
    },

    /// A `CALLBACK` strategy references a callback that was never registered.
    #[error("flag {name} references unknown callback {callback}")]
    UnknownCallback {
        /// Name of the flag.
        name: String,
        /// Name of the missing callback.
        callback: String,
    },

    /// A `CALLBACK` strategy was configured without naming a callback.
    #[error("flag {name} uses the CALLBACK error strategy but names no callback")]
    MissingCallback {
        /// Name of the flag.
        name: String,
    },

    /// A fallback callback failed to produce a value.
    #[error("fallback callback failed: {0}")]
    Callback(String),

    /// Evaluation failed and the effective error strategy is `FAIL`.
    #[error("evaluation of flag {key} failed: {message}")]
    Failed {
        /// Key of the flag.
        key: String,
        /// Error that triggered the `FAIL` strategy.
        message: String,
    },
}

impl Error {
    pub(crate) fn invalid_json(err: serde_json::Error) -> Error {
        Error::InvalidJson(Arc::new(err))
    }
}
