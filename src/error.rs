//! Error types for the bridge and for host callbacks

use std::fmt;
use thiserror::Error;

/// A script exception pulled out of the engine.
///
/// The thrown value itself stays inside the engine; this is the readable
/// summary a Rust caller can inspect after the exception has been cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JsException {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl fmt::Display for JsException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)?;
        } else {
            write!(f, "{}: {}", self.name, self.message)?;
        }
        if let Some(stack) = &self.stack {
            let stack = stack.trim_end();
            if !stack.is_empty() {
                write!(f, "\n{}", stack)?;
            }
        }
        Ok(())
    }
}

/// Main error type for the Rust surface of the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A heap cell or engine buffer could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    #[error("{0}")]
    Exception(JsException),

    #[error("failed to create engine runtime")]
    RuntimeCreation,

    #[error("failed to create engine context")]
    ContextCreation,

    #[error("string contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    #[error("engine returned invalid UTF-8")]
    InvalidUtf8,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Exception(JsException {
            name: name.into(),
            message: message.into(),
            stack: None,
        })
    }

    /// The script exception carried by this error, if any
    pub fn as_exception(&self) -> Option<&JsException> {
        match self {
            BridgeError::Exception(exception) => Some(exception),
            _ => None,
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Error returned by a [`Host`](crate::Host) callback.
///
/// The bridge never lets these cross back into the engine as Rust values: each
/// one becomes a thrown script error at the point the callback returns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    TypeError(String),

    #[error(
        "Module not found: '{specifier}'. Please check that the module name is correct and the module is available in your environment."
    )]
    NotFound { specifier: String },

    /// The host reported success but produced no value where one was required
    #[error("host returned no {what} for '{specifier}'")]
    NullResult {
        what: &'static str,
        specifier: String,
    },

    #[error("host does not implement {0}")]
    Unsupported(&'static str),
}

impl HostError {
    pub fn message(message: impl Into<String>) -> Self {
        HostError::Message(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        HostError::TypeError(message.into())
    }

    pub fn not_found(specifier: impl Into<String>) -> Self {
        HostError::NotFound {
            specifier: specifier.into(),
        }
    }

    pub fn null_result(what: &'static str, specifier: impl Into<String>) -> Self {
        HostError::NullResult {
            what,
            specifier: specifier.into(),
        }
    }

    /// Whether this error is thrown into script as a `TypeError`
    pub fn is_type_error(&self) -> bool {
        !matches!(self, HostError::Message(_))
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Marker for "an exception is pending on the context".
///
/// Internal raw paths return this instead of a value; the caller decides
/// whether the pending exception becomes an exception handle or a
/// [`BridgeError::Exception`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Thrown;
