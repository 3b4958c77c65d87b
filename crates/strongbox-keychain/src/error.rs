use thiserror::Error;

/// A failed invocation of the credential-store utility
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("security {verb} failed{}: {message}", status_suffix(.status))]
pub struct CommandError {
    /// Verb passed to the utility (`add-generic-password`, `unlock-keychain`, ...)
    pub verb: String,
    /// Exit status, if the process ran to completion
    pub status: Option<i32>,
    /// Diagnostic text reported by the utility, verbatim
    pub message: String,
}

impl CommandError {
    /// Create a command error
    pub fn new(verb: impl Into<String>, status: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            status,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<i32>) -> String {
    status
        .map(|code| format!(" (exit status {code})"))
        .unwrap_or_default()
}

/// Errors that can occur while working with a keychain
#[derive(Debug, Error)]
pub enum KeychainError {
    /// No keychain or entry matched the lookup
    #[error("{0}")]
    NotFound(String),

    /// The utility failed for any reason other than a lookup miss
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Entry type name outside the supported set
    #[error("Unknown entry type '{name}' (expected one of: {expected})")]
    UnknownEntryType { name: String, expected: String },
}

impl KeychainError {
    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Whether this error signals a lookup miss rather than an operational failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, KeychainError>;
