use std::{error::Error as StdError, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Stable classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    Auth,
    InvalidResponse,
    ClientError,
    ServerError,
    Unknown,
}

impl RpcErrorKind {
    /// Classify an HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(Self::Auth),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => Some(Self::Unknown),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    pub status: Option<u16>,
    #[source]
    cause: Option<SharedCause>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            cause: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Auth, message)
    }

    pub fn invalid_response(cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        let cause = cause.into();
        Self::new(RpcErrorKind::InvalidResponse, cause.to_string()).with_cause(cause)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unknown, message)
    }
}

/// Caller passed an argument the operation cannot accept. Raised before any
/// request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract violation: `{parameter}` {reason}")]
pub struct ContractViolation {
    pub parameter: &'static str,
    pub reason: String,
}

impl ContractViolation {
    pub fn new(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self {
            parameter,
            reason: reason.into(),
        }
    }

    pub fn missing(parameter: &'static str) -> Self {
        Self::new(parameter, "must not be empty")
    }
}

/// Reject blank required string arguments.
pub fn require(parameter: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::missing(parameter));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
