//! Error taxonomy shared across the Credential Vault, Reservation Queue, Upstream
//! Protocol Client, and Scheduler, composed into a single top-level [`AppError`]
//! mapped to HTTP codes at the control surface boundary.

use thiserror::Error;

use crate::kvs::KvsError;
use crate::upstream::error::UpstreamStep;
use crate::vault::VaultError;

/// Top-level error kind surfaced to the control surface.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request or unparseable time (400).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing owner identifier, or wrong upstream credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Quota exceeded, as reported by the accounting collaborator (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Reservation id unknown, or not owned by the caller (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// WAF challenge retry budget exhausted (503); an operational signal to refresh cookies.
    #[error("waf-blocked: {0}")]
    WafBlocked(String),

    /// Any other upstream failure, preserving the step/status/message triple (500).
    #[error("network error during {step:?}: {message}")]
    Network {
        step: UpstreamStep,
        status: Option<u16>,
        message: String,
    },

    /// KVS, serialization, or other unexpected error (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}

impl From<KvsError> for AppError {
    fn from(e: KvsError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<VaultError> for AppError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Corrupt(msg) => AppError::Internal(format!("corrupt ciphertext: {msg}")),
            VaultError::Config(msg) => AppError::Internal(format!("vault misconfigured: {msg}")),
            VaultError::Kvs(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_step_for_network_errors() {
        let err = AppError::Network {
            step: UpstreamStep::Find,
            status: Some(503),
            message: "timeout".into(),
        };
        assert!(format!("{err}").contains("Find"));
    }
}
