use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::account::Provider;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to {op} {path}: {cause}")]
    Io {
        path: PathBuf,
        op: &'static str,
        cause: String,
    },

    #[error("{provider} token refresh failed ({status}): {body_snippet}")]
    Refresh {
        provider: Provider,
        status: u16,
        body_snippet: String,
    },

    #[error("{provider} token refresh timed out after {seconds}s")]
    Timeout { provider: Provider, seconds: u64 },

    #[error("{provider} request failed: {message}")]
    Http { provider: Provider, message: String },

    #[error(
        "peer stores disagree on the {provider} credential ({stores}); reconcile them manually or run reauth"
    )]
    AmbiguousRecovery { provider: Provider, stores: String },

    #[error("account not found: {label}")]
    NotFound { label: String },

    #[error("account {label} comes from {source_name} and cannot be modified")]
    ImmutableSource { label: String, source_name: String },

    #[error("invalid label {label:?}: {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("no active {provider} account; run switch <label> first")]
    NoActiveLabel { provider: Provider },
}

impl AuthError {
    pub fn io(path: &Path, op: &'static str, cause: impl ToString) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            op,
            cause: cause.to_string(),
        }
    }

    pub fn parse(path: &Path, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_label(label: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLabel {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Io { .. } => "io",
            Self::Refresh { .. } => "refresh",
            Self::Timeout { .. } => "timeout",
            Self::Http { .. } => "http",
            Self::AmbiguousRecovery { .. } => "ambiguous-recovery",
            Self::NotFound { .. } => "not-found",
            Self::ImmutableSource { .. } => "immutable-source",
            Self::InvalidLabel { .. } => "invalid-label",
            Self::NoActiveLabel { .. } => "no-active-label",
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
    pub kind: &'static str,
    pub exit_code: i32,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            kind: "cli",
            exit_code,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(message, 2)
    }
}

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
            exit_code: 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
