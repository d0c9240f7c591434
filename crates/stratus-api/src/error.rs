//! Error types for the Stratus API client

use thiserror::Error;

/// Failures the client can surface.
///
/// The set is closed so callers can handle every outcome exhaustively:
/// credential and signing failures never self-resolve, transient failures
/// and timeouts are eligible for retry, everything else propagates as-is.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No source yielded a complete credential
    #[error("credential material not found: {0}")]
    CredentialMissing(String),

    /// A source yielded a credential that does not parse
    #[error("credential material is malformed: {0}")]
    CredentialMalformed(String),

    /// Token construction or signing failed
    #[error("token signing failed: {0}")]
    SigningFailure(String),

    /// The API rejected the token (401/403); re-resolve credentials
    #[error("authorization rejected by the API (HTTP {status}): {message}")]
    AuthorizationFailure { status: u16, message: String },

    /// The addressed resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Rate limit, server error, or network failure; eligible for retry
    #[error("transient API failure: {message}")]
    Transient { status: Option<u16>, message: String },

    /// The API rejected the request itself (other 4xx); never retried
    #[error("request rejected by the API (HTTP {status}): {message}")]
    RequestInvalid { status: u16, message: String },

    /// No response arrived within the per-request timeout
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl ApiError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transient { .. } | ApiError::Timeout { .. }
        )
    }

    /// Stable kind label, used for error rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::CredentialMissing(_) => "credential-missing",
            ApiError::CredentialMalformed(_) => "credential-malformed",
            ApiError::SigningFailure(_) => "signing-failure",
            ApiError::AuthorizationFailure { .. } => "authorization-failure",
            ApiError::NotFound(_) => "not-found",
            ApiError::Transient { .. } => "transient",
            ApiError::RequestInvalid { .. } => "request-invalid",
            ApiError::Timeout { .. } => "timeout",
        }
    }

    /// Process exit status reflecting this failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            ApiError::CredentialMissing(_) => 3,
            ApiError::CredentialMalformed(_) => 4,
            ApiError::SigningFailure(_) => 5,
            ApiError::AuthorizationFailure { .. } => 6,
            ApiError::NotFound(_) => 7,
            ApiError::RequestInvalid { .. } => 8,
            ApiError::Transient { .. } => 9,
            ApiError::Timeout { .. } => 10,
        }
    }
}
