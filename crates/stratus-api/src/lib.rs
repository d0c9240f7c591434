//! Stratus API client library
//!
//! Provides the signed-request core used by the `stratus` CLI:
//! - Resolves API identity material from the environment or the OS
//!   credential store
//! - Signs short-lived ES256 bearer tokens and reuses them until close
//!   to expiry
//! - Issues typed API calls (list, create, trigger, poll) with retry on
//!   transient failures

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod model;
pub mod retry;
pub mod telemetry;
pub mod testutil;
pub mod token;

pub use client::{ApiClient, HttpResponse, HttpTransport, ReqwestTransport};
pub use config::{ApiConfig, RetryConfig, DEFAULT_BASE_URL};
pub use credentials::{
    Credential, CredentialResolver, CredentialSource, Env, KeyringStore, ProcessEnv, SecretStore,
    StoredCredential,
};
pub use error::ApiError;
pub use model::{
    ApiRequest, BuildStatus, IdempotencyKey, Method, Resource, ResourceKind, TriggerParameters,
    TriggerType, WorkflowSpec,
};
pub use token::{SignedToken, TokenCache, TokenSigner};

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ApiError>;
