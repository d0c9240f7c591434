//! Credential resolution for the Stratus API.
//!
//! An API identity is three pieces: a key identifier, an issuer identifier,
//! and a P-256 private key. Resolution checks the process environment first,
//! then the OS credential store; the first source that yields all three
//! fields wins, and sources are never merged.

use crate::error::ApiError;
use crate::Result;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Environment variable holding the API key identifier.
pub const ENV_KEY_ID: &str = "STRATUS_KEY_ID";
/// Environment variable holding the issuer identifier.
pub const ENV_ISSUER_ID: &str = "STRATUS_ISSUER_ID";
/// Environment variable holding the path to a PEM private-key file.
pub const ENV_PRIVATE_KEY_PATH: &str = "STRATUS_PRIVATE_KEY_PATH";

/// Service name for entries in the OS credential store.
pub const KEYRING_SERVICE: &str = "stratus-cli";
/// Account under which the credential record is stored.
pub const KEYRING_ACCOUNT: &str = "api-credential";

/// A resolved API identity.
///
/// Never persisted by this crate; the private key stays wrapped so it
/// cannot leak through logging.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Key identifier, embedded in the token header
    pub key_id: String,
    /// Issuer identifier, embedded in the token claims
    pub issuer_id: Uuid,
    /// PEM-encoded P-256 private key
    pub private_key: SecretString,
}

/// Which source satisfied credential resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Store,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Store => write!(f, "credential store"),
        }
    }
}

/// Process environment lookup seam.
pub trait Env: Send + Sync {
    /// Read a variable, treating empty values as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// `Env` backed by the real process environment.
#[derive(Debug, Default, Clone)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

/// Secret storage seam over the OS credential store.
pub trait SecretStore: Send + Sync {
    /// Read an entry; `None` when the entry does not exist.
    fn get(&self, account: &str) -> Result<Option<String>>;

    /// Write an entry, replacing any existing value.
    fn put(&self, account: &str, value: &str) -> Result<()>;

    /// Remove an entry; removing a missing entry is not an error.
    fn delete(&self, account: &str) -> Result<()>;
}

/// `SecretStore` backed by the OS keyring.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Store scoped to a keyring service name.
    pub fn new(service: impl Into<String>) -> Self {
        KeyringStore {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, account).map_err(|e| {
            ApiError::CredentialMissing(format!("credential store unavailable: {e}"))
        })
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        KeyringStore::new(KEYRING_SERVICE)
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ApiError::CredentialMissing(format!(
                "credential store read failed: {e}"
            ))),
        }
    }

    fn put(&self, account: &str, value: &str) -> Result<()> {
        self.entry(account)?.set_password(value).map_err(|e| {
            ApiError::CredentialMissing(format!("credential store write failed: {e}"))
        })
    }

    fn delete(&self, account: &str) -> Result<()> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ApiError::CredentialMissing(format!(
                "credential store delete failed: {e}"
            ))),
        }
    }
}

/// JSON record kept in the OS credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub key_id: String,
    pub issuer_id: String,
    pub private_key_pem: String,
}

impl StoredCredential {
    /// Validate the record and build a usable credential from it.
    pub fn into_credential(self) -> Result<Credential> {
        build_credential(self.key_id, &self.issuer_id, self.private_key_pem)
    }
}

/// Resolves API identity material from the configured sources.
pub struct CredentialResolver<E: Env, S: SecretStore> {
    env: E,
    store: S,
}

impl CredentialResolver<ProcessEnv, KeyringStore> {
    /// Resolver over the process environment and the OS credential store.
    pub fn system() -> Self {
        CredentialResolver {
            env: ProcessEnv,
            store: KeyringStore::default(),
        }
    }
}

impl<E: Env, S: SecretStore> CredentialResolver<E, S> {
    /// Resolver over explicit source implementations.
    pub fn new(env: E, store: S) -> Self {
        CredentialResolver { env, store }
    }

    /// Resolve a credential, environment first, then the store.
    pub fn resolve(&self) -> Result<Credential> {
        self.resolve_with_source().map(|(credential, _)| credential)
    }

    /// As [`resolve`](Self::resolve), also reporting the winning source.
    pub fn resolve_with_source(&self) -> Result<(Credential, CredentialSource)> {
        if let Some(credential) = self.from_env()? {
            return Ok((credential, CredentialSource::Environment));
        }
        if let Some(credential) = self.from_store()? {
            return Ok((credential, CredentialSource::Store));
        }
        Err(ApiError::CredentialMissing(format!(
            "set {ENV_KEY_ID}, {ENV_ISSUER_ID} and {ENV_PRIVATE_KEY_PATH}, \
             or store a credential with `stratus auth set`"
        )))
    }

    fn from_env(&self) -> Result<Option<Credential>> {
        // A partially populated environment does not satisfy the source;
        // resolution falls through to the store.
        let (key_id, issuer_id, key_path) = match (
            self.env.var(ENV_KEY_ID),
            self.env.var(ENV_ISSUER_ID),
            self.env.var(ENV_PRIVATE_KEY_PATH),
        ) {
            (Some(key_id), Some(issuer_id), Some(key_path)) => (key_id, issuer_id, key_path),
            _ => return Ok(None),
        };

        let pem = std::fs::read_to_string(&key_path).map_err(|e| {
            ApiError::CredentialMissing(format!("private key file {key_path}: {e}"))
        })?;

        build_credential(key_id, &issuer_id, pem).map(Some)
    }

    fn from_store(&self) -> Result<Option<Credential>> {
        let Some(record) = self.store.get(KEYRING_ACCOUNT)? else {
            return Ok(None);
        };
        let record: StoredCredential = serde_json::from_str(&record).map_err(|e| {
            ApiError::CredentialMalformed(format!("stored credential record: {e}"))
        })?;
        record.into_credential().map(Some)
    }
}

/// Validate the three parts and assemble a credential.
fn build_credential(key_id: String, issuer_id: &str, pem: String) -> Result<Credential> {
    if key_id.trim().is_empty() {
        return Err(ApiError::CredentialMalformed(
            "key identifier is empty".to_string(),
        ));
    }

    let issuer_id = Uuid::parse_str(issuer_id.trim())
        .map_err(|e| ApiError::CredentialMalformed(format!("issuer identifier: {e}")))?;

    // Reject unusable key material now rather than at first signing.
    jsonwebtoken::EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
        ApiError::CredentialMalformed(format!("private key is not a valid P-256 key: {e}"))
    })?;

    Ok(Credential {
        key_id,
        issuer_id,
        private_key: SecretString::from(pem),
    })
}
