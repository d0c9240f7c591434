//! Short-lived signed tokens for API authentication.
//!
//! Tokens are ES256 JWTs (P-256, SHA-256) carrying the issuer identifier,
//! an issue/expiry window, and the audience of the target API. The key
//! identifier rides in the token header so the API can select the matching
//! public key. A signed token is reused until it is within a safety margin
//! of expiry; past that, the next request signs a fresh one.

use crate::credentials::Credential;
use crate::error::ApiError;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Fixed token lifetime (20 minutes).
pub const TOKEN_LIFETIME_SECS: i64 = 20 * 60;
/// Tokens closer than this to expiry are not reused.
pub const REFRESH_MARGIN_SECS: i64 = 60;
/// Audience claim identifying the target API.
pub const TOKEN_AUDIENCE: &str = "stratus-api-v1";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
}

/// A signed bearer token with its validity window.
#[derive(Debug, Clone)]
pub struct SignedToken {
    value: SecretString,
    /// When the token was issued
    pub issued_at: DateTime<Utc>,
    /// When the token stops being valid
    pub expires_at: DateTime<Utc>,
}

impl SignedToken {
    /// The compact JWT for the Authorization header.
    pub fn bearer(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the token is too close to expiry to be reused at `now`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Signs API tokens from a resolved credential.
pub struct TokenSigner {
    key_id: String,
    issuer_id: Uuid,
    encoding_key: EncodingKey,
}

impl TokenSigner {
    /// Build a signer from a resolved credential.
    pub fn new(credential: &Credential) -> Result<Self> {
        let encoding_key =
            EncodingKey::from_ec_pem(credential.private_key.expose_secret().as_bytes())
                .map_err(|e| ApiError::SigningFailure(format!("private key rejected: {e}")))?;

        Ok(TokenSigner {
            key_id: credential.key_id.clone(),
            issuer_id: credential.issuer_id,
            encoding_key,
        })
    }

    /// Sign a fresh token valid from now.
    pub fn sign(&self) -> Result<SignedToken> {
        self.sign_at(Utc::now())
    }

    /// Sign a token with an explicit issue time.
    ///
    /// ECDSA signatures are randomized: two tokens over the same window
    /// differ in bytes but both validate.
    pub fn sign_at(&self, now: DateTime<Utc>) -> Result<SignedToken> {
        let issued_at = now;
        let expires_at = issued_at + Duration::seconds(TOKEN_LIFETIME_SECS);

        let claims = Claims {
            iss: self.issuer_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            aud: TOKEN_AUDIENCE.to_string(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        let value = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ApiError::SigningFailure(e.to_string()))?;

        Ok(SignedToken {
            value: SecretString::from(value),
            issued_at,
            expires_at,
        })
    }
}

/// Single-slot token cache.
///
/// The mutex is the one critical section of the client: a batch of
/// commands sharing a client never signs two tokens concurrently.
#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<SignedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        TokenCache::default()
    }

    /// A bearer token valid for at least the refresh margin.
    pub fn bearer(&self, signer: &TokenSigner) -> Result<String> {
        self.bearer_at(signer, Utc::now())
    }

    /// As [`bearer`](Self::bearer) with an explicit clock.
    pub fn bearer_at(&self, signer: &TokenSigner, now: DateTime<Utc>) -> Result<String> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ApiError::SigningFailure("token cache lock poisoned".to_string()))?;

        if let Some(token) = slot.as_ref() {
            if !token.needs_refresh_at(now) {
                return Ok(token.bearer().to_string());
            }
        }

        let token = signer.sign_at(now)?;
        let bearer = token.bearer().to_string();
        *slot = Some(token);
        Ok(bearer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_credential, EC_PUBLIC_KEY_PEM, TEST_ISSUER_ID, TEST_KEY_ID};
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

    fn signer() -> TokenSigner {
        TokenSigner::new(&test_credential()).expect("signer")
    }

    fn decode_claims(token: &str) -> Claims {
        let key = DecodingKey::from_ec_pem(EC_PUBLIC_KEY_PEM.as_bytes()).expect("public key");
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.leeway = 0;
        validation.validate_exp = false;
        decode::<Claims>(token, &key, &validation)
            .expect("token validates")
            .claims
    }

    #[test]
    fn test_sign_produces_validating_token_with_expected_claims() {
        let token = signer().sign().expect("sign");
        let claims = decode_claims(token.bearer());

        assert_eq!(claims.iss, TEST_ISSUER_ID);
        assert_eq!(claims.aud, TOKEN_AUDIENCE);
        assert_eq!(claims.exp - claims.iat, TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn test_expiry_is_exactly_lifetime_after_issue() {
        let now = Utc::now();
        let token = signer().sign_at(now).expect("sign");

        assert_eq!(token.issued_at, now);
        assert_eq!(
            token.expires_at - token.issued_at,
            Duration::seconds(TOKEN_LIFETIME_SECS)
        );
    }

    #[test]
    fn test_key_id_rides_in_header() {
        let token = signer().sign().expect("sign");
        let header = decode_header(token.bearer()).expect("header");

        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some(TEST_KEY_ID));
    }

    #[test]
    fn test_two_signings_both_validate() {
        let signer = signer();
        let now = Utc::now();
        let a = signer.sign_at(now).expect("sign a");
        let b = signer.sign_at(now).expect("sign b");

        decode_claims(a.bearer());
        decode_claims(b.bearer());
    }

    #[test]
    fn test_refresh_window_boundaries() {
        let now = Utc::now();
        let token = signer().sign_at(now).expect("sign");
        let boundary = now + Duration::seconds(TOKEN_LIFETIME_SECS - REFRESH_MARGIN_SECS);

        assert!(!token.needs_refresh_at(now));
        assert!(!token.needs_refresh_at(boundary - Duration::seconds(1)));
        assert!(token.needs_refresh_at(boundary));
        assert!(token.needs_refresh_at(boundary + Duration::seconds(1)));
    }

    #[test]
    fn test_cache_reuses_until_margin() {
        let signer = signer();
        let cache = TokenCache::new();
        let t0 = Utc::now();

        let first = cache.bearer_at(&signer, t0).expect("first");
        let reused = cache
            .bearer_at(&signer, t0 + Duration::seconds(TOKEN_LIFETIME_SECS / 2))
            .expect("reused");

        assert_eq!(first, reused);
    }

    #[test]
    fn test_cache_resigns_at_margin() {
        let signer = signer();
        let cache = TokenCache::new();
        let t0 = Utc::now();

        let first = cache.bearer_at(&signer, t0).expect("first");
        let refresh_at = t0 + Duration::seconds(TOKEN_LIFETIME_SECS - REFRESH_MARGIN_SECS);
        let refreshed = cache.bearer_at(&signer, refresh_at).expect("refreshed");

        // The re-signed token carries the later issue time.
        assert_eq!(decode_claims(&first).iat, t0.timestamp());
        assert_eq!(decode_claims(&refreshed).iat, refresh_at.timestamp());
    }

    #[test]
    fn test_signer_rejects_garbage_key() {
        let credential = Credential {
            key_id: TEST_KEY_ID.to_string(),
            issuer_id: test_credential().issuer_id,
            private_key: SecretString::from("not a pem".to_string()),
        };

        assert!(matches!(
            TokenSigner::new(&credential),
            Err(ApiError::SigningFailure(_))
        ));
    }
}
