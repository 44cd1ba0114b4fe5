//! Identity token validation
//!
//! The `id_token` returned by the token endpoint is the only source of the
//! user's identity. Validation runs in a fixed order:
//!
//! 1. decode header and payload without verifying (no network on garbage)
//! 2. require `alg == RS256`
//! 3. require a `kid`
//! 4. resolve the key from the key store
//! 5. verify signature, `aud`, `iss`, `exp` and maximum age
//!
//! Pinning the algorithm before touching the key store closes the door on
//! algorithm confusion (`none`, HS256 keyed with a public key, ...).

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client_secret::unix_now;
use crate::constants::{BASE_DOMAIN, KEY_VERIFY_ALGORITHM, MAX_TOKEN_DURATION};
use crate::error::{Error, Result};
use crate::keys::KeyStore;

/// Decoded claims of an Apple identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable, team-scoped user identifier
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    /// Apple sends booleans as either `true` or `"true"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Validates identity tokens for one client ID.
pub struct IdentityTokenValidator {
    client_id: String,
    keys: Arc<dyn KeyStore>,
    max_age_secs: u64,
}

impl IdentityTokenValidator {
    pub fn new(client_id: impl Into<String>, keys: Arc<dyn KeyStore>) -> Self {
        Self {
            client_id: client_id.into(),
            keys,
            max_age_secs: MAX_TOKEN_DURATION,
        }
    }

    /// Validate `token` and return its claims.
    #[instrument(skip_all, fields(client_id = %self.client_id))]
    pub async fn validate(&self, token: &str) -> Result<IdentityClaims> {
        let header = decode_unverified(token)?;

        if header.alg.parse::<Algorithm>().ok() != Some(KEY_VERIFY_ALGORITHM) {
            return Err(Error::UnexpectedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(Error::MissingKeyId)?;

        let key = self.keys.signing_key(&kid).await?;

        let mut validation = Validation::new(KEY_VERIFY_ALGORITHM);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[BASE_DOMAIN]);
        validation.required_spec_claims =
            HashSet::from(["exp", "iat", "aud", "iss", "sub"].map(String::from));
        validation.leeway = 0;

        let claims = jsonwebtoken::decode::<IdentityClaims>(token, &key, &validation)
            .map_err(verification_error)?
            .claims;

        let age = unix_now().saturating_sub(claims.iat);
        if age > self.max_age_secs {
            return Err(Error::TokenTooOld);
        }

        debug!(kid = %kid, sub = %claims.sub, "identity token verified");
        Ok(claims)
    }
}

/// The header fields read before verification. `alg` stays a string so
/// algorithms `jsonwebtoken` does not know (`none`, ...) are still reported
/// by name.
#[derive(Debug, Deserialize)]
struct UnverifiedHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Parse the header and check the payload is a JSON object, without any
/// signature check.
fn decode_unverified(token: &str) -> Result<UnverifiedHeader> {
    let invalid = || Error::InvalidToken("invalid jwt token".into());

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let header = URL_SAFE_NO_PAD.decode(header).map_err(|_| invalid())?;
    let header: UnverifiedHeader = serde_json::from_slice(&header).map_err(|_| invalid())?;

    let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&payload)
        .map_err(|_| invalid())?;

    Ok(header)
}

fn verification_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        ErrorKind::ExpiredSignature => Error::TokenExpired,
        ErrorKind::InvalidAudience => Error::Verification("jwt audience invalid".into()),
        ErrorKind::InvalidIssuer => Error::Verification("jwt issuer invalid".into()),
        ErrorKind::InvalidSignature => Error::Verification("invalid signature".into()),
        ErrorKind::MissingRequiredClaim(claim) => {
            Error::Verification(format!("missing required claim: {claim}"))
        }
        _ => Error::Verification(err.to_string()),
    }
}
