//! Client secret generation
//!
//! Apple does not issue static client secrets. Every token request carries a
//! JWT signed with the developer's `.p8` key (ES256), identifying the team
//! (`iss`) and the Services ID (`sub`). A fresh secret is minted for each
//! exchange and dropped (zeroized) right after it.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StrategyConfig;
use crate::constants::{BASE_DOMAIN, KEY_SIGN_ALGORITHM, MAX_TOKEN_DURATION};
use crate::error::{Error, Result};

/// Claims of a client secret JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecretClaims {
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
    pub iss: String,
    pub sub: String,
}

impl ClientSecretClaims {
    fn new(team_id: &str, client_id: &str, issued_at: u64) -> Self {
        Self {
            aud: BASE_DOMAIN.to_owned(),
            exp: issued_at + MAX_TOKEN_DURATION,
            iat: issued_at,
            iss: team_id.to_owned(),
            sub: client_id.to_owned(),
        }
    }
}

/// Mints ES256 client secrets from the configured signing key.
pub struct ClientSecretGenerator {
    client_id: String,
    team_id: String,
    header: Header,
    key: EncodingKey,
}

impl ClientSecretGenerator {
    /// Parse the `.p8` key once. An unreadable key is a configuration error.
    pub fn new(config: &StrategyConfig) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(config.private_key.expose().as_bytes())
            .map_err(|e| Error::Config(format!("private_key is not a valid EC PEM key: {e}")))?;

        let mut header = Header::new(KEY_SIGN_ALGORITHM);
        header.kid = Some(config.key_id.clone());

        Ok(Self {
            client_id: config.client_id.clone(),
            team_id: config.team_id.clone(),
            header,
            key,
        })
    }

    /// Mint a client secret issued now.
    pub fn generate(&self) -> Result<Secret<String>> {
        self.generate_at(unix_now())
    }

    /// Mint a client secret issued at `issued_at` (unix seconds).
    pub fn generate_at(&self, issued_at: u64) -> Result<Secret<String>> {
        let claims = ClientSecretClaims::new(&self.team_id, &self.client_id, issued_at);
        let token = jsonwebtoken::encode(&self.header, &claims, &self.key)
            .map_err(|e| Error::ClientSecret(e.to_string()))?;
        debug!(
            kid = self.header.kid.as_deref().unwrap_or_default(),
            iat = claims.iat,
            exp = claims.exp,
            "minted client secret"
        );
        Ok(Secret::new(token))
    }
}

impl fmt::Debug for ClientSecretGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretGenerator")
            .field("client_id", &self.client_id)
            .field("team_id", &self.team_id)
            .field("kid", &self.header.kid)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
