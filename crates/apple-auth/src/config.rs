//! Strategy configuration
//!
//! `StrategyConfig` deserializes straight from the service TOML. The private
//! key is a `Secret` and is usually injected from the environment or a key
//! file rather than written into the TOML.

use common::Secret;
use serde::{Deserialize, Deserializer};

use crate::constants::{AUTHORIZATION_URL, TOKEN_URL};
use crate::error::{Error, Result};

/// Immutable input to the strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Services ID (web) or bundle ID (native) registered with Apple
    pub client_id: String,
    /// Key ID of the `.p8` signing key
    pub key_id: String,
    /// PKCS#8 PEM contents of the `.p8` signing key
    #[serde(default = "empty_secret")]
    pub private_key: Secret<String>,
    /// Apple developer team ID, issuer of client secrets
    pub team_id: String,
    /// Redirect URI registered for the Services ID
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    /// Requested scopes (`name`, `email`). Accepts a string or a list.
    #[serde(default, deserialize_with = "scope_list")]
    pub scope: Vec<String>,
    /// Hands the request to 5-argument verify callbacks (request-first
    /// shape) instead of the raw token response
    #[serde(default)]
    pub pass_req_to_callback: bool,
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

/// Scopes as one space/comma separated string or a list of strings.
fn scope_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scope {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Scope::deserialize(deserializer)? {
        Scope::One(s) => split_scope(&s),
        Scope::Many(list) => list
            .into_iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

pub(crate) fn split_scope(raw: &str) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl StrategyConfig {
    /// Build a configuration from the four mandatory values.
    pub fn new(
        client_id: impl Into<String>,
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        private_key: impl Into<Secret<String>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            key_id: key_id.into(),
            private_key: private_key.into(),
            team_id: team_id.into(),
            callback_url: String::new(),
            authorization_url: None,
            token_url: None,
            scope: Vec::new(),
            pass_req_to_callback: false,
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = url.into();
        self
    }

    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = Some(url.into());
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    pub fn with_pass_req_to_callback(mut self, pass: bool) -> Self {
        self.pass_req_to_callback = pass;
        self
    }

    /// Reject configurations missing any mandatory value.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("client_id", self.client_id.trim().is_empty()),
            ("key_id", self.key_id.trim().is_empty()),
            ("private_key", self.private_key.is_blank()),
            ("team_id", self.team_id.trim().is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(Error::Config(format!("{name} is required")));
        }

        for (name, url) in [
            ("authorization_url", self.authorization_url.as_deref()),
            ("token_url", self.token_url.as_deref()),
        ] {
            if let Some(url) = url.filter(|u| reqwest::Url::parse(u).is_err()) {
                return Err(Error::Config(format!("{name} is not a valid URL: {url}")));
            }
        }
        Ok(())
    }

    /// Authorization endpoint, honouring the override.
    pub fn authorization_endpoint(&self) -> &str {
        self.authorization_url.as_deref().unwrap_or(AUTHORIZATION_URL)
    }

    /// Token endpoint, honouring the override.
    pub fn token_endpoint(&self) -> &str {
        self.token_url.as_deref().unwrap_or(TOKEN_URL)
    }
}
