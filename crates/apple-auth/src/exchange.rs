//! Authorization code exchange
//!
//! POSTs the authorization code to Apple's token endpoint. The client secret
//! is an argument of every call rather than state on the client, so one
//! `HttpTokenExchange` can serve any number of concurrent exchanges.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::StrategyConfig;
use crate::error::{Error, Result};
use crate::keys::BoxFuture;

/// Response from the token endpoint.
///
/// Apple's identity token arrives as `id_token`; the remaining fields are
/// the generic OAuth2 "params" handed to verify callbacks that ask for them.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Exchanges an authorization code for tokens.
pub trait TokenExchange: Send + Sync {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        client_secret: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenResponse>>;
}

/// `TokenExchange` against a real token endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    http: reqwest::Client,
    client_id: String,
    token_url: String,
    redirect_uri: String,
}

impl HttpTokenExchange {
    pub fn new(http: reqwest::Client, config: &StrategyConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            token_url: config.token_endpoint().to_owned(),
            redirect_uri: config.callback_url.clone(),
        }
    }

    #[instrument(skip_all, fields(token_url = %self.token_url))]
    async fn post_code(&self, code: &str, client_secret: &Secret<String>) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret.expose().as_str()),
        ];
        if !self.redirect_uri.is_empty() {
            form.push(("redirect_uri", self.redirect_uri.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;

        debug!(
            has_id_token = tokens.id_token.is_some(),
            has_refresh_token = tokens.refresh_token.is_some(),
            "authorization code exchanged"
        );
        Ok(tokens)
    }
}

impl TokenExchange for HttpTokenExchange {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        client_secret: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(self.post_code(code, client_secret))
    }
}
