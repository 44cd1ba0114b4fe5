//! Authentication flow
//!
//! `Strategy` drives one Sign in with Apple authentication attempt:
//!
//! 1. merge the `form_post` body into the query parameters
//! 2. short-circuit on user cancellation or an authorization error
//! 3. without a code, redirect to Apple's authorization endpoint
//! 4. with a code, mint a client secret and exchange the code for tokens
//! 5. validate the `id_token`, build the profile, run the verify callback
//!
//! Rejected credentials come back as `AuthOutcome::Fail`; `Err` is kept for
//! faults in this system or its collaborators.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use tracing::{info, instrument, warn};

use crate::client_secret::ClientSecretGenerator;
use crate::config::StrategyConfig;
use crate::constants::{PROVIDER, RESPONSE_MODE_FORM_POST, RESPONSE_MODE_QUERY, USER_CANCELLED_ERROR};
use crate::error::{Error, Result};
use crate::exchange::TokenExchange;
use crate::identity_token::IdentityTokenValidator;
use crate::keys::KeyStore;
use crate::profile::Profile;
use crate::request::{AuthRequest, Params};
use crate::verify::{Verify, VerifyOutcome, VerifyShape};

/// Which entry point a strategy serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Browser redirect flow, code delivered to the callback URL
    Redirect,
    /// Native apps POSTing the code they obtained themselves
    Token,
}

impl FlowKind {
    pub fn name(self) -> &'static str {
        match self {
            FlowKind::Redirect => PROVIDER,
            FlowKind::Token => "apple-token",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-call authorization options.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Overrides the configured scope when non-empty
    pub scope: Vec<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome<U> {
    /// Identity verified and accepted by the verify callback
    Success(U),
    /// Credentials were presented and rejected, or the user backed out.
    /// `bad_request` marks requests that never carried credentials at all.
    Fail { message: String, bad_request: bool },
    /// Send the user agent here to start authorization
    Redirect(String),
}

impl<U> AuthOutcome<U> {
    fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            bad_request: false,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            bad_request: true,
        }
    }
}

pub struct Strategy<U> {
    config: StrategyConfig,
    kind: FlowKind,
    secrets: ClientSecretGenerator,
    validator: IdentityTokenValidator,
    exchange: Arc<dyn TokenExchange>,
    verify: Verify<U>,
    verify_shape: VerifyShape,
}

impl<U: Send + 'static> Strategy<U> {
    /// Validate the configuration and assemble the flow.
    pub fn new(
        config: StrategyConfig,
        kind: FlowKind,
        exchange: Arc<dyn TokenExchange>,
        keys: Arc<dyn KeyStore>,
        verify: Verify<U>,
    ) -> Result<Self> {
        config.validate()?;
        let verify_shape = verify.resolve(config.pass_req_to_callback)?;
        let secrets = ClientSecretGenerator::new(&config)?;
        let validator = IdentityTokenValidator::new(config.client_id.clone(), keys);

        info!(
            strategy = kind.name(),
            client_id = %config.client_id,
            team_id = %config.team_id,
            verify_shape = ?verify_shape,
            "strategy configured"
        );

        Ok(Self {
            config,
            kind,
            secrets,
            validator,
            exchange,
            verify,
            verify_shape,
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Run one authentication attempt.
    #[instrument(skip_all, fields(strategy = self.kind.name()))]
    pub async fn authenticate(
        &self,
        request: &AuthRequest,
        options: &AuthorizeOptions,
    ) -> Result<AuthOutcome<U>> {
        if self.kind == FlowKind::Token {
            if request.method != Method::POST || request.body.is_none() {
                return Ok(AuthOutcome::bad_request("POST request with body required"));
            }
            if request.body_field("code").is_none_or(str::is_empty) {
                return Ok(AuthOutcome::bad_request("`code` is required"));
            }
        }

        let params = request.merged_params();

        if let Some(error) = params.get("error") {
            return authorization_error(error, params.get("error_description"));
        }

        let Some(code) = params.get("code").filter(|code| !code.is_empty()) else {
            let url = self.authorization_url(options)?;
            return Ok(AuthOutcome::Redirect(url));
        };

        let tokens = {
            let client_secret = self.secrets.generate()?;
            self.exchange.exchange_code(code, &client_secret).await?
        };

        let id_token = tokens.id_token.as_deref().unwrap_or_default();
        let claims = match self.validator.validate(id_token).await {
            Ok(claims) => claims,
            Err(err) if err.is_assertion_rejection() => {
                warn!(error = %err, "identity token rejected");
                return Ok(AuthOutcome::fail(format!(
                    "response identity assertion is invalid: {err}"
                )));
            }
            Err(err) => return Err(err),
        };

        let profile = Profile::from_claims(request, &claims);
        match self.verify.call(self.verify_shape, request, &tokens, profile).await? {
            VerifyOutcome::Accept(user) => {
                info!(sub = %claims.sub, "authentication succeeded");
                Ok(AuthOutcome::Success(user))
            }
            VerifyOutcome::Reject { message } => {
                info!(sub = %claims.sub, reason = %message, "verify callback rejected user");
                Ok(AuthOutcome::fail(message))
            }
        }
    }

    /// Extra authorization parameters. Apple requires `form_post` whenever
    /// a scope is requested.
    pub fn authorization_params(&self, options: &AuthorizeOptions) -> Params {
        let mode = if self.scope(options).is_empty() {
            RESPONSE_MODE_QUERY
        } else {
            RESPONSE_MODE_FORM_POST
        };
        Params::from([("response_mode".to_owned(), mode.to_owned())])
    }

    /// Authorization endpoint URL for starting the flow.
    pub fn authorization_url(&self, options: &AuthorizeOptions) -> Result<String> {
        let mut query: Vec<(String, String)> = vec![
            ("response_type".into(), "code".into()),
            ("client_id".into(), self.config.client_id.clone()),
        ];
        if !self.config.callback_url.is_empty() {
            query.push(("redirect_uri".into(), self.config.callback_url.clone()));
        }
        query.extend(self.authorization_params(options));

        let scope = self.scope(options);
        if !scope.is_empty() {
            query.push(("scope".into(), scope.join(" ")));
        }
        if let Some(state) = &options.state {
            query.push(("state".into(), state.clone()));
        }

        let url = reqwest::Url::parse_with_params(self.config.authorization_endpoint(), &query)
            .map_err(|e| Error::Config(format!("authorization_url is not a valid URL: {e}")))?;
        Ok(url.into())
    }

    fn scope<'a>(&'a self, options: &'a AuthorizeOptions) -> &'a [String] {
        if options.scope.is_empty() {
            &self.config.scope
        } else {
            &options.scope
        }
    }
}

/// `error` parameter on the callback. Only an outright denial is the
/// user's doing; anything else is reported as a fault.
fn authorization_error<U>(error: &str, description: Option<&String>) -> Result<AuthOutcome<U>> {
    match error {
        USER_CANCELLED_ERROR => {
            info!("user cancelled authorization");
            Ok(AuthOutcome::fail("User cancelled authorization"))
        }
        "access_denied" => Ok(AuthOutcome::fail(
            description.map_or(error, String::as_str),
        )),
        _ => Err(Error::Authorization {
            error: error.to_owned(),
            description: description.cloned(),
        }),
    }
}

impl<U> fmt::Debug for Strategy<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("verify_shape", &self.verify_shape)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::TokenResponse;
    use crate::identity_token::tests::{CLIENT_ID, JWKS_JSON, KID, claims_for, sign};
    use crate::keys::{BoxFuture, StaticKeyStore};
    use crate::request::params;
    use crate::verify::VerifyArgs;
    use common::Secret;
    use std::sync::Mutex;

    const EC_PRIVATE_KEY: &str = include_str!("../../../testdata/client_secret_es256.p8");

    /// Token endpoint stand-in that records the client secrets it receives.
    #[derive(Default)]
    struct RecordingExchange {
        id_token: Option<String>,
        secrets: Mutex<Vec<String>>,
    }

    impl RecordingExchange {
        fn returning(id_token: Option<String>) -> Arc<Self> {
            Arc::new(Self {
                id_token,
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.secrets.lock().unwrap().len()
        }
    }

    impl TokenExchange for RecordingExchange {
        fn exchange_code<'a>(
            &'a self,
            code: &'a str,
            client_secret: &'a Secret<String>,
        ) -> BoxFuture<'a, Result<TokenResponse>> {
            Box::pin(async move {
                self.secrets
                    .lock()
                    .unwrap()
                    .push(client_secret.expose().clone());
                tokio::task::yield_now().await;
                Ok(TokenResponse {
                    access_token: format!("at-{code}"),
                    token_type: "Bearer".into(),
                    refresh_token: Some("rt".into()),
                    id_token: self.id_token.clone(),
                    ..Default::default()
                })
            })
        }
    }

    struct UnreachableKeys;

    impl KeyStore for UnreachableKeys {
        fn signing_key<'a>(&'a self, _kid: &'a str) -> BoxFuture<'a, Result<jsonwebtoken::DecodingKey>> {
            Box::pin(async { Err(Error::KeyStore("connection refused".into())) })
        }
    }

    fn config() -> StrategyConfig {
        StrategyConfig::new(CLIENT_ID, "TEAM123456", "KEY1234567", EC_PRIVATE_KEY)
            .with_callback_url("https://example.com/auth/apple/callback")
    }

    fn static_keys() -> Arc<dyn KeyStore> {
        Arc::new(StaticKeyStore::from_json(JWKS_JSON).unwrap())
    }

    fn strategy(kind: FlowKind, exchange: Arc<RecordingExchange>) -> Strategy<Profile> {
        Strategy::new(config(), kind, exchange, static_keys(), Verify::profile()).unwrap()
    }

    fn valid_id_token() -> Option<String> {
        Some(sign(&claims_for("u1", "a@b.com"), Some(KID)))
    }

    fn callback(fields: &[(&str, &str)]) -> AuthRequest {
        AuthRequest::post(params(fields.iter().copied()))
    }

    fn expect_success<U: fmt::Debug>(outcome: AuthOutcome<U>) -> U {
        match outcome {
            AuthOutcome::Success(user) => user,
            other => panic!("expected Success, got {other:?}"),
        }
    }

    fn expect_fail<U: fmt::Debug>(outcome: AuthOutcome<U>) -> String {
        match outcome {
            AuthOutcome::Fail { message, .. } => message,
            other => panic!("expected Fail, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_login_produces_named_profile() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = strategy(FlowKind::Redirect, exchange.clone());
        let req = callback(&[
            ("code", "abc"),
            ("user", r#"{"name":{"firstName":"A","lastName":"B"}}"#),
        ]);

        let outcome = strategy.authenticate(&req, &AuthorizeOptions::default()).await.unwrap();
        let profile = expect_success(outcome);
        assert_eq!(profile.provider, "apple");
        assert_eq!(profile.id, "u1");
        assert_eq!(profile.email.as_deref(), Some("a@b.com"));
        assert_eq!(profile.display_name, "A B");
        assert_eq!(profile.name.given_name, "A");
        assert_eq!(profile.name.family_name, "B");
        assert_eq!(profile.name.middle_name, "");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn returning_user_has_empty_names() {
        let strategy = strategy(FlowKind::Redirect, RecordingExchange::returning(valid_id_token()));
        let outcome = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        let profile = expect_success(outcome);
        assert_eq!(profile.display_name, "");
        assert_eq!(profile.name.given_name, "");
        assert_eq!(profile.name.family_name, "");
    }

    #[tokio::test]
    async fn client_secret_is_minted_per_exchange() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = strategy(FlowKind::Redirect, exchange.clone());
        strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        let secrets = exchange.secrets.lock().unwrap().clone();
        assert_eq!(secrets.len(), 1);
        let header = jsonwebtoken::decode_header(&secrets[0]).unwrap();
        assert_eq!(header.alg, jsonwebtoken::Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("KEY1234567"));
    }

    #[tokio::test]
    async fn cancellation_skips_exchange() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = strategy(FlowKind::Redirect, exchange.clone());

        let outcome = strategy
            .authenticate(&callback(&[("error", "user_cancelled_authorize")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        assert_eq!(expect_fail(outcome), "User cancelled authorization");
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test]
    async fn access_denied_is_a_failure_other_errors_are_faults() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = strategy(FlowKind::Redirect, exchange.clone());
        let opts = AuthorizeOptions::default();

        let denied = strategy
            .authenticate(
                &AuthRequest::get(params([("error", "access_denied"), ("error_description", "nope")])),
                &opts,
            )
            .await
            .unwrap();
        assert_eq!(expect_fail(denied), "nope");

        let err = strategy
            .authenticate(&AuthRequest::get(params([("error", "invalid_request")])), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authorization { ref error, .. } if error == "invalid_request"));
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_attempts_use_distinct_secrets() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = Arc::new(strategy(FlowKind::Redirect, exchange.clone()));
        let opts = AuthorizeOptions::default();
        let (a, b) = (callback(&[("code", "a")]), callback(&[("code", "b")]));

        let (ra, rb) = tokio::join!(strategy.authenticate(&a, &opts), strategy.authenticate(&b, &opts));
        assert!(matches!(ra.unwrap(), AuthOutcome::Success(_)));
        assert!(matches!(rb.unwrap(), AuthOutcome::Success(_)));

        let secrets = exchange.secrets.lock().unwrap().clone();
        assert_eq!(secrets.len(), 2);
        assert_ne!(secrets[0], secrets[1]);
    }

    #[tokio::test]
    async fn missing_code_redirects_to_apple() {
        let strategy = strategy(FlowKind::Redirect, RecordingExchange::returning(None));
        let outcome = strategy
            .authenticate(&AuthRequest::get(Params::new()), &AuthorizeOptions::default())
            .await
            .unwrap();
        let url = match outcome {
            AuthOutcome::Redirect(url) => url,
            other => panic!("expected Redirect, got {other:?}"),
        };
        assert!(url.starts_with("https://appleid.apple.com/auth/authorize?"));

        let url = reqwest::Url::parse(&url).unwrap();
        let query: Params = url.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], CLIENT_ID);
        assert_eq!(query["redirect_uri"], "https://example.com/auth/apple/callback");
        assert_eq!(query["response_mode"], "query");
        assert!(!query.contains_key("scope"));
    }

    #[tokio::test]
    async fn scope_forces_form_post() {
        let strategy = strategy(FlowKind::Redirect, RecordingExchange::returning(None));
        let opts = AuthorizeOptions {
            scope: vec!["name".into(), "email".into()],
            state: Some("xyz".into()),
        };
        assert_eq!(strategy.authorization_params(&opts)["response_mode"], "form_post");

        let url = reqwest::Url::parse(&strategy.authorization_url(&opts).unwrap()).unwrap();
        let query: Params = url.query_pairs().into_owned().collect();
        assert_eq!(query["response_mode"], "form_post");
        assert_eq!(query["scope"], "name email");
        assert_eq!(query["state"], "xyz");
    }

    #[test]
    fn configured_scope_forces_form_post() {
        let strategy = Strategy::new(
            config().with_scope(["email"]),
            FlowKind::Redirect,
            RecordingExchange::returning(None),
            static_keys(),
            Verify::profile(),
        )
        .unwrap();
        let params = strategy.authorization_params(&AuthorizeOptions::default());
        assert_eq!(params["response_mode"], "form_post");
    }

    #[tokio::test]
    async fn invalid_identity_token_is_a_failure() {
        let mut claims = claims_for("u1", "a@b.com");
        claims["aud"] = "com.someone.else".into();
        let strategy = strategy(
            FlowKind::Redirect,
            RecordingExchange::returning(Some(sign(&claims, Some(KID)))),
        );

        let outcome = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        let message = expect_fail(outcome);
        assert!(message.starts_with("response identity assertion is invalid: "), "{message}");
        assert!(message.contains("audience"));
    }

    #[tokio::test]
    async fn missing_identity_token_is_a_failure() {
        let strategy = strategy(FlowKind::Redirect, RecordingExchange::returning(None));
        let outcome = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        assert_eq!(
            expect_fail(outcome),
            "response identity assertion is invalid: invalid jwt token"
        );
    }

    #[tokio::test]
    async fn key_store_outage_is_an_error() {
        let strategy = Strategy::new(
            config(),
            FlowKind::Redirect,
            RecordingExchange::returning(valid_id_token()),
            Arc::new(UnreachableKeys),
            Verify::profile(),
        )
        .unwrap();

        let err = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyStore(_)));
    }

    /// Arity-5 callback reporting whether it was handed the request.
    fn sees_request() -> Verify<bool> {
        Verify::new(5, |args: VerifyArgs| async move {
            Ok(VerifyOutcome::Accept(args.request.is_some()))
        })
        .unwrap()
    }

    async fn request_passed(config: StrategyConfig) -> bool {
        let strategy = Strategy::new(
            config,
            FlowKind::Redirect,
            RecordingExchange::returning(valid_id_token()),
            static_keys(),
            sees_request(),
        )
        .unwrap();
        let outcome = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        expect_success(outcome)
    }

    #[tokio::test]
    async fn pass_req_to_callback_comes_from_config() {
        assert!(request_passed(config().with_pass_req_to_callback(true)).await);
        assert!(!request_passed(config()).await);
    }

    #[tokio::test]
    async fn verify_callback_decides_the_user() {
        let verify = Verify::new(6, |args: VerifyArgs| async move {
            assert!(args.request.is_some());
            assert!(args.params.is_some());
            if args.profile.email.as_deref() == Some("a@b.com") {
                Ok(VerifyOutcome::reject("account disabled"))
            } else {
                Ok(VerifyOutcome::Accept(args.profile.id))
            }
        })
        .unwrap();

        let strategy = Strategy::new(
            config(),
            FlowKind::Redirect,
            RecordingExchange::returning(valid_id_token()),
            static_keys(),
            verify,
        )
        .unwrap();
        let outcome = strategy
            .authenticate(&callback(&[("code", "abc")]), &AuthorizeOptions::default())
            .await
            .unwrap();
        assert_eq!(expect_fail(outcome), "account disabled");
    }

    #[tokio::test]
    async fn token_flow_requires_post_with_code() {
        let exchange = RecordingExchange::returning(valid_id_token());
        let strategy = strategy(FlowKind::Token, exchange.clone());
        let opts = AuthorizeOptions::default();

        let get = AuthRequest::get(params([("code", "abc")]));
        assert_eq!(
            strategy.authenticate(&get, &opts).await.unwrap(),
            AuthOutcome::bad_request("POST request with body required")
        );

        let no_code = callback(&[("user", "{}")]);
        assert_eq!(
            strategy.authenticate(&no_code, &opts).await.unwrap(),
            AuthOutcome::bad_request("`code` is required")
        );

        let empty_code = callback(&[("code", "")]);
        assert_eq!(
            strategy.authenticate(&empty_code, &opts).await.unwrap(),
            AuthOutcome::bad_request("`code` is required")
        );

        let ok = strategy.authenticate(&callback(&[("code", "abc")]), &opts).await.unwrap();
        assert!(matches!(ok, AuthOutcome::Success(_)));
        assert_eq!(exchange.calls(), 1);
    }

    #[test]
    fn names_follow_flow_kind() {
        let exchange = RecordingExchange::returning(None);
        assert_eq!(strategy(FlowKind::Redirect, exchange.clone()).name(), "apple");
        assert_eq!(strategy(FlowKind::Token, exchange).name(), "apple-token");
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let missing_team = StrategyConfig { team_id: String::new(), ..config() };
        let err = Strategy::new(
            missing_team,
            FlowKind::Redirect,
            RecordingExchange::returning(None),
            static_keys(),
            Verify::profile(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: team_id is required");

        let bad_key = StrategyConfig::new(CLIENT_ID, "TEAM", "KEY", "not a key");
        let err = Strategy::new(
            bad_key,
            FlowKind::Redirect,
            RecordingExchange::returning(None),
            static_keys(),
            Verify::profile(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
