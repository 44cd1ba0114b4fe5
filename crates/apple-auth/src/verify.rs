//! Verify callbacks
//!
//! Applications decide what a verified Apple identity means for them (look
//! up or create a user, reject banned accounts, ...). A callback declares up
//! front which arguments it wants; the shape is resolved once when the
//! strategy is built and unsupported shapes never reach a request.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exchange::TokenResponse;
use crate::keys::BoxFuture;
use crate::profile::Profile;
use crate::request::AuthRequest;

/// Arguments a verify callback receives, named after the positional
/// arities of the generic OAuth2 flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyShape {
    /// `(access_token, refresh_token, profile)`
    Tokens,
    /// `(access_token, refresh_token, params, profile)`
    TokensParams,
    /// `(request, access_token, refresh_token, profile)`
    RequestTokens,
    /// `(request, access_token, refresh_token, params, profile)`
    Full,
}

impl VerifyShape {
    /// Resolve a positional arity (arguments plus the completion callback).
    ///
    /// Arity 5 is ambiguous and `pass_req_to_callback` picks the
    /// request-first form.
    pub fn from_arity(arity: usize, pass_req_to_callback: bool) -> Result<Self> {
        match arity {
            4 => Ok(Self::Tokens),
            5 if pass_req_to_callback => Ok(Self::RequestTokens),
            5 => Ok(Self::TokensParams),
            6 => Ok(Self::Full),
            _ => Err(Error::Config(
                "verify callback must take between 4 and 6 arguments".into(),
            )),
        }
    }

    fn wants_request(self) -> bool {
        matches!(self, Self::RequestTokens | Self::Full)
    }

    fn wants_params(self) -> bool {
        matches!(self, Self::TokensParams | Self::Full)
    }
}

/// Arguments passed to a verify callback. Fields outside the callback's
/// shape are `None`.
#[derive(Debug, Clone)]
pub struct VerifyArgs {
    pub request: Option<AuthRequest>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub params: Option<TokenResponse>,
    pub profile: Profile,
}

/// Result of a verify callback. `Err` is reserved for system faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome<U> {
    Accept(U),
    Reject { message: String },
}

impl<U> VerifyOutcome<U> {
    pub fn reject(message: impl Into<String>) -> Self {
        Self::Reject {
            message: message.into(),
        }
    }
}

type Handler<U> = Arc<dyn Fn(VerifyArgs) -> BoxFuture<'static, Result<VerifyOutcome<U>>> + Send + Sync>;

/// How a callback declared what it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    /// Positional arity; arity 5 is settled by the strategy configuration
    Arity(usize),
    Shape(VerifyShape),
}

pub struct Verify<U> {
    declared: Declared,
    handler: Handler<U>,
}

impl<U: Send + 'static> Verify<U> {
    /// Callback declared by positional arity, as the generic OAuth2 flow
    /// counts it. Arities outside 4..=6 are rejected here; whether an
    /// arity-5 callback receives the request is decided by
    /// `StrategyConfig::pass_req_to_callback`.
    pub fn new<F, Fut>(arity: usize, handler: F) -> Result<Self>
    where
        F: Fn(VerifyArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<VerifyOutcome<U>>> + Send + 'static,
    {
        VerifyShape::from_arity(arity, false)?;
        Ok(Self {
            declared: Declared::Arity(arity),
            handler: boxed(handler),
        })
    }

    pub fn with_shape<F, Fut>(shape: VerifyShape, handler: F) -> Self
    where
        F: Fn(VerifyArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<VerifyOutcome<U>>> + Send + 'static,
    {
        Self {
            declared: Declared::Shape(shape),
            handler: boxed(handler),
        }
    }

    /// Shape this callback is invoked with under the given
    /// `pass_req_to_callback` setting.
    pub fn resolve(&self, pass_req_to_callback: bool) -> Result<VerifyShape> {
        match self.declared {
            Declared::Arity(arity) => VerifyShape::from_arity(arity, pass_req_to_callback),
            Declared::Shape(shape) => Ok(shape),
        }
    }

    pub(crate) async fn call(
        &self,
        shape: VerifyShape,
        request: &AuthRequest,
        tokens: &TokenResponse,
        profile: Profile,
    ) -> Result<VerifyOutcome<U>> {
        let args = VerifyArgs {
            request: shape.wants_request().then(|| request.clone()),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            params: shape.wants_params().then(|| tokens.clone()),
            profile,
        };
        (self.handler)(args).await
    }
}

fn boxed<U, F, Fut>(handler: F) -> Handler<U>
where
    U: Send + 'static,
    F: Fn(VerifyArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<VerifyOutcome<U>>> + Send + 'static,
{
    Arc::new(move |args| -> BoxFuture<'static, Result<VerifyOutcome<U>>> {
        Box::pin(handler(args))
    })
}

impl Verify<Profile> {
    /// Accept every verified identity and use the profile as the user.
    pub fn profile() -> Self {
        Self::with_shape(VerifyShape::Full, |args: VerifyArgs| async move {
            Ok(VerifyOutcome::Accept(args.profile))
        })
    }
}

impl<U> Clone for Verify<U> {
    fn clone(&self) -> Self {
        Self {
            declared: self.declared,
            handler: self.handler.clone(),
        }
    }
}

impl<U> fmt::Debug for Verify<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verify").field("declared", &self.declared).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_token::IdentityClaims;
    use crate::request::params;

    fn profile() -> Profile {
        let claims = IdentityClaims {
            sub: "u1".into(),
            email: Some("a@b.com".into()),
            iss: "https://appleid.apple.com".into(),
            aud: "com.example.web".into(),
            iat: 0,
            exp: 0,
            email_verified: None,
            is_private_email: None,
            nonce: None,
            extra: Default::default(),
        };
        Profile::from_claims(&AuthRequest::post(params([("code", "abc")])), &claims)
    }

    fn tokens() -> TokenResponse {
        TokenResponse {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            id_token: Some("x.y.z".into()),
            ..Default::default()
        }
    }

    /// Verify callback that reports which arguments it was given.
    fn reporting(shape: VerifyShape) -> Verify<(bool, bool, String)> {
        Verify::with_shape(shape, |args: VerifyArgs| async move {
            Ok(VerifyOutcome::Accept((
                args.request.is_some(),
                args.params.is_some(),
                args.access_token,
            )))
        })
    }

    async fn received(shape: VerifyShape) -> (bool, bool, String) {
        let req = AuthRequest::post(params([("code", "abc")]));
        match reporting(shape).call(shape, &req, &tokens(), profile()).await.unwrap() {
            VerifyOutcome::Accept(seen) => seen,
            VerifyOutcome::Reject { message } => panic!("unexpected reject: {message}"),
        }
    }

    #[test]
    fn arity_maps_to_shape() {
        assert_eq!(VerifyShape::from_arity(4, false).unwrap(), VerifyShape::Tokens);
        assert_eq!(VerifyShape::from_arity(4, true).unwrap(), VerifyShape::Tokens);
        assert_eq!(VerifyShape::from_arity(5, false).unwrap(), VerifyShape::TokensParams);
        assert_eq!(VerifyShape::from_arity(5, true).unwrap(), VerifyShape::RequestTokens);
        assert_eq!(VerifyShape::from_arity(6, false).unwrap(), VerifyShape::Full);
    }

    #[test]
    fn unsupported_arity_is_config_error() {
        for arity in [0, 3, 7] {
            let err = Verify::<()>::new(arity, |_| async { Ok(VerifyOutcome::Accept(())) })
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert_eq!(
                err.to_string(),
                "invalid configuration: verify callback must take between 4 and 6 arguments"
            );
        }
    }

    #[test]
    fn arity_five_follows_pass_req_setting() {
        let verify = Verify::<()>::new(5, |_| async { Ok(VerifyOutcome::Accept(())) }).unwrap();
        assert_eq!(verify.resolve(false).unwrap(), VerifyShape::TokensParams);
        assert_eq!(verify.resolve(true).unwrap(), VerifyShape::RequestTokens);

        let explicit = Verify::<()>::with_shape(VerifyShape::Tokens, |_| async {
            Ok(VerifyOutcome::Accept(()))
        });
        assert_eq!(explicit.resolve(true).unwrap(), VerifyShape::Tokens);
    }

    #[tokio::test]
    async fn arguments_follow_shape() {
        assert_eq!(received(VerifyShape::Tokens).await, (false, false, "at".into()));
        assert_eq!(received(VerifyShape::TokensParams).await, (false, true, "at".into()));
        assert_eq!(received(VerifyShape::RequestTokens).await, (true, false, "at".into()));
        assert_eq!(received(VerifyShape::Full).await, (true, true, "at".into()));
    }

    #[tokio::test]
    async fn default_verify_returns_profile() {
        let req = AuthRequest::post(params([("code", "abc")]));
        let outcome = Verify::profile()
            .call(VerifyShape::Full, &req, &tokens(), profile())
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Accept(profile()));
    }

    #[tokio::test]
    async fn callback_can_reject() {
        let verify = Verify::<()>::with_shape(VerifyShape::Tokens, |_| async {
            Ok(VerifyOutcome::reject("account disabled"))
        });
        let req = AuthRequest::post(params([("code", "abc")]));
        let outcome = verify
            .call(VerifyShape::Tokens, &req, &tokens(), profile())
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::reject("account disabled"));
    }
}
