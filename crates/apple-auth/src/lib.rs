//! Sign in with Apple authentication library
//!
//! Server side of Sign in with Apple: client secret minting, identity token
//! validation against Apple's rotating keys, and the authentication flow
//! that ties them to an OAuth2 code exchange. This crate has no dependency
//! on the HTTP service and can be embedded in any server.
//!
//! Sign-in flow:
//! 1. `Strategy::authenticate()` without a code returns a redirect to Apple
//! 2. Apple posts `code` (and on first login `user`) to the callback URL
//! 3. `client_secret::ClientSecretGenerator` mints an ES256 client secret
//! 4. `exchange::TokenExchange` trades code + secret for an `id_token`
//! 5. `identity_token::IdentityTokenValidator` verifies it via a `keys::KeyStore`
//! 6. `profile::Profile` is built and handed to the `verify::Verify` callback

pub mod client_secret;
pub mod config;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod identity_token;
pub mod keys;
pub mod profile;
pub mod request;
pub mod strategy;
pub mod verify;

pub use client_secret::{ClientSecretClaims, ClientSecretGenerator};
pub use config::StrategyConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use exchange::{HttpTokenExchange, TokenExchange, TokenResponse};
pub use identity_token::{IdentityClaims, IdentityTokenValidator};
pub use keys::{BoxFuture, JwksKeyStore, KeyStore, StaticKeyStore};
pub use profile::{Profile, ProfileEmail, ProfileName};
pub use request::{AuthRequest, Params};
pub use strategy::{AuthOutcome, AuthorizeOptions, FlowKind, Strategy};
pub use verify::{Verify, VerifyArgs, VerifyOutcome, VerifyShape};
