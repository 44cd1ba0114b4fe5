//! Sign in with Apple protocol constants
//!
//! Endpoints, pinned algorithms and limits published by Apple. None of these
//! are secrets; the private key and the client secrets minted from it are
//! handled through `common::Secret`.

use jsonwebtoken::Algorithm;

/// Issuer domain. Audience of client secrets and issuer of identity tokens.
pub const BASE_DOMAIN: &str = "https://appleid.apple.com";

/// Authorization endpoint the user agent is redirected to
pub const AUTHORIZATION_URL: &str = "https://appleid.apple.com/auth/authorize";

/// Token endpoint for the authorization code exchange
pub const TOKEN_URL: &str = "https://appleid.apple.com/auth/token";

/// JWKS endpoint serving Apple's rotating identity token keys
pub const PUBLIC_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Client secrets are signed with ECDSA P-256 + SHA-256. Apple accepts
/// nothing else for the `.p8` keys it issues.
pub const KEY_SIGN_ALGORITHM: Algorithm = Algorithm::ES256;

/// Identity tokens are signed with RS256. Pinned separately from
/// `KEY_SIGN_ALGORITHM` so a token can never select its own algorithm.
pub const KEY_VERIFY_ALGORITHM: Algorithm = Algorithm::RS256;

/// Six months in seconds, the largest client secret lifetime Apple accepts.
/// Also the maximum accepted identity token age.
pub const MAX_TOKEN_DURATION: u64 = 15_777_000;

/// `error` value sent when the user presses "Cancel" in the web flow
pub const USER_CANCELLED_ERROR: &str = "user_cancelled_authorize";

/// Provider tag carried by every profile
pub const PROVIDER: &str = "apple";

/// `response_mode` required whenever a scope is requested
pub const RESPONSE_MODE_FORM_POST: &str = "form_post";

/// `response_mode` used when only the identity token is requested
pub const RESPONSE_MODE_QUERY: &str = "query";
