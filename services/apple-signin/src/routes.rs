//! Sign in with Apple HTTP handlers
//!
//! Translates axum requests into `AuthRequest`s, runs the matching
//! strategy, and maps its outcome onto a response:
//!
//! | outcome | status |
//! |---|---|
//! | `Success` | 200 `{"user": profile}` |
//! | `Fail` | 401, or 400 for a malformed token submission |
//! | `Redirect` | 302 to Apple |
//! | `Err` | 502 when Apple or its key endpoint misbehaved, else 500 |

use std::sync::Arc;
use std::time::Instant;

use apple_auth::{AuthOutcome, AuthRequest, AuthorizeOptions, Params, Profile, Strategy};
use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Query, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::metrics;

/// Strategies shared by the auth handlers
#[derive(Clone)]
pub struct AuthState {
    pub redirect: Arc<Strategy<Profile>>,
    pub token: Arc<Strategy<Profile>>,
}

/// Query of the login entry point
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Space or comma separated scopes overriding the configured ones
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl LoginQuery {
    fn into_options(self) -> AuthorizeOptions {
        AuthorizeOptions {
            scope: self
                .scope
                .map(|raw| {
                    raw.split([' ', ','])
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            state: self.state,
        }
    }
}

/// `GET /auth/apple`: redirect the browser to Apple.
pub async fn login(State(state): State<AuthState>, Query(query): Query<LoginQuery>) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();
    let flow = state.redirect.name();

    match state.redirect.authorization_url(&query.into_options()) {
        Ok(url) => {
            metrics::record_attempt(flow, "redirect", started.elapsed().as_secs_f64());
            found(&url)
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "failed to build authorization URL");
            metrics::record_attempt(flow, "error", started.elapsed().as_secs_f64());
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to build authorization URL",
                &request_id,
            )
        }
    }
}

/// `GET|POST /auth/apple/callback`: Apple's redirect back, as a query
/// string or a `form_post` body.
pub async fn callback(
    State(state): State<AuthState>,
    method: Method,
    Query(query): Query<Params>,
    form: Result<Form<Params>, FormRejection>,
) -> Response {
    let request = auth_request(method, query, form);
    run(&state.redirect, &request).await
}

/// `POST /auth/apple/token`: native apps submitting their authorization code.
pub async fn token(
    State(state): State<AuthState>,
    method: Method,
    Query(query): Query<Params>,
    form: Result<Form<Params>, FormRejection>,
) -> Response {
    let request = auth_request(method, query, form);
    run(&state.token, &request).await
}

/// Only POST bodies count as a body; axum's `Form` reads GET query strings too.
fn auth_request(
    method: Method,
    query: Params,
    form: Result<Form<Params>, FormRejection>,
) -> AuthRequest {
    let body = match (&method, form) {
        (&Method::POST, Ok(Form(body))) => Some(body),
        (&Method::POST, Err(rejection)) => {
            warn!(error = %rejection, "ignoring unreadable form body");
            None
        }
        _ => None,
    };
    AuthRequest {
        method,
        query,
        body,
    }
}

async fn run(strategy: &Strategy<Profile>, request: &AuthRequest) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();
    let flow = strategy.name();

    let (outcome, response) = match strategy
        .authenticate(request, &AuthorizeOptions::default())
        .await
    {
        Ok(AuthOutcome::Success(profile)) => {
            info!(request_id = %request_id, flow, user_id = %profile.id, "sign in succeeded");
            (
                "success",
                (StatusCode::OK, Json(serde_json::json!({ "user": profile }))).into_response(),
            )
        }
        Ok(AuthOutcome::Fail {
            message,
            bad_request,
        }) => {
            info!(request_id = %request_id, flow, reason = %message, "sign in failed");
            if bad_request {
                (
                    "bad_request",
                    error_response(StatusCode::BAD_REQUEST, "invalid_request", &message, &request_id),
                )
            } else {
                (
                    "fail",
                    error_response(
                        StatusCode::UNAUTHORIZED,
                        "authentication_failed",
                        &message,
                        &request_id,
                    ),
                )
            }
        }
        Ok(AuthOutcome::Redirect(url)) => ("redirect", found(&url)),
        Err(e) => {
            error!(request_id = %request_id, flow, error = %e, "sign in error");
            let (status, kind) = classify(&e);
            ("error", error_response(status, kind, &e.to_string(), &request_id))
        }
    };

    metrics::record_attempt(flow, outcome, started.elapsed().as_secs_f64());
    response
}

/// Collaborator failures are upstream errors; everything else is ours.
fn classify(err: &apple_auth::Error) -> (StatusCode, &'static str) {
    use apple_auth::Error;
    match err {
        Error::Http(_) | Error::TokenExchange(_) | Error::KeyStore(_) | Error::Authorization { .. } => {
            (StatusCode::BAD_GATEWAY, "upstream_error")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
