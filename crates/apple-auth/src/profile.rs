//! Identity record
//!
//! Built from the verified identity token plus, on the very first sign-in
//! only, the `user` JSON field Apple posts alongside the code. Later
//! sign-ins carry no name, so name fields are empty rather than missing.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::PROVIDER;
use crate::identity_token::IdentityClaims;
use crate::request::AuthRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub provider: String,
    #[serde(rename = "provider_id")]
    pub provider_id: String,
    pub id: String,
    pub email: Option<String>,
    pub emails: Vec<ProfileEmail>,
    pub display_name: String,
    pub name: ProfileName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEmail {
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileName {
    pub family_name: String,
    pub given_name: String,
    pub middle_name: String,
}

/// The `user` field of a first-time authorization.
#[derive(Debug, Default, Deserialize)]
struct FirstLoginUser {
    #[serde(default)]
    name: Option<FirstLoginName>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirstLoginName {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl Profile {
    pub fn from_claims(request: &AuthRequest, claims: &IdentityClaims) -> Self {
        let name = request
            .body_field("user")
            .and_then(parse_user)
            .and_then(|user| user.name)
            .unwrap_or_default();

        let given_name = name.first_name.unwrap_or_default();
        let family_name = name.last_name.unwrap_or_default();
        let display_name = [given_name.as_str(), family_name.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            provider: PROVIDER.to_owned(),
            provider_id: claims.sub.clone(),
            id: claims.sub.clone(),
            email: claims.email.clone(),
            emails: vec![ProfileEmail {
                value: claims.email.clone(),
            }],
            display_name,
            name: ProfileName {
                family_name,
                given_name,
                middle_name: String::new(),
            },
        }
    }
}

fn parse_user(raw: &str) -> Option<FirstLoginUser> {
    match serde_json::from_str(raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "ignoring malformed user field");
            None
        }
    }
}
