//! Inbound authentication request
//!
//! A framework-neutral view of the callback request: just enough for the
//! strategy to read the query string and, for `form_post` redirects, the
//! urlencoded body.

use std::collections::BTreeMap;

use reqwest::Method;

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub method: Method,
    pub query: Params,
    /// Parsed form body; `None` when the request carried no body
    pub body: Option<Params>,
}

impl AuthRequest {
    pub fn get(query: Params) -> Self {
        Self {
            method: Method::GET,
            query,
            body: None,
        }
    }

    pub fn post(body: Params) -> Self {
        Self {
            method: Method::POST,
            query: Params::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    /// Body fields overlaid with query fields. The query wins on conflict.
    pub fn merged_params(&self) -> Params {
        let mut merged = self.body.clone().unwrap_or_default();
        merged.extend(self.query.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn body_field(&self, name: &str) -> Option<&str> {
        self.body.as_ref()?.get(name).map(String::as_str)
    }
}

/// Build a `Params` map from literal pairs.
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
