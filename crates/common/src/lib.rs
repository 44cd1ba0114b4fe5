//! Types shared by the Sign in with Apple crates
//!
//! `Secret` keeps private keys and minted client secrets out of logs,
//! `load_toml` is the one place configuration files are read and parsed.

mod config;
mod error;
mod secret;

pub use config::{load_toml, read_trimmed};
pub use error::{Error, Result};
pub use secret::Secret;
