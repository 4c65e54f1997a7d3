//! Process configuration
//!
//! The engine needs only two values from the environment: the bot access
//! token, which is mandatory, and an optional session secret. Everything
//! else is a compile-time constant or an engine [`Settings`] override.

use std::{fmt::Debug, time::Duration};

use thiserror::Error;

use crate::constants;

/// Environment variable holding the bot access token
pub const TOKEN_VAR: &str = "TELEGRAM_TOKEN";
/// Environment variable holding the optional session secret
pub const SESSION_SECRET_VAR: &str = "SESSION_SECRET";

/// Errors raised while reading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required environment variable is absent or empty
    #[error("environment variable {0} is required")]
    Missing(&'static str),
}

/// Credentials read from the process environment
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    token: String,
    session_secret: Option<String>,
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session_secret = self.session_secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("session_secret", &session_secret)
            .finish()
    }
}

impl Config {
    /// Reads the configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] if the token is not set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary lookup function
    ///
    /// Empty values are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] if the token is not available.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, Error> {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let token = present(TOKEN_VAR).ok_or(Error::Missing(TOKEN_VAR))?;
        let session_secret = present(SESSION_SECRET_VAR);

        Ok(Self {
            token,
            session_secret,
        })
    }

    /// The bot access token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The session secret, if one was configured
    pub fn session_secret(&self) -> Option<&str> {
        self.session_secret.as_deref()
    }
}

/// Engine tunables
///
/// Defaults come from [`constants`]; embedders and tests may shorten or
/// lengthen any of the intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Minimum time between two unforced saves
    pub save_interval: Duration,
    /// How long a computed leaderboard is served from cache
    pub leaderboard_cache: Duration,
    /// How long an open poll accepts answers
    pub poll_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            save_interval: constants::persistence::SAVE_INTERVAL,
            leaderboard_cache: constants::leaderboard::CACHE_WINDOW,
            poll_ttl: constants::poll::TTL,
        }
    }
}
