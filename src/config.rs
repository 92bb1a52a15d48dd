//! Environment configuration.
//!
//! Values come from the process environment, usually populated from `.env`
//! by `dotenvy` in the binary.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::backoff::RetryPolicy;
use crate::fetch::auth::{ApiKey, UrlParam};
use crate::fetch::{BasicClient, HttpClient};
use crate::subscription::SubscriptionOptions;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How requests to the store are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAuth {
    None,
    /// Database secret or ID token, sent as `?auth=`.
    Token(String),
    /// OAuth access token, sent as a bearer header.
    AccessToken(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub auth: StoreAuth,
    pub root: String,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = RetryPolicy::default();

        let auth = match (var("FIREBASE_AUTH_TOKEN"), var("FIREBASE_ACCESS_TOKEN")) {
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "Set only one of FIREBASE_AUTH_TOKEN and FIREBASE_ACCESS_TOKEN"
                ));
            }
            (Some(token), None) => StoreAuth::Token(token),
            (None, Some(token)) => StoreAuth::AccessToken(token),
            (None, None) => StoreAuth::None,
        };

        Ok(Self {
            database_url: var("FIREBASE_DATABASE_URL"),
            auth,
            root: var("TRIP_FEED_ROOT").unwrap_or_else(|| SubscriptionOptions::default().root),
            retry: RetryPolicy {
                max_attempts: parse_or(&var, "TRIP_FEED_MAX_ATTEMPTS", defaults.max_attempts)?,
                base_backoff_ms: parse_or(&var, "TRIP_FEED_BACKOFF_MS", defaults.base_backoff_ms)?,
                max_backoff_ms: parse_or(
                    &var,
                    "TRIP_FEED_MAX_BACKOFF_MS",
                    defaults.max_backoff_ms,
                )?,
            },
            idle_timeout: Duration::from_secs(parse_or(&var, "TRIP_FEED_IDLE_TIMEOUT_SECS", 90)?),
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("FIREBASE_DATABASE_URL must be set")
    }

    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            root: self.root.clone(),
            retry: self.retry.clone(),
        }
    }

    /// HTTP client with the configured credentials applied.
    pub fn http_client(&self) -> Result<Box<dyn HttpClient>> {
        let basic = BasicClient::with_connect_timeout(CONNECT_TIMEOUT)?;
        let client: Box<dyn HttpClient> = match &self.auth {
            StoreAuth::None => Box::new(basic),
            StoreAuth::Token(token) => Box::new(UrlParam::auth(basic, token.clone())),
            StoreAuth::AccessToken(token) => Box::new(ApiKey::bearer(basic, token)?),
        };
        Ok(client)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
