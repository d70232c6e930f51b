use dotenvy::dotenv;
use std::env;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use eyre::{Result, WrapErr, eyre};
use nonzero_ext::nonzero;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_TOKEN_STORE_PATH: &str = ".strategy_client/session.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: Url,
    pub request_timeout: Duration,
    pub requests_per_second: NonZeroU32,
    pub token_store_path: PathBuf,
    pub execution_poll_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let base_url = env::var("STRATEGY_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = parse_base_url(&base_url)?;

        let request_timeout = Duration::from_secs(
            parse_env("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        );
        let execution_poll_interval = Duration::from_secs(
            parse_env("EXECUTION_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
        );

        let requests_per_second = match env::var("REQUESTS_PER_SECOND") {
            Ok(raw) => raw
                .parse::<NonZeroU32>()
                .wrap_err_with(|| format!("Invalid REQUESTS_PER_SECOND value: {raw}"))?,
            Err(_) => nonzero!(10u32),
        };

        let token_store_path = env::var("TOKEN_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_STORE_PATH));

        Ok(Config {
            api_base_url,
            request_timeout,
            requests_per_second,
            token_store_path,
            execution_poll_interval,
        })
    }

    /// Defaults for everything except the backend location.
    pub fn for_base_url(base_url: &str) -> Result<Self> {
        Ok(Config {
            api_base_url: parse_base_url(base_url)?,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            requests_per_second: nonzero!(10u32),
            token_store_path: PathBuf::from(DEFAULT_TOKEN_STORE_PATH),
            execution_poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_requests_per_second(mut self, rps: NonZeroU32) -> Self {
        self.requests_per_second = rps;
        self
    }
}

// Relative endpoint paths are joined onto the base, so it must end with '/'
fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized).wrap_err_with(|| format!("Invalid API base URL: {raw}"))?;
    if url.cannot_be_a_base() {
        return Err(eyre!("API base URL cannot be used as a base: {raw}"));
    }
    Ok(url)
}

fn parse_env(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .wrap_err_with(|| format!("Invalid {key} value: {raw}")),
        Err(_) => Ok(default),
    }
}
