use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote job API, without trailing slash.
    pub api_url: String,
    /// Delay between the end of one status poll and the start of the next.
    pub poll_interval: Duration,
    /// Delay before re-fetching a result that answered `202`.
    pub result_retry: Duration,
    /// Wall-clock ceiling for one job, from submission to outcome.
    pub job_timeout: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_poll_errors: u32,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_string(),
            poll_interval: Duration::from_millis(1000),
            result_retry: Duration::from_millis(500),
            job_timeout: Duration::from_secs(900),
            max_poll_errors: 10,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Upper bound for every configured interval and timeout.
pub const MAX_SPAN: Duration = Duration::from_secs(30 * 24 * 3600);

impl ClientConfig {
    /// Reads `.env` if present, then the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_url = lookup("ZR_API_URL")
            .unwrap_or(defaults.api_url)
            .trim_end_matches('/')
            .to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "ZR_API_URL must be an http(s) URL, got '{api_url}'"
            )));
        }

        let config = Self {
            api_url,
            poll_interval: Duration::from_millis(parse_or(&lookup, "ZR_POLL_INTERVAL_MS", 1000)?),
            result_retry: Duration::from_millis(parse_or(&lookup, "ZR_RESULT_RETRY_MS", 500)?),
            job_timeout: Duration::from_secs(parse_or(&lookup, "ZR_JOB_TIMEOUT_SECS", 900)?),
            max_poll_errors: parse_or(&lookup, "ZR_MAX_POLL_ERRORS", defaults.max_poll_errors)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "ZR_REQUEST_TIMEOUT_SECS", 30)?),
        };

        if config.poll_interval.is_zero() {
            return Err(ClientError::Config("ZR_POLL_INTERVAL_MS must be positive".into()));
        }
        if config.max_poll_errors == 0 {
            return Err(ClientError::Config("ZR_MAX_POLL_ERRORS must be positive".into()));
        }
        let spans = [
            ("ZR_POLL_INTERVAL_MS", config.poll_interval),
            ("ZR_RESULT_RETRY_MS", config.result_retry),
            ("ZR_JOB_TIMEOUT_SECS", config.job_timeout),
            ("ZR_REQUEST_TIMEOUT_SECS", config.request_timeout),
        ];
        if let Some((key, _)) = spans.iter().find(|(_, span)| *span > MAX_SPAN) {
            return Err(ClientError::Config(format!("{key} exceeds {} days", MAX_SPAN.as_secs() / 86_400)));
        }

        Ok(config)
    }
}

/// Parses `key` through `lookup`, falling back to `default` when unset.
pub(crate) fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ClientError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8000");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.result_retry, Duration::from_millis(500));
        assert_eq!(config.max_poll_errors, 10);
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("ZR_API_URL", "http://gpu-box:8000/"),
            ("ZR_POLL_INTERVAL_MS", "250"),
            ("ZR_JOB_TIMEOUT_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://gpu-box:8000");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = ClientConfig::from_lookup(lookup_from(&[("ZR_POLL_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let err = ClientConfig::from_lookup(lookup_from(&[("ZR_API_URL", "gpu-box:8000")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let err = ClientConfig::from_lookup(lookup_from(&[("ZR_MAX_POLL_ERRORS", "0")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_rejects_oversized_spans() {
        let max = u64::MAX.to_string();
        for key in ["ZR_JOB_TIMEOUT_SECS", "ZR_REQUEST_TIMEOUT_SECS", "ZR_POLL_INTERVAL_MS"] {
            let err = ClientConfig::from_lookup(lookup_from(&[(key, max.as_str())])).unwrap_err();
            assert!(matches!(err, ClientError::Config(ref msg) if msg.contains(key)), "{key}: {err}");
        }

        let thirty_days = MAX_SPAN.as_secs().to_string();
        let config = ClientConfig::from_lookup(lookup_from(&[("ZR_JOB_TIMEOUT_SECS", thirty_days.as_str())])).unwrap();
        assert_eq!(config.job_timeout, MAX_SPAN);
    }
}
