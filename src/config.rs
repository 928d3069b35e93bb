use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_BUCKET: &str = "images";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Supabase,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub bucket: String,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendKind,
    /// Present when `backend` is `Supabase`.
    pub supabase: Option<SupabaseConfig>,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend = match get("PHOTOSHARE_BACKEND").as_deref() {
            None | Some("supabase") => BackendKind::Supabase,
            Some("memory") => BackendKind::Memory,
            Some(other) => bail!("PHOTOSHARE_BACKEND must be `supabase` or `memory`, got `{}`", other),
        };

        let supabase = match backend {
            BackendKind::Memory => None,
            BackendKind::Supabase => {
                let poll_ms = match get("FEED_POLL_INTERVAL_MS") {
                    Some(v) => v.parse::<u64>().context("FEED_POLL_INTERVAL_MS must be an integer")?,
                    None => DEFAULT_POLL_INTERVAL_MS,
                };
                let timeout_secs = match get("HTTP_TIMEOUT_SECS") {
                    Some(v) => v.parse::<u64>().context("HTTP_TIMEOUT_SECS must be an integer")?,
                    None => DEFAULT_HTTP_TIMEOUT_SECS,
                };
                Some(SupabaseConfig {
                    url: get("SUPABASE_URL").context("SUPABASE_URL not set")?,
                    anon_key: get("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY not set")?,
                    bucket: get("SUPABASE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                    poll_interval: Duration::from_millis(poll_ms.max(1)),
                    http_timeout: Duration::from_secs(timeout_secs),
                })
            }
        };

        let port = match get("PORT") {
            Some(v) => v.parse::<u16>().context("PORT must be a port number")?,
            None => DEFAULT_PORT,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ORIGINS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            backend,
            supabase,
            port,
            allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn supabase_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://xyz.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();

        assert_eq!(cfg.backend, BackendKind::Supabase);
        let sb = cfg.supabase.unwrap();
        assert_eq!(sb.bucket, "images");
        assert_eq!(sb.poll_interval, Duration::from_millis(2000));
        assert_eq!(sb.http_timeout, Duration::from_secs(30));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.allowed_origins.len(), 2);
    }

    #[test]
    fn memory_backend_needs_no_credentials() {
        let cfg = Config::from_lookup(lookup(&[
            ("PHOTOSHARE_BACKEND", "memory"),
            ("PORT", "9000"),
            ("ALLOWED_ORIGINS", "http://a.test, ,http://b.test"),
        ]))
        .unwrap();

        assert_eq!(cfg.backend, BackendKind::Memory);
        assert!(cfg.supabase.is_none());
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn rejects_bad_values() {
        let missing = Config::from_lookup(lookup(&[("SUPABASE_URL", "https://xyz.supabase.co")]));
        assert!(missing.unwrap_err().to_string().contains("SUPABASE_ANON_KEY"));

        let unknown = Config::from_lookup(lookup(&[("PHOTOSHARE_BACKEND", "firebase")]));
        assert!(unknown.is_err());

        let port = Config::from_lookup(lookup(&[("PHOTOSHARE_BACKEND", "memory"), ("PORT", "http")]));
        assert!(port.is_err());
    }
}
