//! Configuration management.
//!
//! Configuration is read from environment variables:
//! - `HOST` / `PORT` - Bind address (default `127.0.0.1:3000`)
//! - `DEV_MODE` - Skip authentication, every request runs as user `dev` (default `true`)
//! - `JWT_SECRET` - HS256 secret for bearer tokens. Required when `DEV_MODE=false`.
//! - `JWT_TTL_DAYS` - Lifetime of issued tokens (default 30)
//! - `LABELER_DATABASE_PATH` - SQLite file (default `./data/labeler.db`)
//! - `PRICE_PER_MILLION_INPUT_TOKENS` / `PRICE_PER_MILLION_OUTPUT_TOKENS` - Rates (default 5 / 20)
//! - `LABELER_INITIAL_BALANCE` - Balance of a newly seen account (default 0)
//! - `LABELER_CLASSIFIER_URL` / `LABELER_CLASSIFIER_KEY` - Hosted classify endpoint.
//!   When set, the model settings below are unused.
//! - `OPENAI_API_KEY` - Required unless `LABELER_CLASSIFIER_URL` is set
//! - `OPENAI_API_URL` - Chat completions endpoint (default OpenAI)
//! - `LABELER_MODEL` - Model id (default `gpt-4o`)
//! - `LABELER_TEMPERATURE` - Sampling temperature (default 0.2)
//! - `LABELER_CLASSIFY_TIMEOUT_SECS` - Classification call timeout (default 120)
//! - `LABELER_MAX_UPLOAD_BYTES` - Largest accepted spreadsheet (default 20 MiB)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::budget::Pricing;
use crate::classify::{DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT};
use crate::llm::OPENAI_API_URL;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub jwt_ttl_days: i64,
}

impl AuthConfig {
    pub fn auth_required(&self, dev_mode: bool) -> bool {
        !dev_mode
    }
}

/// Which classification backend to run.
#[derive(Debug, Clone)]
pub enum ClassifierConfig {
    /// Prompt and call an OpenAI-compatible model in process.
    Model {
        api_key: String,
        api_url: String,
        model: String,
        temperature: f64,
    },
    /// Forward the request envelope to a hosted classify endpoint.
    Remote { url: String, api_key: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub auth: AuthConfig,
    pub database_path: PathBuf,
    pub pricing: Pricing,
    pub initial_balance: f64,
    pub classifier: ClassifierConfig,
    pub classify_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let dev_mode = parse_value(&get, "DEV_MODE", true)?;
        let auth = AuthConfig {
            jwt_secret: get("JWT_SECRET"),
            jwt_ttl_days: parse_value(&get, "JWT_TTL_DAYS", 30)?,
        };
        if auth.auth_required(dev_mode) && auth.jwt_secret.is_none() {
            bail!("JWT_SECRET must be set when DEV_MODE=false");
        }

        let pricing = Pricing::new(
            parse_value(&get, "PRICE_PER_MILLION_INPUT_TOKENS", 5.0)?,
            parse_value(&get, "PRICE_PER_MILLION_OUTPUT_TOKENS", 20.0)?,
        );
        for (name, price) in [
            ("PRICE_PER_MILLION_INPUT_TOKENS", pricing.price_per_million_input_tokens),
            ("PRICE_PER_MILLION_OUTPUT_TOKENS", pricing.price_per_million_output_tokens),
        ] {
            if !price.is_finite() || price < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, price);
            }
        }

        let classifier = match get("LABELER_CLASSIFIER_URL") {
            Some(url) => ClassifierConfig::Remote {
                url,
                api_key: get("LABELER_CLASSIFIER_KEY"),
            },
            None => {
                let api_key = get("OPENAI_API_KEY").context(
                    "OPENAI_API_KEY must be set unless LABELER_CLASSIFIER_URL is configured",
                )?;
                let temperature: f64 =
                    parse_value(&get, "LABELER_TEMPERATURE", DEFAULT_TEMPERATURE)?;
                if !(0.0..=2.0).contains(&temperature) {
                    bail!("LABELER_TEMPERATURE must be between 0 and 2, got {}", temperature);
                }
                ClassifierConfig::Model {
                    api_key,
                    api_url: get("OPENAI_API_URL").unwrap_or_else(|| OPENAI_API_URL.to_string()),
                    model: get("LABELER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    temperature,
                }
            }
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_value(&get, "PORT", 3000)?,
            dev_mode,
            auth,
            database_path: get("LABELER_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/labeler.db")),
            pricing,
            initial_balance: parse_value(&get, "LABELER_INITIAL_BALANCE", 0.0)?,
            classifier,
            classify_timeout: Duration::from_secs(parse_value(
                &get,
                "LABELER_CLASSIFY_TIMEOUT_SECS",
                DEFAULT_TIMEOUT.as_secs(),
            )?),
            max_upload_bytes: parse_value(&get, "LABELER_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_value<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", name, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(config.dev_mode);
        assert_eq!(config.pricing, Pricing::default());
        assert_eq!(config.initial_balance, 0.0);
        assert_eq!(config.classify_timeout, Duration::from_secs(120));
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        match config.classifier {
            ClassifierConfig::Model {
                model, temperature, ..
            } => {
                assert_eq!(model, "gpt-4o");
                assert_eq!(temperature, 0.2);
            }
            other => panic!("unexpected classifier: {:?}", other),
        }
    }

    #[test]
    fn test_remote_classifier_needs_no_model_key() {
        let config = config(&[
            ("LABELER_CLASSIFIER_URL", "https://labels.example.com/classify"),
            ("LABELER_CLASSIFIER_KEY", "anon"),
        ])
        .unwrap();
        assert!(matches!(
            config.classifier,
            ClassifierConfig::Remote { api_key: Some(_), .. }
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[]).is_err());
        assert!(config(&[("OPENAI_API_KEY", "k"), ("DEV_MODE", "false")]).is_err());
        assert!(config(&[("OPENAI_API_KEY", "k"), ("PORT", "http")]).is_err());
        assert!(config(&[("OPENAI_API_KEY", "k"), ("PRICE_PER_MILLION_INPUT_TOKENS", "-1")]).is_err());
        assert!(config(&[("OPENAI_API_KEY", "k"), ("LABELER_TEMPERATURE", "3")]).is_err());

        let config = config(&[
            ("OPENAI_API_KEY", "k"),
            ("DEV_MODE", "false"),
            ("JWT_SECRET", "s3cret"),
            ("PORT", " "),
        ])
        .unwrap();
        assert!(!config.dev_mode);
        assert_eq!(config.port, 3000);
    }
}
