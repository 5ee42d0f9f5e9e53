//! Auth gate configuration.
//!
//! Configuration is loaded from environment variables. Trust settings
//! (issuer, audiences, JWKS URI) are required unless authentication is
//! disabled.

use crate::auth::jwks::{KeyCacheSettings, DEFAULT_CACHE_TTL_SECONDS, DEFAULT_FETCH_TIMEOUT_SECONDS};
use crate::auth::keys::KeyFamily;
use crate::policy::{Policy, Requirement};
use common::jwt::{algorithm_name, parse_algorithm, DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default access policy: everything under `/api` needs a token.
pub const DEFAULT_POLICY: &str = "/api/**=authenticated";

/// Default minimum interval between unknown-kid refetches in seconds.
pub const DEFAULT_MIN_REFRESH_INTERVAL_SECONDS: u64 = 5;

/// Default graceful shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Who the gate trusts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    /// Required `iss` claim.
    pub issuer: String,

    /// Accepted `aud` values; a token needs at least one.
    pub audiences: Vec<String>,

    /// URL of the authority's JWKS document.
    pub jwks_uri: String,
}

/// Auth gate configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Trust settings. `None` when authentication is disabled.
    pub trust: Option<TrustConfig>,

    /// Path policy. Permit-all when authentication is disabled.
    pub policy: Policy,

    /// Only accept tokens signed with this algorithm.
    pub jwt_algorithm: Option<Algorithm>,

    /// Clock skew tolerance for `exp`/`nbf` (default: 0).
    pub clock_skew: Duration,

    /// Key cache TTL, fetch timeout and refetch throttle.
    pub key_cache: KeyCacheSettings,

    /// Period of the background JWKS refresh. `None` disables it.
    pub jwks_refresh_interval: Option<Duration>,

    /// How long to drain connections on shutdown.
    pub drain_period: Duration,
}

impl Config {
    pub fn authentication_enabled(&self) -> bool {
        self.trust.is_some()
    }
}

/// Policies print as `pattern=requirement` lists.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self
            .policy
            .rules()
            .iter()
            .map(|rule| format!("{}={}", rule.pattern, rule.requirement))
            .collect();

        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("trust", &self.trust)
            .field("policy", &rules)
            .field("default_requirement", &self.policy.default_requirement())
            .field("jwt_algorithm", &self.jwt_algorithm.map(algorithm_name))
            .field("clock_skew", &self.clock_skew)
            .field("key_cache", &self.key_cache)
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("drain_period", &self.drain_period)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid authentication toggle: {0}")]
    InvalidToggle(String),

    #[error("Invalid access policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid JWKS URI: {0}")]
    InvalidJwksUri(String),

    #[error("Invalid JWT algorithm configuration: {0}")]
    InvalidJwtAlgorithm(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let authentication_enabled = match vars.get("AUTHENTICATION_ENABLED") {
            Some(value) => parse_bool(value).ok_or_else(|| {
                ConfigError::InvalidToggle(format!(
                    "AUTHENTICATION_ENABLED must be true or false, got '{}'",
                    value
                ))
            })?,
            None => true,
        };

        let jwt_algorithm = match vars.get("JWT_ALGORITHM").filter(|v| !v.is_empty()) {
            Some(name) => {
                let algorithm = parse_algorithm(name)
                    .filter(|alg| KeyFamily::for_algorithm(*alg).is_some())
                    .ok_or_else(|| {
                        ConfigError::InvalidJwtAlgorithm(format!(
                            "JWT_ALGORITHM must be an asymmetric JOSE algorithm, got '{}'",
                            name
                        ))
                    })?;
                Some(algorithm)
            }
            None => None,
        };

        // Parse JWT clock skew tolerance with validation
        let clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let key_cache = KeyCacheSettings {
            ttl: parse_seconds(vars, "JWKS_CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECONDS, false)?,
            fetch_timeout: parse_seconds(
                vars,
                "JWKS_FETCH_TIMEOUT_SECONDS",
                DEFAULT_FETCH_TIMEOUT_SECONDS,
                false,
            )?,
            min_refresh_interval: parse_seconds(
                vars,
                "JWKS_MIN_REFRESH_INTERVAL_SECONDS",
                DEFAULT_MIN_REFRESH_INTERVAL_SECONDS,
                true,
            )?,
        };

        let jwks_refresh_interval =
            Some(parse_seconds(vars, "JWKS_REFRESH_INTERVAL_SECONDS", 0, true)?)
                .filter(|interval| !interval.is_zero());

        let drain_period = parse_seconds(vars, "GATE_DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS, true)?;

        let (trust, policy) = if authentication_enabled {
            (Some(trust_from_vars(vars)?), policy_from_vars(vars)?)
        } else {
            (None, Policy::permit_all())
        };

        Ok(Config {
            bind_address,
            trust,
            policy,
            jwt_algorithm,
            clock_skew,
            key_cache,
            jwks_refresh_interval,
            drain_period,
        })
    }
}

/// Value of a required variable, as given. Blank values count as missing.
fn required<'a>(vars: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ConfigError> {
    vars.get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn trust_from_vars(vars: &HashMap<String, String>) -> Result<TrustConfig, ConfigError> {
    let issuer = required(vars, "EXPECTED_ISSUER")?.to_string();

    let audiences: Vec<String> = required(vars, "EXPECTED_AUDIENCE")?
        .split(',')
        .map(str::trim)
        .filter(|aud| !aud.is_empty())
        .map(str::to_string)
        .collect();
    if audiences.is_empty() {
        return Err(ConfigError::MissingEnvVar("EXPECTED_AUDIENCE".to_string()));
    }

    let jwks_uri = required(vars, "JWKS_URI")?.trim().to_string();
    if !(jwks_uri.starts_with("http://") || jwks_uri.starts_with("https://")) {
        return Err(ConfigError::InvalidJwksUri(format!(
            "JWKS_URI must be an http(s) URL, got '{}'",
            jwks_uri
        )));
    }

    Ok(TrustConfig {
        issuer,
        audiences,
        jwks_uri,
    })
}

fn policy_from_vars(vars: &HashMap<String, String>) -> Result<Policy, ConfigError> {
    let default = match vars.get("AUTH_DEFAULT_REQUIREMENT") {
        Some(value) => value
            .parse::<Requirement>()
            .map_err(|e| ConfigError::InvalidPolicy(e.to_string()))?,
        None => Requirement::Public,
    };

    let rules = vars
        .get("AUTH_POLICY")
        .map(String::as_str)
        .unwrap_or(DEFAULT_POLICY);

    Policy::parse(rules, default).map_err(|e| ConfigError::InvalidPolicy(e.to_string()))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    allow_zero: bool,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a non-negative integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 && !allow_zero {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}
