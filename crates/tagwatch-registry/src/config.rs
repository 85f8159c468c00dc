//! Registry configuration file handling.
//!
//! Registries are described in a YAML list loaded at startup and mergeable
//! at runtime; each record maps onto one [`EndpointConfig`]. Retry/backoff
//! tuning is deliberately plain configuration with documented defaults
//! rather than environment-variable magic.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::CredentialSource;
use crate::endpoint::{EndpointConfig, EndpointRegistry, TagSortMode};
use crate::error::{RegistryError, Result};
use crate::limiter::DEFAULT_INFLIGHT_LIMIT;

/// Top-level registry configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryList {
    /// Configured registries.
    #[serde(default)]
    pub registries: Vec<RegistryRecord>,
}

/// One registry record of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRecord {
    /// Human-readable registry name.
    pub name: String,

    /// Registry API base URL.
    pub api_url: String,

    /// Prefix this registry serves.
    pub prefix: String,

    /// Whether the engine should ping the endpoint before first use.
    #[serde(default)]
    pub ping: bool,

    /// Credential specification (`secret:...`, `env:...`, ...).
    #[serde(default)]
    pub credentials: Option<String>,

    /// Whether this registry serves images without a registry host.
    #[serde(default)]
    pub default: bool,

    /// Requests per second; zero or absent means unlimited.
    #[serde(default)]
    pub limit: u32,

    /// Tag-list ordering the registry guarantees.
    #[serde(default, rename = "tagsortmode")]
    pub tag_sort_mode: Option<String>,

    /// Whether TLS certificate verification is disabled.
    #[serde(default)]
    pub insecure: bool,

    /// Namespace prepended to bare repository names.
    #[serde(default, rename = "defaultns")]
    pub default_ns: Option<String>,

    /// Credential expiry window (`30s`, `5m`, `2h`).
    #[serde(default, rename = "credsexpire")]
    pub creds_expire: Option<String>,
}

impl RegistryRecord {
    /// Converts the record into an endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the credential specification,
    /// sort mode or expiry duration fails to parse.
    pub fn to_endpoint_config(&self) -> Result<EndpointConfig> {
        let credentials = match &self.credentials {
            Some(spec) => CredentialSource::parse(spec)?,
            None => CredentialSource::Anonymous,
        };
        let tag_sort_mode = match &self.tag_sort_mode {
            Some(mode) => TagSortMode::parse(mode)?,
            None => TagSortMode::Unsorted,
        };
        let creds_expire = match &self.creds_expire {
            Some(raw) => Some(parse_duration(raw)?),
            None => None,
        };

        Ok(EndpointConfig {
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            api_url: self.api_url.trim_end_matches('/').to_string(),
            credentials,
            insecure: self.insecure,
            default_namespace: self.default_ns.clone(),
            limit: self.limit,
            inflight_limit: DEFAULT_INFLIGHT_LIMIT,
            creds_expire,
            tag_sort_mode,
            ping: self.ping,
            is_default: self.default,
        })
    }
}

impl RegistryList {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConfigError`] for malformed YAML.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| RegistryError::ConfigError {
            message: e.to_string(),
        })
    }

    /// Registers every record into the endpoint registry, replacing
    /// existing endpoints with the same prefix. Returns how many records
    /// were applied.
    ///
    /// # Errors
    ///
    /// Returns the first record conversion error; earlier records stay
    /// applied.
    pub fn apply(&self, registry: &EndpointRegistry) -> Result<usize> {
        for record in &self.registries {
            let config = record.to_endpoint_config()?;
            tracing::info!(
                registry = %config.name,
                prefix = %config.prefix,
                api_url = %config.api_url,
                "configured registry endpoint"
            );
            registry.add_endpoint(config);
        }
        Ok(self.registries.len())
    }
}

/// Loads the registry configuration file.
///
/// # Errors
///
/// Returns [`RegistryError::IoError`] when the file cannot be read and
/// [`RegistryError::ConfigError`] when it cannot be parsed.
pub fn load_registries(path: impl AsRef<Path>) -> Result<RegistryList> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| RegistryError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    RegistryList::parse(&raw)
}

/// Parses a duration string: a plain number of seconds, or a number with an
/// `s`/`m`/`h`/`d` suffix.
///
/// # Errors
///
/// Returns [`RegistryError::ConfigError`] for anything else.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || RegistryError::ConfigError {
        message: format!("invalid duration '{input}'"),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let (value, unit) = trimmed.split_at(trimmed.len() - 1);
    let value: u64 = value.parse().map_err(|_| invalid())?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(seconds))
}
