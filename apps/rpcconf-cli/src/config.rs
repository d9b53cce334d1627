//! Application configuration: layered loading and typed access to scope sections.
//!
//! The file is a YAML document with one optional section per shared scope
//! (`application`, `module`, `provider`, `consumer`, `protocol`), a `protocols`
//! map of endpoint bindings and the `services` / `references` declarations.
//! `RPCCONF__*` environment variables override file values, e.g.
//! `RPCCONF__APPLICATION__TIMEOUT=5000`.
//!
//! Two loaders hand sections to the resolver:
//!
//! 1. **Lenient** (`fragment_or_empty`): a missing or `null` section is an empty
//!    fragment.
//! 2. **Strict** (`fragment_required`): the section must be present.
//!
//! Both fail when a present section is malformed.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use rpcconf::{Fragment, Scope};
use serde::Deserialize;

/// Environment prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RPCCONF__";

/// Section errors for typed scope access.
#[derive(thiserror::Error, Debug)]
pub enum SectionError {
    #[error("section '{section}' not found")]
    NotFound { section: String },
    #[error("invalid section '{section}': {source}")]
    Invalid {
        section: String,
        #[source]
        source: rpcconf::ConfigError,
    },
}

/// Endpoint binding of one transport protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Whole configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub application: Option<serde_json::Value>,
    pub module: Option<serde_json::Value>,
    pub provider: Option<serde_json::Value>,
    pub consumer: Option<serde_json::Value>,
    pub protocol: Option<serde_json::Value>,
    pub protocols: BTreeMap<String, ProtocolConfig>,
    pub services: Vec<serde_json::Value>,
    pub references: Vec<serde_json::Value>,
}

impl AppConfig {
    /// Loads the YAML file, then applies `RPCCONF__*` environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file is missing or the merged document does not fit
    /// the expected shape.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }
        Self::from_figment(
            Figment::new()
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
        .with_context(|| format!("failed to load {}", path.display()))
    }

    /// Extracts the configuration from an already layered figment.
    ///
    /// # Errors
    /// Returns an error if the document does not fit the expected shape.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}

/// Provider of raw scope sections.
pub trait ConfigProvider: Send + Sync {
    /// Raw JSON section of a shared scope, if any.
    fn get_section(&self, scope: Scope) -> Option<&serde_json::Value>;
}

impl ConfigProvider for AppConfig {
    fn get_section(&self, scope: Scope) -> Option<&serde_json::Value> {
        match scope {
            Scope::Application => self.application.as_ref(),
            Scope::Module => self.module.as_ref(),
            Scope::Provider => self.provider.as_ref(),
            Scope::Consumer => self.consumer.as_ref(),
            Scope::Protocol => self.protocol.as_ref(),
            Scope::Service | Scope::Reference => None,
        }
    }
}

/// Lenient section loader: absent or `null` gives an empty fragment.
///
/// # Errors
/// Returns `SectionError::Invalid` if the section exists but is not a valid fragment.
pub fn fragment_or_empty(
    provider: &dyn ConfigProvider,
    scope: Scope,
) -> Result<Fragment, SectionError> {
    match provider.get_section(scope) {
        None | Some(serde_json::Value::Null) => Ok(Fragment::new(scope)),
        Some(raw) => parse(scope, raw),
    }
}

/// Strict section loader: the section must be present.
///
/// # Errors
/// - `SectionError::NotFound` if the section is absent or `null`
/// - `SectionError::Invalid` if it is not a valid fragment
pub fn fragment_required(
    provider: &dyn ConfigProvider,
    scope: Scope,
) -> Result<Fragment, SectionError> {
    match provider.get_section(scope) {
        None | Some(serde_json::Value::Null) => Err(SectionError::NotFound {
            section: scope.to_string(),
        }),
        Some(raw) => parse(scope, raw),
    }
}

fn parse(scope: Scope, raw: &serde_json::Value) -> Result<Fragment, SectionError> {
    Fragment::from_json(scope, raw).map_err(|source| SectionError::Invalid {
        section: scope.to_string(),
        source,
    })
}
