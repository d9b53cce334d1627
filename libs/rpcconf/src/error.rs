//! Error type shared by resolution, validation and the export/reference lifecycles.

use crate::model::DescriptorKind;
use thiserror::Error;

/// Configuration errors surfaced at the lifecycle transition where they are detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The resolved descriptor carries no interface identity.
    #[error("{kind} descriptor has no interface identity")]
    MissingIdentity { kind: DescriptorKind },

    /// A resolved value violates its field's type or range contract.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// An already exported tuple was exported again with divergent values.
    #[error("conflicting export of {key}: {reason}")]
    ConflictingExport { key: String, reason: String },

    /// `check` is on and no provider could be discovered at bind time.
    #[error("no provider available for {key}")]
    ProviderUnavailable { key: String },

    /// An announcement URL could not be parsed.
    #[error("invalid announcement url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A registry or directory collaborator failed.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// The lifecycle was unexported or released while the operation was in flight.
    #[error("lifecycle cancelled by unexport or release")]
    Cancelled,
}

impl ConfigError {
    #[must_use]
    pub const fn missing_identity(kind: DescriptorKind) -> Self {
        Self::MissingIdentity { kind }
    }

    #[must_use]
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn conflicting_export(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConflictingExport {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn provider_unavailable(key: impl Into<String>) -> Self {
        Self::ProviderUnavailable { key: key.into() }
    }

    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_missing_identity(&self) -> bool {
        matches!(self, Self::MissingIdentity { .. })
    }

    #[must_use]
    pub const fn is_invalid_field(&self) -> bool {
        matches!(self, Self::InvalidField { .. })
    }

    #[must_use]
    pub const fn is_conflicting_export(&self) -> bool {
        matches!(self, Self::ConflictingExport { .. })
    }

    #[must_use]
    pub const fn is_provider_unavailable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }

    /// Name of the offending field, when the error is tied to one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidField { field, .. } => Some(field),
            Self::MissingIdentity { .. } => Some("interface"),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ConfigError {
    fn from(e: anyhow::Error) -> Self {
        Self::Collaborator(format!("{e:#}"))
    }
}
