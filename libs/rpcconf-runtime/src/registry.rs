//! Export key registry: tracks every (interface, group, version, protocol) tuple
//! currently exported in this process.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rpcconf::resolver::GENERATE_TOKEN;
use rpcconf::{AnnouncementUrl, ConfigError, Descriptor, ExportKey, Field, ServiceKey, Value};
use uuid::Uuid;

/// Identifier of one export lifecycle instance.
pub type OwnerId = Uuid;

/// Resolved values that decide whether two exports of the same tuple agree.
///
/// `protocol` is excluded because each protocol is registered under its own key.
/// A generated token is compared by the fact that it was generated, not by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(BTreeMap<Field, Value>);

impl Fingerprint {
    #[must_use]
    pub fn of(descriptor: &Descriptor) -> Self {
        let values = descriptor
            .values()
            .filter(|(f, _)| *f != Field::Protocol)
            .map(|(f, v)| {
                if f == Field::Token && descriptor.is_token_generated() {
                    (f, Value::Str(GENERATE_TOKEN.to_owned()))
                } else {
                    (f, v.clone())
                }
            })
            .collect();
        Self(values)
    }

    /// First field whose value differs from `other`.
    fn first_difference(&self, other: &Self) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| self.0.get(f) != other.0.get(f))
    }
}

/// One exported tuple.
#[derive(Clone, Debug)]
pub struct ExportedService {
    pub key: ExportKey,
    pub descriptor: Arc<Descriptor>,
    pub url: AnnouncementUrl,
    fingerprint: Fingerprint,
    owners: Vec<OwnerId>,
}

impl ExportedService {
    /// Number of export instances sharing this tuple.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }
}

/// Outcome of a successful [`ExportRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The tuple was not exported before.
    New,
    /// The tuple was already exported with identical fields.
    Joined,
    /// This owner had already registered the tuple.
    Unchanged,
}

/// Concurrency-safe map from export key to export state.
///
/// Entry locking serializes concurrent registrations of the same tuple: exactly
/// one caller creates the entry, every other one either joins it or gets
/// `ConflictingExport`.
pub struct ExportRegistry {
    inner: DashMap<ExportKey, ExportedService>,
}

impl std::fmt::Debug for ExportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.inner.iter().map(|e| e.key().to_string()).collect();
        f.debug_struct("ExportRegistry")
            .field("exports_count", &self.inner.len())
            .field("keys", &keys)
            .finish()
    }
}

impl ExportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Registers `owner` as an exporter of `key`.
    ///
    /// # Errors
    /// Returns `ConfigError::ConflictingExport` if the tuple is exported with
    /// different field values.
    pub fn register(
        &self,
        key: ExportKey,
        owner: OwnerId,
        descriptor: Arc<Descriptor>,
        url: AnnouncementUrl,
    ) -> Result<Registration, ConfigError> {
        let fingerprint = Fingerprint::of(&descriptor);
        match self.inner.entry(key) {
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                tracing::debug!(%key, %owner, "export key registered");
                slot.insert(ExportedService {
                    key,
                    descriptor,
                    url,
                    fingerprint,
                    owners: vec![owner],
                });
                Ok(Registration::New)
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if let Some(field) = existing.fingerprint.first_difference(&fingerprint) {
                    return Err(ConfigError::conflicting_export(
                        existing.key.to_string(),
                        format!("already exported with a different '{field}'"),
                    ));
                }
                if existing.owners.contains(&owner) {
                    return Ok(Registration::Unchanged);
                }
                existing.owners.push(owner);
                tracing::debug!(key = %existing.key, %owner, owners = existing.owners.len(), "export key joined");
                Ok(Registration::Joined)
            }
        }
    }

    /// Removes `owner` from `key`; the entry disappears with its last owner.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister(&self, key: &ExportKey, owner: OwnerId) -> bool {
        let removed = self
            .inner
            .remove_if_mut(key, |_, entry| {
                entry.owners.retain(|o| *o != owner);
                entry.owners.is_empty()
            })
            .is_some();
        if removed {
            tracing::debug!(%key, %owner, "export key released");
        }
        removed
    }

    /// Fails if `key` is exported by an owner other than `owner`.
    ///
    /// # Errors
    /// Returns `ConfigError::ConflictingExport` when another owner exports the tuple.
    pub fn ensure_not_exported(&self, key: &ExportKey, owner: OwnerId) -> Result<(), ConfigError> {
        match self.inner.get(key) {
            Some(entry) if entry.owners.iter().any(|o| *o != owner) => {
                Err(ConfigError::conflicting_export(
                    key.to_string(),
                    "export disabled but the tuple is already exported",
                ))
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn get(&self, key: &ExportKey) -> Option<ExportedService> {
        self.inner.get(key).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn contains(&self, key: &ExportKey) -> bool {
        self.inner.contains_key(key)
    }

    /// Exports whose service key satisfies `pattern` (wildcard group/version).
    #[must_use]
    pub fn lookup(&self, pattern: &ServiceKey) -> Vec<ExportedService> {
        let mut found: Vec<ExportedService> = self
            .inner
            .iter()
            .filter(|e| pattern.matches(&e.key().service))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ExportKey> {
        let mut keys: Vec<ExportKey> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ExportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
