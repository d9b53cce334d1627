//! Provider directory - contract for discovering providers of a service key
//!
//! References consult a [`ProviderDirectory`] at bind time. The in-process
//! [`LocalProviderDirectory`] answers from the export key registry.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rpcconf::{ANY, AnnouncementUrl, ExportKey, Field, ServiceKey};

use crate::registry::ExportRegistry;

/// One reachable provider of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provider {
    pub key: ExportKey,
    pub url: AnnouncementUrl,
}

impl Provider {
    #[must_use]
    pub fn new(key: ExportKey, url: AnnouncementUrl) -> Self {
        Self { key, url }
    }

    /// Provider described only by its URL (direct `url` targets, registry
    /// notifications). Identity comes from the query, falling back to the path.
    #[must_use]
    pub fn from_url(url: AnnouncementUrl) -> Self {
        let interface = url
            .param(Field::Interface.name())
            .unwrap_or_else(|| url.path())
            .to_owned();
        let group = url.param(Field::Group.name()).unwrap_or_default();
        let version = url.param(Field::Version.name()).unwrap_or_default();
        let key = ExportKey::new(
            ServiceKey::new(interface, group, version),
            url.protocol(),
        );
        Self { key, url }
    }

    /// Provider for a direct `url` target of a reference looking for `target`.
    /// Identity parts missing from the URL are taken from `target`, except
    /// wildcards.
    #[must_use]
    pub fn direct(url: AnnouncementUrl, target: &ServiceKey) -> Self {
        let mut provider = Self::from_url(url);
        let service = &mut provider.key.service;
        for (part, fallback) in [
            (&mut service.interface, &target.interface),
            (&mut service.group, &target.group),
            (&mut service.version, &target.version),
        ] {
            if part.is_empty() && fallback != ANY {
                part.clone_from(fallback);
            }
        }
        provider
    }

    /// Address identity: `protocol://host:port/path`.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.url.protocol(),
            self.url.host(),
            self.url.port(),
            self.url.path()
        )
    }
}

/// Discovers providers for a consumer-side service key pattern.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Providers whose key satisfies `pattern` (`*` group/version wildcards).
    async fn lookup(&self, pattern: &ServiceKey) -> Result<Vec<Provider>>;
}

/// In-process directory backed by an [`ExportRegistry`].
pub struct LocalProviderDirectory {
    registry: Arc<ExportRegistry>,
}

impl LocalProviderDirectory {
    #[must_use]
    pub fn new(registry: Arc<ExportRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ProviderDirectory for LocalProviderDirectory {
    async fn lookup(&self, pattern: &ServiceKey) -> Result<Vec<Provider>> {
        Ok(self
            .registry
            .lookup(pattern)
            .into_iter()
            .map(|e| Provider::new(e.key, e.url))
            .collect())
    }
}
