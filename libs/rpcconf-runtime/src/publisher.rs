//! Registry publisher collaborator.

use anyhow::Result;
use async_trait::async_trait;
use rpcconf::AnnouncementUrl;

/// Publishes announcement URLs to a service registry.
///
/// `registry` is a configured registry id, or empty when the service lists none.
#[async_trait]
pub trait RegistryPublisher: Send + Sync {
    async fn publish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()>;

    async fn unpublish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()>;
}

/// Publisher that only logs. Used when no registry client is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl RegistryPublisher for LogPublisher {
    async fn publish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()> {
        tracing::info!(registry, %url, "publish");
        Ok(())
    }

    async fn unpublish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()> {
        tracing::info!(registry, %url, "unpublish");
        Ok(())
    }
}
