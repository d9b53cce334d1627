#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Recording collaborators shared by the lifecycle tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use rpcconf::{AnnouncementUrl, Descriptor, Field, Fragment, Scope, ScopeChain};
use rpcconf_runtime::{
    ExportContext, ExportRegistry, LocalProviderDirectory, Provider, ProxyFactory,
    ReferenceContext, RegistryPublisher,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Publish(String, String),
    Unpublish(String, String),
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<Published>>,
    pub fail_publish: AtomicBool,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Published> {
        self.events.lock().clone()
    }

    pub fn published_registries(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Published::Publish(registry, _) => Some(registry),
                Published::Unpublish(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl RegistryPublisher for RecordingPublisher {
    async fn publish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            bail!("registry '{registry}' unreachable");
        }
        self.events
            .lock()
            .push(Published::Publish(registry.to_owned(), url.to_string()));
        Ok(())
    }

    async fn unpublish(&self, registry: &str, url: &AnnouncementUrl) -> Result<()> {
        self.events
            .lock()
            .push(Published::Unpublish(registry.to_owned(), url.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingProxies {
    pub created: Mutex<Vec<String>>,
    pub connected: Mutex<Vec<usize>>,
    pub destroyed: Mutex<Vec<String>>,
}

#[async_trait]
impl ProxyFactory for RecordingProxies {
    async fn create(&self, descriptor: &Descriptor) -> Result<()> {
        self.created.lock().push(descriptor.interface().to_owned());
        Ok(())
    }

    async fn connect(&self, _descriptor: &Descriptor, providers: &[Provider]) -> Result<()> {
        self.connected.lock().push(providers.len());
        Ok(())
    }

    async fn destroy(&self, descriptor: &Descriptor) -> Result<()> {
        self.destroyed.lock().push(descriptor.interface().to_owned());
        Ok(())
    }
}

/// Proxy factory whose `create` signals `entered` and then parks until `gate`
/// is notified.
#[derive(Default)]
pub struct GatedProxies {
    pub recorded: RecordingProxies,
    pub entered: Notify,
    pub gate: Notify,
}

#[async_trait]
impl ProxyFactory for GatedProxies {
    async fn create(&self, descriptor: &Descriptor) -> Result<()> {
        self.recorded.create(descriptor).await?;
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(())
    }

    async fn connect(&self, descriptor: &Descriptor, providers: &[Provider]) -> Result<()> {
        self.recorded.connect(descriptor, providers).await
    }

    async fn destroy(&self, descriptor: &Descriptor) -> Result<()> {
        self.recorded.destroy(descriptor).await
    }
}

pub struct Harness {
    pub registry: Arc<ExportRegistry>,
    pub publisher: Arc<RecordingPublisher>,
    pub proxies: Arc<RecordingProxies>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ExportRegistry::new()),
            publisher: Arc::new(RecordingPublisher::default()),
            proxies: Arc::new(RecordingProxies::default()),
        }
    }

    pub fn export_ctx(&self) -> ExportContext {
        ExportContext::new(Arc::clone(&self.registry)).with_publisher(self.publisher.clone())
    }

    pub fn reference_ctx(&self) -> ReferenceContext {
        ReferenceContext::new(Arc::new(LocalProviderDirectory::new(Arc::clone(
            &self.registry,
        ))))
        .with_proxy_factory(self.proxies.clone())
    }

    pub fn reference_ctx_with(&self, proxies: Arc<dyn ProxyFactory>) -> ReferenceContext {
        self.reference_ctx().with_proxy_factory(proxies)
    }
}

pub fn echo_service(f: impl FnOnce(Fragment) -> Fragment) -> ScopeChain {
    ScopeChain::service(f(Fragment::new(Scope::Service)
        .with(Field::Interface, "com.example.Echo")
        .with(Field::Version, "1.0")))
}

pub fn echo_reference(f: impl FnOnce(Fragment) -> Fragment) -> ScopeChain {
    ScopeChain::reference(f(Fragment::new(Scope::Reference)
        .with(Field::Interface, "com.example.Echo")
        .with(Field::Version, "1.0")))
}
