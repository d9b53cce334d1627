//! Service export lifecycle.
//!
//! `Declared -> Resolving -> Resolved -> [Pending] -> Exported -> Unexported`
//!
//! - resolution runs the resolver and validator synchronously;
//! - `delay > 0` and `delay = -1` park the export in `Pending` until the timer or the
//!   readiness signal fires, cancellable by [`ServiceExport::unexport`];
//! - exporting registers one key per protocol and publishes one announcement URL per
//!   protocol and registry;
//! - unexport is legal from every state and idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rpcconf::{
    AnnouncementUrl, ConfigError, Descriptor, ExportDelay, ExportKey, Resolver, ScopeChain,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::publisher::{LogPublisher, RegistryPublisher};
use crate::readiness::ReadinessSignal;
use crate::registry::{ExportRegistry, OwnerId};

/// Host used for protocols without an explicit binding.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Well-known port of a transport protocol; `0` when none is defined.
#[must_use]
pub fn default_port(protocol: &str) -> u16 {
    match protocol {
        "dubbo" => 20880,
        "rmi" => 1099,
        "hessian" | "http" | "webservice" => 80,
        "thrift" => 40880,
        _ => 0,
    }
}

/// Address a protocol is served on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Protocol name to endpoint bindings, with a default host and port table.
#[derive(Clone, Debug)]
pub struct ProtocolBindings {
    host: String,
    bound: HashMap<String, Endpoint>,
}

impl ProtocolBindings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            bound: HashMap::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, protocol: impl Into<String>, endpoint: Endpoint) -> Self {
        self.bound.insert(protocol.into(), endpoint);
        self
    }

    #[must_use]
    pub fn endpoint(&self, protocol: &str) -> Endpoint {
        self.bound
            .get(protocol)
            .cloned()
            .unwrap_or_else(|| Endpoint::new(self.host.clone(), default_port(protocol)))
    }
}

impl Default for ProtocolBindings {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

/// Collaborators shared by every export of a process.
#[derive(Clone)]
pub struct ExportContext {
    pub registry: Arc<ExportRegistry>,
    pub publisher: Arc<dyn RegistryPublisher>,
    pub readiness: ReadinessSignal,
    pub bindings: ProtocolBindings,
    pub resolver: Resolver,
}

impl fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportContext")
            .field("registry", &self.registry)
            .field("readiness", &self.readiness.is_ready())
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl ExportContext {
    /// Context with a logging publisher, an unsignalled readiness and default bindings.
    #[must_use]
    pub fn new(registry: Arc<ExportRegistry>) -> Self {
        Self {
            registry,
            publisher: Arc::new(LogPublisher),
            readiness: ReadinessSignal::new(),
            bindings: ProtocolBindings::default(),
            resolver: Resolver::new(),
        }
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn RegistryPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessSignal) -> Self {
        self.readiness = readiness;
        self
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: ProtocolBindings) -> Self {
        self.bindings = bindings;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Declared,
    Resolving,
    Resolved,
    /// Waiting for the delay timer or the readiness signal.
    Pending,
    Exported,
    Unexported,
}

/// What [`ServiceExport::export`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Exported,
    /// `export = false`; nothing was registered.
    Disabled,
    /// An earlier or overlapping call exported it.
    AlreadyExported,
}

#[derive(Default)]
struct Staged {
    keys: Vec<ExportKey>,
    urls: Vec<AnnouncementUrl>,
    published: Vec<(String, AnnouncementUrl)>,
}

struct Inner {
    state: ExportState,
    descriptor: Option<Arc<Descriptor>>,
    keys: Vec<ExportKey>,
    urls: Vec<AnnouncementUrl>,
    published: Vec<(String, AnnouncementUrl)>,
}

/// Export lifecycle of one declared service.
pub struct ServiceExport {
    id: OwnerId,
    chain: ScopeChain,
    ctx: ExportContext,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
    /// Serializes exports so an overlapping call reports the real outcome.
    export_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ServiceExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceExport")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceExport {
    #[must_use]
    pub fn new(chain: ScopeChain, ctx: ExportContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain,
            ctx,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: ExportState::Declared,
                descriptor: None,
                keys: Vec::new(),
                urls: Vec::new(),
                published: Vec::new(),
            }),
            export_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> OwnerId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<Arc<Descriptor>> {
        self.inner.lock().descriptor.clone()
    }

    /// Keys this export holds in the registry.
    #[must_use]
    pub fn keys(&self) -> Vec<ExportKey> {
        self.inner.lock().keys.clone()
    }

    /// Announcement URLs, one per exported protocol.
    #[must_use]
    pub fn urls(&self) -> Vec<AnnouncementUrl> {
        self.inner.lock().urls.clone()
    }

    /// Resolves and validates the descriptor; later calls return the cached result.
    ///
    /// # Errors
    /// - validation errors from the resolver
    /// - `ConfigError::Cancelled` after unexport
    pub fn resolve(&self) -> Result<Arc<Descriptor>, ConfigError> {
        let mut inner = self.inner.lock();
        if let Some(descriptor) = &inner.descriptor {
            return Ok(Arc::clone(descriptor));
        }
        if inner.state == ExportState::Unexported {
            return Err(ConfigError::Cancelled);
        }

        inner.state = ExportState::Resolving;
        match self.ctx.resolver.resolve_validated(&self.chain) {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                tracing::debug!(export = %self.id, service = %descriptor.service_key(), "service resolved");
                inner.state = ExportState::Resolved;
                inner.descriptor = Some(Arc::clone(&descriptor));
                Ok(descriptor)
            }
            Err(e) => {
                inner.state = ExportState::Declared;
                Err(e)
            }
        }
    }

    /// Resolves, waits out the configured delay and exports.
    ///
    /// A call overlapping an export in progress waits for it, then reports
    /// `AlreadyExported` if it succeeded or retries if it failed.
    ///
    /// # Errors
    /// - resolution or validation errors
    /// - `ConfigError::ConflictingExport` if a tuple is exported with divergent values
    /// - `ConfigError::Collaborator` if publishing fails; everything registered by
    ///   this call is rolled back
    /// - `ConfigError::Cancelled` if unexported while pending
    pub async fn export(&self) -> Result<ExportOutcome, ConfigError> {
        let descriptor = self.resolve()?;

        if !descriptor.is_export_enabled() {
            for key in export_keys(&descriptor) {
                self.ctx.registry.ensure_not_exported(&key, self.id)?;
            }
            tracing::info!(service = %descriptor.service_key(), "export disabled, skipping");
            return Ok(ExportOutcome::Disabled);
        }

        let delay = descriptor.export_delay();
        let _guard = self.export_lock.lock().await;
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ExportState::Unexported => return Err(ConfigError::Cancelled),
                ExportState::Exported => return Ok(ExportOutcome::AlreadyExported),
                _ => {}
            }
            if delay != ExportDelay::Immediate {
                inner.state = ExportState::Pending;
            }
        }

        match delay {
            ExportDelay::Immediate => {}
            ExportDelay::After(wait) => {
                tracing::debug!(service = %descriptor.service_key(), ?wait, "export delayed");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(ConfigError::Cancelled),
                    () = tokio::time::sleep(wait) => {}
                }
            }
            ExportDelay::OnReady => {
                tracing::debug!(service = %descriptor.service_key(), "export waiting for readiness");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(ConfigError::Cancelled),
                    () = self.ctx.readiness.wait() => {}
                }
            }
        }

        let mut staged = Staged::default();
        match self.stage(&descriptor, &mut staged).await {
            Ok(()) => self.commit(&descriptor, staged).await,
            Err(e) => {
                tracing::warn!(service = %descriptor.service_key(), error = %e, "export failed, rolling back");
                self.rollback(&staged).await;
                let mut inner = self.inner.lock();
                if inner.state == ExportState::Pending {
                    inner.state = ExportState::Resolved;
                }
                Err(e)
            }
        }
    }

    async fn stage(&self, descriptor: &Arc<Descriptor>, staged: &mut Staged) -> Result<(), ConfigError> {
        for protocol in descriptor.protocols() {
            let endpoint = self.ctx.bindings.endpoint(protocol);
            let url = AnnouncementUrl::for_service(descriptor, protocol, &endpoint.host, endpoint.port)?;
            let key = ExportKey::new(descriptor.service_key(), protocol.as_str());
            self.ctx
                .registry
                .register(key.clone(), self.id, Arc::clone(descriptor), url.clone())?;
            staged.keys.push(key);
            staged.urls.push(url);
        }

        if !descriptor.is_register_enabled() {
            tracing::debug!(service = %descriptor.service_key(), "register disabled, not publishing");
            return Ok(());
        }
        let registries: Vec<String> = if descriptor.registries().is_empty() {
            vec![String::new()]
        } else {
            descriptor.registries().to_vec()
        };
        for url in &staged.urls {
            for registry in &registries {
                self.ctx.publisher.publish(registry, url).await?;
                staged.published.push((registry.clone(), url.clone()));
            }
        }
        Ok(())
    }

    async fn commit(&self, descriptor: &Descriptor, staged: Staged) -> Result<ExportOutcome, ConfigError> {
        {
            let mut inner = self.inner.lock();
            if !self.cancel.is_cancelled() {
                inner.state = ExportState::Exported;
                tracing::info!(
                    export = %self.id,
                    service = %descriptor.service_key(),
                    protocols = staged.keys.len(),
                    published = staged.published.len(),
                    "service exported"
                );
                inner.keys = staged.keys;
                inner.urls = staged.urls;
                inner.published = staged.published;
                return Ok(ExportOutcome::Exported);
            }
        }
        // Unexported while publishing.
        self.rollback(&staged).await;
        Err(ConfigError::Cancelled)
    }

    async fn rollback(&self, staged: &Staged) {
        for key in &staged.keys {
            self.ctx.registry.unregister(key, self.id);
        }
        for (registry, url) in &staged.published {
            if let Err(e) = self.ctx.publisher.unpublish(registry, url).await {
                tracing::warn!(registry, %url, error = %e, "rollback unpublish failed");
            }
        }
    }

    /// Removes this export's registry keys and asks every registry to forget it.
    ///
    /// Cancels a pending export. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first `ConfigError::Collaborator` from unpublishing; keys are
    /// released regardless.
    pub async fn unexport(&self) -> Result<(), ConfigError> {
        self.cancel.cancel();
        let (keys, published) = {
            let mut inner = self.inner.lock();
            if inner.state == ExportState::Unexported {
                return Ok(());
            }
            inner.state = ExportState::Unexported;
            inner.urls.clear();
            (
                std::mem::take(&mut inner.keys),
                std::mem::take(&mut inner.published),
            )
        };

        for key in &keys {
            self.ctx.registry.unregister(key, self.id);
        }
        let mut first_error = None;
        for (registry, url) in &published {
            if let Err(e) = self.ctx.publisher.unpublish(registry, url).await {
                tracing::warn!(registry, %url, error = %e, "unpublish failed");
                first_error.get_or_insert(ConfigError::from(e));
            }
        }
        tracing::info!(export = %self.id, keys = keys.len(), "service unexported");
        first_error.map_or(Ok(()), Err)
    }
}

fn export_keys(descriptor: &Descriptor) -> Vec<ExportKey> {
    descriptor
        .protocols()
        .iter()
        .map(|p| ExportKey::new(descriptor.service_key(), p.as_str()))
        .collect()
}
