//! Service reference lifecycle.
//!
//! `Declared -> Resolving -> Resolved -> Bound -> [Deferred] -> Connected -> Released`

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rpcconf::{AnnouncementUrl, ConfigError, Descriptor, Resolver, ScopeChain};

use crate::affinity::StickyAffinity;
use crate::directory::{Provider, ProviderDirectory};

/// Creates and connects the local handle of a reference.
#[async_trait]
pub trait ProxyFactory: Send + Sync {
    /// Builds the handle for a resolved descriptor. No connection is opened yet.
    async fn create(&self, descriptor: &Descriptor) -> Result<()>;

    /// Opens connections to `providers`.
    async fn connect(&self, descriptor: &Descriptor, providers: &[Provider]) -> Result<()>;

    async fn destroy(&self, _descriptor: &Descriptor) -> Result<()> {
        Ok(())
    }
}

/// Proxy factory that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProxyFactory;

#[async_trait]
impl ProxyFactory for LogProxyFactory {
    async fn create(&self, descriptor: &Descriptor) -> Result<()> {
        tracing::info!(service = %descriptor.service_key(), "proxy created");
        Ok(())
    }

    async fn connect(&self, descriptor: &Descriptor, providers: &[Provider]) -> Result<()> {
        tracing::info!(
            service = %descriptor.service_key(),
            providers = providers.len(),
            "proxy connected"
        );
        Ok(())
    }
}

/// Collaborators shared by the references of a process.
#[derive(Clone)]
pub struct ReferenceContext {
    pub directory: Arc<dyn ProviderDirectory>,
    pub proxies: Arc<dyn ProxyFactory>,
    pub resolver: Resolver,
}

impl fmt::Debug for ReferenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceContext").finish_non_exhaustive()
    }
}

impl ReferenceContext {
    #[must_use]
    pub fn new(directory: Arc<dyn ProviderDirectory>) -> Self {
        Self {
            directory,
            proxies: Arc::new(LogProxyFactory),
            resolver: Resolver::new(),
        }
    }

    #[must_use]
    pub fn with_proxy_factory(mut self, proxies: Arc<dyn ProxyFactory>) -> Self {
        self.proxies = proxies;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Declared,
    Resolving,
    Resolved,
    Bound,
    /// Lazy reference waiting for its first call.
    Deferred,
    Connected,
    Released,
}

struct Inner {
    state: ReferenceState,
    descriptor: Option<Arc<Descriptor>>,
    providers: Vec<Provider>,
    affinity: Option<Arc<StickyAffinity>>,
}

/// Lifecycle of one declared reference.
pub struct ServiceReference {
    chain: ScopeChain,
    ctx: ReferenceContext,
    inner: Mutex<Inner>,
    /// Held across bind and first-call connect so overlapping callers wait for
    /// the outcome instead of racing past it.
    bind_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceReference {
    #[must_use]
    pub fn new(chain: ScopeChain, ctx: ReferenceContext) -> Self {
        Self {
            chain,
            ctx,
            inner: Mutex::new(Inner {
                state: ReferenceState::Declared,
                descriptor: None,
                providers: Vec::new(),
                affinity: None,
            }),
            bind_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ReferenceState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<Arc<Descriptor>> {
        self.inner.lock().descriptor.clone()
    }

    /// Providers discovered at bind time.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        self.inner.lock().providers.clone()
    }

    /// Resolves and validates the descriptor; later calls return the cached result.
    ///
    /// # Errors
    /// - validation errors from the resolver
    /// - `ConfigError::Cancelled` after release
    pub fn resolve(&self) -> Result<Arc<Descriptor>, ConfigError> {
        let mut inner = self.inner.lock();
        if let Some(descriptor) = &inner.descriptor {
            return Ok(Arc::clone(descriptor));
        }
        if inner.state == ReferenceState::Released {
            return Err(ConfigError::Cancelled);
        }

        inner.state = ReferenceState::Resolving;
        match self.ctx.resolver.resolve_validated(&self.chain) {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                tracing::debug!(service = %descriptor.service_key(), "reference resolved");
                inner.state = ReferenceState::Resolved;
                inner.affinity = Some(Arc::new(StickyAffinity::new(descriptor.is_sticky())));
                inner.descriptor = Some(Arc::clone(&descriptor));
                Ok(descriptor)
            }
            Err(e) => {
                inner.state = ReferenceState::Declared;
                Err(e)
            }
        }
    }

    /// Resolves, discovers providers and creates the handle.
    ///
    /// Connects immediately when `init` is set or the reference is not lazy,
    /// otherwise parks in `Deferred`. Returns the state reached. A call that
    /// overlaps an ongoing bind waits for it and returns the same state.
    ///
    /// # Errors
    /// - resolution or validation errors
    /// - `ConfigError::InvalidUrl` for an unparseable direct `url` target
    /// - `ConfigError::ProviderUnavailable` when `check` is on and nothing was found
    /// - `ConfigError::Collaborator` if discovery or the proxy factory fails
    /// - `ConfigError::Cancelled` if released meanwhile
    pub async fn bind(&self) -> Result<ReferenceState, ConfigError> {
        let descriptor = self.resolve()?;
        let _guard = self.bind_lock.lock().await;
        self.bind_locked(&descriptor).await
    }

    async fn bind_locked(&self, descriptor: &Arc<Descriptor>) -> Result<ReferenceState, ConfigError> {
        match self.state() {
            ReferenceState::Released => Err(ConfigError::Cancelled),
            ReferenceState::Resolved => self.bind_resolved(descriptor).await,
            state => Ok(state),
        }
    }

    async fn bind_resolved(&self, descriptor: &Arc<Descriptor>) -> Result<ReferenceState, ConfigError> {
        let providers = self.discover(descriptor).await?;
        if providers.is_empty() && descriptor.is_check() && !descriptor.is_injvm() {
            return Err(ConfigError::provider_unavailable(
                descriptor.service_key().to_string(),
            ));
        }

        self.ctx.proxies.create(descriptor).await?;
        let released = {
            let mut inner = self.inner.lock();
            let released = inner.state == ReferenceState::Released;
            if !released {
                inner.state = ReferenceState::Bound;
                inner.providers = providers;
            }
            released
        };
        if released {
            // release() saw no handle yet, so the one just created is ours to drop.
            if let Err(e) = self.ctx.proxies.destroy(descriptor).await {
                tracing::warn!(service = %descriptor.service_key(), error = %e, "destroy after release failed");
            }
            return Err(ConfigError::Cancelled);
        }
        tracing::debug!(service = %descriptor.service_key(), "reference bound");

        if descriptor.is_init() || !descriptor.is_lazy() {
            self.connect(descriptor).await?;
            return Ok(ReferenceState::Connected);
        }

        let mut inner = self.inner.lock();
        if inner.state == ReferenceState::Released {
            return Err(ConfigError::Cancelled);
        }
        inner.state = ReferenceState::Deferred;
        tracing::debug!(service = %descriptor.service_key(), "connection deferred until first call");
        Ok(ReferenceState::Deferred)
    }

    async fn discover(&self, descriptor: &Descriptor) -> Result<Vec<Provider>, ConfigError> {
        // In-process references never dial out, so `url` targets are ignored.
        let direct: Vec<&str> = if descriptor.is_injvm() {
            Vec::new()
        } else {
            descriptor.direct_urls().collect()
        };
        if direct.is_empty() {
            return self
                .ctx
                .directory
                .lookup(&descriptor.service_key())
                .await
                .map_err(ConfigError::from);
        }
        let target = descriptor.service_key();
        direct
            .into_iter()
            .map(|raw| AnnouncementUrl::parse(raw).map(|url| Provider::direct(url, &target)))
            .collect()
    }

    async fn connect(&self, descriptor: &Descriptor) -> Result<(), ConfigError> {
        let providers = self.providers();
        self.ctx.proxies.connect(descriptor, &providers).await?;

        let mut inner = self.inner.lock();
        if inner.state == ReferenceState::Released {
            return Err(ConfigError::Cancelled);
        }
        inner.state = ReferenceState::Connected;
        tracing::info!(
            service = %descriptor.service_key(),
            providers = providers.len(),
            "reference connected"
        );
        Ok(())
    }

    /// Connects a deferred reference on its first outbound call. Binds first when
    /// needed and waits for a bind already in progress; a no-op once connected.
    ///
    /// # Errors
    /// Same as [`ServiceReference::bind`].
    pub async fn on_first_call(&self) -> Result<(), ConfigError> {
        let descriptor = self.resolve()?;
        let _guard = self.bind_lock.lock().await;
        match self.bind_locked(&descriptor).await? {
            // Bound means an earlier connect failed.
            ReferenceState::Deferred | ReferenceState::Bound => self.connect(&descriptor).await,
            _ => Ok(()),
        }
    }

    /// Provider for the next call; `None` until connected or when nothing is
    /// available. Sticky references keep returning the same provider.
    #[must_use]
    pub fn select_provider(&self) -> Option<Provider> {
        let (providers, affinity) = {
            let inner = self.inner.lock();
            if inner.state != ReferenceState::Connected {
                return None;
            }
            (inner.providers.clone(), inner.affinity.clone()?)
        };
        affinity.select(&providers)
    }

    /// Releases the handle. Legal from every state; calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `ConfigError::Collaborator` if the proxy factory fails to destroy the
    /// handle; the reference is released regardless.
    pub async fn release(&self) -> Result<(), ConfigError> {
        let (previous, descriptor) = {
            let mut inner = self.inner.lock();
            if inner.state == ReferenceState::Released {
                return Ok(());
            }
            let previous = inner.state;
            inner.state = ReferenceState::Released;
            inner.providers.clear();
            if let Some(affinity) = &inner.affinity {
                affinity.reset();
            }
            (previous, inner.descriptor.clone())
        };

        let had_handle = matches!(
            previous,
            ReferenceState::Bound | ReferenceState::Deferred | ReferenceState::Connected
        );
        if let (true, Some(descriptor)) = (had_handle, descriptor) {
            self.ctx.proxies.destroy(&descriptor).await?;
            tracing::info!(service = %descriptor.service_key(), "reference released");
        }
        Ok(())
    }
}
