#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Runtime side of rpcconf: the export key registry and the export/reference
//! lifecycles that drive resolved descriptors into registries and proxies.
//!
//! Network transport, registry clients and proxy generation stay outside; they
//! plug in through [`RegistryPublisher`], [`ProviderDirectory`] and
//! [`ProxyFactory`].

pub mod affinity;
pub mod directory;
pub mod export;
pub mod publisher;
pub mod readiness;
pub mod reference;
pub mod registry;

pub use affinity::StickyAffinity;
pub use directory::{LocalProviderDirectory, Provider, ProviderDirectory};
pub use export::{
    DEFAULT_HOST, Endpoint, ExportContext, ExportOutcome, ExportState, ProtocolBindings,
    ServiceExport, default_port,
};
pub use publisher::{LogPublisher, RegistryPublisher};
pub use readiness::ReadinessSignal;
pub use reference::{
    LogProxyFactory, ProxyFactory, ReferenceContext, ReferenceState, ServiceReference,
};
pub use registry::{ExportRegistry, ExportedService, Registration};
