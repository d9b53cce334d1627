//! Subcommand implementations. Output is written to the given writer so the
//! binary prints to stdout and tests capture into a buffer.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use rpcconf::{AnnouncementUrl, Descriptor, ExportKey, Resolver};
use rpcconf_runtime::{
    ExportContext, ExportOutcome, ExportRegistry, LocalProviderDirectory, LogProxyFactory,
    ReadinessSignal, ReferenceContext, ServiceExport, ServiceReference,
};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::plan::{Declared, Plan};

fn resolve_all<'a>(
    resolver: &Resolver,
    declared: &'a [Declared],
) -> Result<Vec<(&'a str, Descriptor)>> {
    declared
        .iter()
        .map(|d| {
            resolver
                .resolve_validated(&d.chain)
                .map(|descriptor| (d.name.as_str(), descriptor))
                .with_context(|| format!("{} does not resolve", d.name))
        })
        .collect()
}

/// Prints every resolved descriptor as pretty JSON.
///
/// # Errors
/// Fails on the first declaration that does not resolve.
pub fn resolve(plan: &Plan, explicit_only: bool, out: &mut impl Write) -> Result<()> {
    let resolver = Resolver::new();
    let render = |resolved: Vec<(&str, Descriptor)>| -> Vec<serde_json::Value> {
        resolved
            .into_iter()
            .map(|(_, d)| d.to_json(explicit_only))
            .collect()
    };
    let doc = serde_json::json!({
        "services": render(resolve_all(&resolver, &plan.services)?),
        "references": render(resolve_all(&resolver, &plan.references)?),
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

/// Prints one announcement URL per service protocol and registry, then one
/// consumer URL per reference. Registry ids prefix the URL when configured.
///
/// # Errors
/// Fails on the first declaration that does not resolve.
pub fn urls(plan: &Plan, out: &mut impl Write) -> Result<()> {
    let resolver = Resolver::new();
    for (_, d) in resolve_all(&resolver, &plan.services)? {
        if !d.is_export_enabled() {
            continue;
        }
        for protocol in d.protocols() {
            let endpoint = plan.bindings.endpoint(protocol);
            let url = AnnouncementUrl::for_service(&d, protocol, &endpoint.host, endpoint.port)?;
            if d.registries().is_empty() {
                writeln!(out, "{url}")?;
            }
            for registry in d.registries() {
                writeln!(out, "{registry} {url}")?;
            }
        }
    }
    for (_, d) in resolve_all(&resolver, &plan.references)? {
        writeln!(out, "{}", AnnouncementUrl::for_reference(&d, &plan.host))?;
    }
    Ok(())
}

/// Resolves and validates everything, then registers every service into a
/// scratch registry so conflicting declarations in one file are caught.
///
/// # Errors
/// Fails on the first invalid or conflicting declaration.
pub fn check(plan: &Plan, out: &mut impl Write) -> Result<()> {
    let resolver = Resolver::new();
    let services = resolve_all(&resolver, &plan.services)?;
    let references = resolve_all(&resolver, &plan.references)?;

    let registry = ExportRegistry::new();
    for (name, d) in &services {
        let owner = Uuid::new_v4();
        let descriptor = Arc::new(d.clone());
        for protocol in d.protocols() {
            let key = ExportKey::new(d.service_key(), protocol.as_str());
            if d.is_export_enabled() {
                let endpoint = plan.bindings.endpoint(protocol);
                let url = AnnouncementUrl::for_service(d, protocol, &endpoint.host, endpoint.port)?;
                registry
                    .register(key, owner, Arc::clone(&descriptor), url)
                    .with_context(|| format!("{name} conflicts with an earlier service"))?;
            } else {
                registry
                    .ensure_not_exported(&key, owner)
                    .with_context(|| format!("{name} disables an exported service"))?;
            }
        }
    }

    tracing::info!(services = services.len(), references = references.len(), "configuration is valid");
    writeln!(
        out,
        "OK: {} service(s), {} reference(s)",
        services.len(),
        references.len()
    )?;
    Ok(())
}

/// Exports every service and binds every reference in-process, waits for
/// `shutdown`, then releases references and unexports services.
///
/// Readiness is signalled once all exports have been started, so `delay = -1`
/// services export right after the immediate ones.
///
/// # Errors
/// Fails if an export or bind fails; everything already set up is torn down first.
pub async fn run(plan: &Plan, shutdown: impl Future<Output = ()>) -> Result<()> {
    let registry = Arc::new(ExportRegistry::new());
    let readiness = ReadinessSignal::new();
    let export_ctx = ExportContext::new(Arc::clone(&registry))
        .with_readiness(readiness.clone())
        .with_bindings(plan.bindings.clone());
    let reference_ctx = ReferenceContext::new(Arc::new(LocalProviderDirectory::new(Arc::clone(
        &registry,
    ))))
    .with_proxy_factory(Arc::new(LogProxyFactory));

    let exports: Vec<Arc<ServiceExport>> = plan
        .services
        .iter()
        .map(|d| Arc::new(ServiceExport::new(d.chain.clone(), export_ctx.clone())))
        .collect();
    let references: Vec<ServiceReference> = plan
        .references
        .iter()
        .map(|d| ServiceReference::new(d.chain.clone(), reference_ctx.clone()))
        .collect();

    let outcome = start(&exports, &references, &readiness).await;
    if outcome.is_ok() {
        tracing::info!(
            exported = registry.len(),
            references = references.len(),
            "all services up, waiting for shutdown"
        );
        shutdown.await;
    }

    for reference in &references {
        if let Err(e) = reference.release().await {
            tracing::warn!(error = %e, "release failed");
        }
    }
    for export in &exports {
        if let Err(e) = export.unexport().await {
            tracing::warn!(error = %e, "unexport failed");
        }
    }
    tracing::info!("shutdown complete");
    outcome
}

async fn start(
    exports: &[Arc<ServiceExport>],
    references: &[ServiceReference],
    readiness: &ReadinessSignal,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for export in exports {
        let export = Arc::clone(export);
        tasks.spawn(async move { export.export().await });
    }
    readiness.mark_ready();

    while let Some(joined) = tasks.join_next().await {
        match joined.context("export task panicked")?? {
            ExportOutcome::Exported | ExportOutcome::AlreadyExported => {}
            ExportOutcome::Disabled => tracing::debug!("service export disabled"),
        }
    }
    for reference in references {
        reference.bind().await?;
    }
    Ok(())
}
