//! Turns a loaded [`AppConfig`] into scope chains and protocol bindings.
//!
//! Service chain: `service -> provider -> module -> application -> protocol`.
//! Reference chain: `reference -> consumer -> module -> application -> protocol`,
//! followed by the first declared service whose key the reference's
//! interface, group and version match (stands in for the provider's announced
//! values).

use anyhow::{Context, Result};
use rpcconf::{Field, Fragment, Scope, ScopeChain, ServiceKey, Value};
use rpcconf_runtime::{DEFAULT_HOST, Endpoint, ProtocolBindings, default_port};

use crate::config::{AppConfig, ConfigProvider, SectionError, fragment_or_empty, fragment_required};

/// Shared scope fragments, loaded once per plan.
struct SharedScopes {
    application: Fragment,
    module: Fragment,
    provider: Fragment,
    consumer: Fragment,
    protocol: Fragment,
}

impl SharedScopes {
    fn load(provider: &dyn ConfigProvider, strict: bool) -> Result<Self, SectionError> {
        let application = if strict {
            fragment_required(provider, Scope::Application)?
        } else {
            fragment_or_empty(provider, Scope::Application)?
        };
        Ok(Self {
            application,
            module: fragment_or_empty(provider, Scope::Module)?,
            provider: fragment_or_empty(provider, Scope::Provider)?,
            consumer: fragment_or_empty(provider, Scope::Consumer)?,
            protocol: fragment_or_empty(provider, Scope::Protocol)?,
        })
    }
}

/// Declarations named by their position in the file, e.g. `services[0]`.
#[derive(Debug, Clone)]
pub struct Declared {
    pub name: String,
    pub chain: ScopeChain,
}

/// Everything the commands need: chains plus protocol bindings.
#[derive(Debug, Clone)]
pub struct Plan {
    pub services: Vec<Declared>,
    pub references: Vec<Declared>,
    pub bindings: ProtocolBindings,
    pub host: String,
}

impl Plan {
    /// Builds the plan. With `strict`, the `application` section is required.
    ///
    /// # Errors
    /// Returns an error naming the offending section or declaration.
    pub fn build(config: &AppConfig, host: Option<&str>, strict: bool) -> Result<Self> {
        let shared = SharedScopes::load(config, strict)?;

        let service_locals = config
            .services
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                Fragment::from_json(Scope::Service, raw)
                    .with_context(|| format!("invalid declaration services[{i}]"))
            })
            .collect::<Result<Vec<_>>>()?;

        let services = service_locals
            .iter()
            .enumerate()
            .map(|(i, local)| Declared {
                name: format!("services[{i}]"),
                chain: ScopeChain::service(local.clone())
                    .then(shared.provider.clone())
                    .then(shared.module.clone())
                    .then(shared.application.clone())
                    .then(shared.protocol.clone()),
            })
            .collect();

        let mut references = Vec::with_capacity(config.references.len());
        for (i, raw) in config.references.iter().enumerate() {
            let local = Fragment::from_json(Scope::Reference, raw)
                .with_context(|| format!("invalid declaration references[{i}]"))?;
            let announced = matching_service(&service_locals, &local, &shared).cloned();
            references.push(Declared {
                name: format!("references[{i}]"),
                chain: ScopeChain::reference(local)
                    .then(shared.consumer.clone())
                    .then(shared.module.clone())
                    .then(shared.application.clone())
                    .then(shared.protocol.clone())
                    .then_some(announced),
            });
        }

        let host = host.unwrap_or(DEFAULT_HOST).to_owned();
        let bindings = config
            .protocols
            .iter()
            .fold(ProtocolBindings::new(host.as_str()), |bindings, (name, p)| {
                let endpoint = Endpoint::new(
                    p.host.as_deref().unwrap_or(&host),
                    p.port.unwrap_or_else(|| default_port(name)),
                );
                bindings.bind(name.as_str(), endpoint)
            });

        Ok(Self {
            services,
            references,
            bindings,
            host,
        })
    }
}

/// Key declared by the first fragment setting each identity field.
fn declared_key(fragments: &[&Fragment]) -> Option<ServiceKey> {
    let text = |field| {
        fragments
            .iter()
            .find_map(|f| f.get(field).and_then(Value::as_str))
            .unwrap_or_default()
    };
    let interface = text(Field::Interface);
    if interface.is_empty() {
        return None;
    }
    Some(ServiceKey::new(interface, text(Field::Group), text(Field::Version)))
}

fn matching_service<'a>(
    services: &'a [Fragment],
    reference: &Fragment,
    shared: &SharedScopes,
) -> Option<&'a Fragment> {
    let wanted = declared_key(&[reference, &shared.consumer, &shared.module, &shared.application])?;
    services.iter().find(|service| {
        declared_key(&[service, &shared.provider, &shared.module, &shared.application])
            .is_some_and(|key| wanted.matches(&key))
    })
}
