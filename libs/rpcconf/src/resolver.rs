//! Cascade resolution of a scope chain into one descriptor.
//!
//! For each field applicable to the chain's descriptor kind the resolver takes the
//! value of the first fragment (most specific first) that explicitly sets it, or the
//! field's documented default when no fragment does. A small override table changes
//! that order for individual fields, and three rules run after the cascade:
//!
//! - `sticky = true` in any fragment forces `lazy = true`, even when a more
//!   specific fragment turns stickiness off;
//! - `token = "true"` is replaced by a freshly generated credential;
//! - duplicate `registry` ids are dropped, keeping the first occurrence.

use std::collections::BTreeMap;

use crate::descriptor::{Descriptor, Origin};
use crate::error::ConfigError;
use crate::fragment::{Fragment, ScopeChain};
use crate::model::{DescriptorKind, Field, Side, Value};
use crate::validator;

/// `token` value that asks for a generated credential.
pub const GENERATE_TOKEN: &str = "true";

/// Per-field lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Chain order: most specific fragment first.
    ChainOrder,
    /// Consumer-side scopes first, then the rest in chain order.
    ConsumerFirst,
}

/// Fields whose precedence differs from chain order.
#[must_use]
pub const fn precedence(field: Field) -> Precedence {
    match field {
        Field::Connections | Field::Actives => Precedence::ConsumerFirst,
        _ => Precedence::ChainOrder,
    }
}

/// Resolves scope chains. Holds only the token generator, so one instance can be
/// shared across threads.
#[derive(Clone, Copy)]
pub struct Resolver {
    generate_token: fn() -> String,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Resolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generate_token: random_token,
        }
    }

    /// Replaces the credential generator used for `token = "true"`.
    #[must_use]
    pub fn with_token_generator(mut self, generate: fn() -> String) -> Self {
        self.generate_token = generate;
        self
    }

    /// Resolves a chain without validating the result.
    #[must_use]
    pub fn resolve(&self, chain: &ScopeChain) -> Descriptor {
        let kind = chain.kind();
        let mut values = BTreeMap::new();
        let mut origins = BTreeMap::new();

        for &field in Field::ALL {
            if !field.applies_to(kind) {
                continue;
            }
            if let Some((value, fragment)) = lookup(chain.fragments(), field) {
                values.insert(field, value.clone());
                origins.insert(field, Origin::Scope(fragment.scope()));
            } else if let Some(default) = field.default_value().to_value() {
                values.insert(field, default);
            }
        }

        if kind == DescriptorKind::Reference {
            force_lazy_when_sticky(chain.fragments(), &mut values, &mut origins);
        } else {
            self.generate_token_if_requested(&mut values, &mut origins);
        }
        dedup_registries(&mut values);

        let descriptor = Descriptor::from_parts(kind, values, origins);
        tracing::debug!(
            kind = %kind,
            interface = descriptor.interface(),
            explicit = descriptor.explicit_values().count(),
            "resolved descriptor"
        );
        descriptor
    }

    /// Resolves a chain and validates the result.
    ///
    /// # Errors
    /// Returns the first validation failure, see [`validator::validate`].
    pub fn resolve_validated(&self, chain: &ScopeChain) -> Result<Descriptor, ConfigError> {
        let descriptor = self.resolve(chain);
        validator::validate(&descriptor)?;
        Ok(descriptor)
    }

    fn generate_token_if_requested(
        &self,
        values: &mut BTreeMap<Field, Value>,
        origins: &mut BTreeMap<Field, Origin>,
    ) {
        if values.get(&Field::Token).and_then(Value::as_str) == Some(GENERATE_TOKEN) {
            values.insert(Field::Token, Value::Str((self.generate_token)()));
            origins.insert(Field::Token, Origin::Generated);
        }
    }
}

fn lookup(fragments: &[Fragment], field: Field) -> Option<(&Value, &Fragment)> {
    let set_in = |f: &&Fragment| f.is_set(field);
    let found = match precedence(field) {
        Precedence::ChainOrder => fragments.iter().find(set_in),
        Precedence::ConsumerFirst => fragments
            .iter()
            .filter(|f| f.scope().side() == Some(Side::Consumer))
            .find(set_in)
            .or_else(|| {
                fragments
                    .iter()
                    .filter(|f| f.scope().side() != Some(Side::Consumer))
                    .find(set_in)
            }),
    }?;
    found.get(field).map(|v| (v, found))
}

fn force_lazy_when_sticky(
    fragments: &[Fragment],
    values: &mut BTreeMap<Field, Value>,
    origins: &mut BTreeMap<Field, Origin>,
) {
    let sticky = Some(&Value::Bool(true));
    if values.get(&Field::Sticky) != sticky
        && !fragments.iter().any(|f| f.get(Field::Sticky) == sticky)
    {
        return;
    }
    if values.get(&Field::Lazy) != Some(&Value::Bool(true)) {
        values.insert(Field::Lazy, Value::Bool(true));
        origins.insert(Field::Lazy, Origin::Derived);
    }
}

fn dedup_registries(values: &mut BTreeMap<Field, Value>) {
    if let Some(Value::List(ids)) = values.get_mut(&Field::Registry) {
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
    }
}

/// Resolves with the default resolver.
#[must_use]
pub fn resolve(chain: &ScopeChain) -> Descriptor {
    Resolver::new().resolve(chain)
}

/// Resolves and validates with the default resolver.
///
/// # Errors
/// Returns the first validation failure.
pub fn resolve_validated(chain: &ScopeChain) -> Result<Descriptor, ConfigError> {
    Resolver::new().resolve_validated(chain)
}
