//! Partial descriptors and the ordered scope chain they are resolved from.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::model::{DescriptorKind, Field, FieldType, Scope, Value};

/// A partial set of field values declared in one scope.
///
/// Presence of a field in the fragment is the "explicitly set" marker: a field set
/// to `0` or `false` is distinct from a field that was never set. Building a
/// fragment never validates values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    scope: Scope,
    values: BTreeMap<Field, Value>,
}

impl Fragment {
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.values.insert(field, value.into());
    }

    pub fn unset(&mut self, field: Field) -> Option<Value> {
        self.values.remove(&field)
    }

    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.values.get(&field)
    }

    #[must_use]
    pub fn is_set(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.values.iter().map(|(f, v)| (*f, v))
    }

    /// Builds a fragment from a configuration section.
    ///
    /// The section is an object keyed by wire name. JSON `null` leaves a field
    /// unset. Values are converted towards the field's type where the
    /// conversion is lossless (numeric strings for ints, comma strings for lists,
    /// objects for parameters); anything else is kept as a string so the
    /// validator can report it.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidField` if the section is not an object or names
    /// an unknown field.
    pub fn from_json(scope: Scope, section: &serde_json::Value) -> Result<Self, ConfigError> {
        let obj = section.as_object().ok_or_else(|| {
            ConfigError::invalid_field(scope.to_string(), "scope section must be an object")
        })?;

        let mut fragment = Self::new(scope);
        for (key, raw) in obj {
            let field = Field::from_name(key)
                .ok_or_else(|| ConfigError::invalid_field(key.as_str(), "unknown field"))?;
            if raw.is_null() {
                continue;
            }
            fragment.set(field, value_from_json(field.field_type(), raw));
        }
        Ok(fragment)
    }
}

fn value_from_json(ty: FieldType, raw: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match (ty, raw) {
        (FieldType::Str, Json::String(s)) => Value::Str(s.clone()),
        (FieldType::Str, Json::Number(n)) => Value::Str(n.to_string()),
        (FieldType::Str, Json::Bool(b)) => Value::Str(b.to_string()),
        (FieldType::Bool, Json::Bool(b)) => Value::Bool(*b),
        (FieldType::Int, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map_or_else(|| Value::Str(n.to_string()), Value::Int),
        (FieldType::List, Json::Array(items)) => {
            Value::List(items.iter().map(scalar_text).collect())
        }
        (FieldType::Params, Json::Object(map)) => Value::Params(
            map.iter()
                .map(|(k, v)| (k.clone(), scalar_text(v)))
                .collect(),
        ),
        (FieldType::Params, Json::Array(items)) => {
            let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(",");
            Value::decode(FieldType::Params, &joined).unwrap_or(Value::Str(joined))
        }
        (_, Json::String(s)) => Value::decode(ty, s).unwrap_or_else(|_| Value::Str(s.clone())),
        (_, other) => Value::Str(other.to_string()),
    }
}

fn scalar_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fragments for one descriptor, most specific first.
///
/// A service chain is typically `[service, provider, module, application,
/// protocol]`; a reference chain `[reference, consumer, module, application,
/// protocol]`, optionally followed by the matching service's announced values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChain {
    kind: DescriptorKind,
    fragments: Vec<Fragment>,
}

impl ScopeChain {
    #[must_use]
    pub const fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            fragments: Vec::new(),
        }
    }

    /// Chain for a service, starting from its own declaration.
    #[must_use]
    pub fn service(local: Fragment) -> Self {
        Self::new(DescriptorKind::Service).then(local)
    }

    /// Chain for a reference, starting from its own declaration.
    #[must_use]
    pub fn reference(local: Fragment) -> Self {
        Self::new(DescriptorKind::Reference).then(local)
    }

    /// Appends a less specific fragment.
    #[must_use]
    pub fn then(mut self, fragment: Fragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    /// Appends a less specific fragment if one is present.
    #[must_use]
    pub fn then_some(self, fragment: Option<Fragment>) -> Self {
        match fragment {
            Some(f) => self.then(f),
            None => self,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}
