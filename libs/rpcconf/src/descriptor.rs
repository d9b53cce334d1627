//! Resolved, read-only descriptors.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::key::ServiceKey;
use crate::model::{DescriptorKind, Field, Scope, Value};

/// Where a resolved field's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Explicitly set in a fragment of this scope.
    Scope(Scope),
    /// Forced by another field (`lazy` under `sticky`).
    Derived,
    /// Generated at resolution time (`token = "true"`).
    Generated,
}

/// Fallback behaviour carried by `mock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockPolicy {
    Disabled,
    /// `"true"` or `"default"`: the framework's default mock.
    Default,
    /// A named mock implementation.
    Named(String),
}

/// Result-cache strategy carried by `cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Lru,
    ThreadLocal,
    JCache,
}

impl CacheStrategy {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lru" => Some(Self::Lru),
            "threadlocal" => Some(Self::ThreadLocal),
            "jcache" => Some(Self::JCache),
            _ => None,
        }
    }
}

/// When a service export should be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDelay {
    Immediate,
    After(Duration),
    /// Wait for the surrounding container's readiness signal.
    OnReady,
}

/// A fully resolved descriptor for one service or one reference.
///
/// Every field applicable to the kind carries a value (explicit or default),
/// except `interface` which is absent when no scope declared it. Fields not set by
/// any scope have no [`Origin`] and are not announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    kind: DescriptorKind,
    values: BTreeMap<Field, Value>,
    origins: BTreeMap<Field, Origin>,
}

impl Descriptor {
    pub(crate) const fn from_parts(
        kind: DescriptorKind,
        values: BTreeMap<Field, Value>,
        origins: BTreeMap<Field, Origin>,
    ) -> Self {
        Self {
            kind,
            values,
            origins,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.values.get(&field)
    }

    pub fn values(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.values.iter().map(|(f, v)| (*f, v))
    }

    /// Whether some scope (or a derivation rule) set the field.
    #[must_use]
    pub fn is_explicit(&self, field: Field) -> bool {
        self.origins.contains_key(&field)
    }

    #[must_use]
    pub fn origin(&self, field: Field) -> Option<Origin> {
        self.origins.get(&field).copied()
    }

    /// Explicitly set fields with their values, in table order.
    pub fn explicit_values(&self) -> impl Iterator<Item = (Field, &Value)> {
        self.values
            .iter()
            .filter(|(f, _)| self.origins.contains_key(f))
            .map(|(f, v)| (*f, v))
    }

    /// String value of `field`, empty when absent or not a string.
    #[must_use]
    pub fn str(&self, field: Field) -> &str {
        self.get(field).and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn bool(&self, field: Field) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    #[must_use]
    pub fn int(&self, field: Field) -> i32 {
        self.get(field).and_then(Value::as_int).unwrap_or(0)
    }

    #[must_use]
    pub fn list(&self, field: Field) -> &[String] {
        self.get(field).and_then(Value::as_list).unwrap_or_default()
    }

    #[must_use]
    pub fn parameters(&self) -> &[(String, String)] {
        self.get(Field::Parameters)
            .and_then(Value::as_params)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn interface(&self) -> &str {
        self.str(Field::Interface)
    }

    #[must_use]
    pub fn group(&self) -> &str {
        self.str(Field::Group)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        self.str(Field::Version)
    }

    #[must_use]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.interface(), self.group(), self.version())
    }

    /// Export path: the `path` override, or the interface identity.
    #[must_use]
    pub fn path(&self) -> &str {
        match self.str(Field::Path) {
            "" => self.interface(),
            path => path,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.int(Field::Timeout)).unwrap_or(0))
    }

    #[must_use]
    pub fn retries(&self) -> i32 {
        self.int(Field::Retries)
    }

    /// Total invocation attempts: one plus the retries. `-1` and `0` both mean a
    /// single attempt.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.retries()).map_or(1, |r| r.saturating_add(1))
    }

    #[must_use]
    pub fn connections(&self) -> i32 {
        self.int(Field::Connections)
    }

    #[must_use]
    pub fn actives(&self) -> i32 {
        self.int(Field::Actives)
    }

    #[must_use]
    pub fn protocols(&self) -> &[String] {
        self.list(Field::Protocol)
    }

    #[must_use]
    pub fn registries(&self) -> &[String] {
        self.list(Field::Registry)
    }

    #[must_use]
    pub fn filters(&self) -> &[String] {
        self.list(Field::Filter)
    }

    #[must_use]
    pub fn listeners(&self) -> &[String] {
        self.list(Field::Listener)
    }

    #[must_use]
    pub fn export_delay(&self) -> ExportDelay {
        match self.int(Field::Delay) {
            -1 => ExportDelay::OnReady,
            ms if ms > 0 => ExportDelay::After(Duration::from_millis(u64::from(ms.unsigned_abs()))),
            _ => ExportDelay::Immediate,
        }
    }

    #[must_use]
    pub fn is_export_enabled(&self) -> bool {
        self.kind == DescriptorKind::Service && self.bool(Field::Export)
    }

    #[must_use]
    pub fn is_register_enabled(&self) -> bool {
        self.bool(Field::Register)
    }

    /// The access token, `None` when token checking is disabled.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self.str(Field::Token) {
            "" => None,
            token => Some(token),
        }
    }

    #[must_use]
    pub fn is_token_generated(&self) -> bool {
        self.origin(Field::Token) == Some(Origin::Generated)
    }

    /// Effective `lazy`: already forced to `true` by resolution when `sticky` is on.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.bool(Field::Lazy)
    }

    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.bool(Field::Sticky)
    }

    #[must_use]
    pub fn is_check(&self) -> bool {
        self.bool(Field::Check)
    }

    #[must_use]
    pub fn is_init(&self) -> bool {
        self.bool(Field::Init)
    }

    #[must_use]
    pub fn is_injvm(&self) -> bool {
        self.bool(Field::Injvm)
    }

    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.bool(Field::Generic)
    }

    /// Direct targets from `url`, split on `;`.
    pub fn direct_urls(&self) -> impl Iterator<Item = &str> {
        self.str(Field::Url)
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn mock_policy(&self) -> MockPolicy {
        match self.str(Field::Mock) {
            "" | "false" => MockPolicy::Disabled,
            "true" | "default" => MockPolicy::Default,
            name => MockPolicy::Named(name.to_owned()),
        }
    }

    #[must_use]
    pub fn cache_strategy(&self) -> Option<CacheStrategy> {
        CacheStrategy::from_name(self.str(Field::Cache))
    }

    /// JSON object keyed by wire name; all values, or only explicit ones.
    #[must_use]
    pub fn to_json(&self, explicit_only: bool) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .filter(|(f, _)| !explicit_only || self.origins.contains_key(f))
            .map(|(f, v)| (f.name().to_owned(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn descriptor(kind: DescriptorKind, pairs: &[(Field, Value)]) -> Descriptor {
        let values: BTreeMap<_, _> = pairs.iter().cloned().collect();
        let origins = values
            .keys()
            .map(|f| (*f, Origin::Scope(Scope::Service)))
            .collect();
        Descriptor::from_parts(kind, values, origins)
    }

    #[test]
    fn test_path_falls_back_to_interface() {
        let d = descriptor(
            DescriptorKind::Service,
            &[(Field::Interface, Value::from("com.example.Echo"))],
        );
        assert_eq!(d.path(), "com.example.Echo");

        let d = descriptor(
            DescriptorKind::Service,
            &[
                (Field::Interface, Value::from("com.example.Echo")),
                (Field::Path, Value::from("echo")),
            ],
        );
        assert_eq!(d.path(), "echo");
    }

    #[test]
    fn test_retry_sentinels_mean_single_attempt() {
        for (retries, attempts) in [(-1, 1), (0, 1), (2, 3)] {
            let d = descriptor(DescriptorKind::Reference, &[(Field::Retries, Value::Int(retries))]);
            assert_eq!(d.max_attempts(), attempts, "retries={retries}");
        }
    }

    #[test]
    fn test_export_delay_sentinels() {
        let cases = [
            (-1, ExportDelay::OnReady),
            (0, ExportDelay::Immediate),
            (250, ExportDelay::After(Duration::from_millis(250))),
        ];
        for (delay, expected) in cases {
            let d = descriptor(DescriptorKind::Service, &[(Field::Delay, Value::Int(delay))]);
            assert_eq!(d.export_delay(), expected);
        }
    }

    #[test]
    fn test_mock_policy() {
        let policy = |mock: &str| {
            descriptor(DescriptorKind::Reference, &[(Field::Mock, Value::from(mock))]).mock_policy()
        };
        assert_eq!(policy(""), MockPolicy::Disabled);
        assert_eq!(policy("true"), MockPolicy::Default);
        assert_eq!(policy("default"), MockPolicy::Default);
        assert_eq!(
            policy("com.example.EchoMock"),
            MockPolicy::Named("com.example.EchoMock".to_owned())
        );
    }

    #[test]
    fn test_direct_urls_split() {
        let d = descriptor(
            DescriptorKind::Reference,
            &[(Field::Url, Value::from("dubbo://a:1; dubbo://b:2;"))],
        );
        let urls: Vec<_> = d.direct_urls().collect();
        assert_eq!(urls, vec!["dubbo://a:1", "dubbo://b:2"]);
    }

    #[test]
    fn test_to_json_explicit_only() {
        let mut values = BTreeMap::new();
        values.insert(Field::Interface, Value::from("com.example.Echo"));
        values.insert(Field::Timeout, Value::Int(1000));
        let mut origins = BTreeMap::new();
        origins.insert(Field::Interface, Origin::Scope(Scope::Service));
        let d = Descriptor::from_parts(DescriptorKind::Service, values, origins);

        let all = d.to_json(false);
        assert_eq!(all["timeout"], 1000);
        let explicit = d.to_json(true);
        assert!(explicit.get("timeout").is_none());
        assert_eq!(explicit["interface"], "com.example.Echo");
    }
}
