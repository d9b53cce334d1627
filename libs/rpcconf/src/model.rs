//! Canonical field table, value representation and scope identities.
//!
//! Every configurable option of a service or reference descriptor is one [`Field`].
//! The table below is the single source of truth for a field's wire name, value
//! type, which descriptor kinds it applies to, and its documented default.

use std::fmt;

/// Which side of a remote call a descriptor configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    /// An exported service (provider side).
    Service,
    /// A consumer reference to a remote service.
    Reference,
}

impl DescriptorKind {
    /// Value of the `side` announcement parameter.
    #[must_use]
    pub const fn side(self) -> &'static str {
        match self {
            Self::Service => "provider",
            Self::Reference => "consumer",
        }
    }

    #[must_use]
    pub fn from_side(side: &str) -> Option<Self> {
        match side {
            "provider" => Some(Self::Service),
            "consumer" => Some(Self::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

/// Configuration scope a fragment was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The service declaration itself.
    Service,
    /// The reference declaration itself.
    Reference,
    /// Provider-wide defaults.
    Provider,
    /// Consumer-wide defaults.
    Consumer,
    /// Module defaults.
    Module,
    /// Application defaults.
    Application,
    /// Protocol or global defaults.
    Protocol,
}

/// The side of a call a scope belongs to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Provider,
    Consumer,
}

impl Scope {
    #[must_use]
    pub const fn side(self) -> Option<Side> {
        match self {
            Self::Service | Self::Provider => Some(Side::Provider),
            Self::Reference | Self::Consumer => Some(Side::Consumer),
            Self::Module | Self::Application | Self::Protocol => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Service => "service",
            Self::Reference => "reference",
            Self::Provider => "provider",
            Self::Consumer => "consumer",
            Self::Module => "module",
            Self::Application => "application",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Semantic type of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Bool,
    Int,
    /// Ordered sequence of names, comma-joined on the wire.
    List,
    /// Ordered `key=value` passthrough pairs.
    Params,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::List => "list",
            Self::Params => "key=value list",
        };
        f.write_str(name)
    }
}

/// Descriptor kinds a field is meaningful for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Common,
    ServiceOnly,
    ReferenceOnly,
}

impl Applicability {
    #[must_use]
    pub const fn applies_to(self, kind: DescriptorKind) -> bool {
        match self {
            Self::Common => true,
            Self::ServiceOnly => matches!(kind, DescriptorKind::Service),
            Self::ReferenceOnly => matches!(kind, DescriptorKind::Reference),
        }
    }
}

/// Documented default of a field, used when no scope sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// No default; the field stays absent (only `interface`).
    Absent,
    Str(&'static str),
    Bool(bool),
    Int(i32),
    List(&'static [&'static str]),
    Params,
}

impl DefaultValue {
    #[must_use]
    pub fn to_value(self) -> Option<Value> {
        match self {
            Self::Absent => None,
            Self::Str(s) => Some(Value::Str(s.to_owned())),
            Self::Bool(b) => Some(Value::Bool(b)),
            Self::Int(i) => Some(Value::Int(i)),
            Self::List(items) => Some(Value::List(
                items.iter().map(|s| (*s).to_owned()).collect(),
            )),
            Self::Params => Some(Value::Params(Vec::new())),
        }
    }
}

macro_rules! field_table {
    ($( $(#[$doc:meta])* $variant:ident => $name:literal, $ty:ident, $applies:ident, $default:expr; )*) => {
        /// A configurable descriptor option.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Field {
            $( $(#[$doc])* $variant, )*
        }

        impl Field {
            /// Every field, in table order.
            pub const ALL: &'static [Field] = &[ $( Field::$variant, )* ];

            /// Declared wire name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self { $( Field::$variant => $name, )* }
            }

            #[must_use]
            pub const fn field_type(self) -> FieldType {
                match self { $( Field::$variant => FieldType::$ty, )* }
            }

            #[must_use]
            pub const fn applicability(self) -> Applicability {
                match self { $( Field::$variant => Applicability::$applies, )* }
            }

            #[must_use]
            pub const fn default_value(self) -> DefaultValue {
                match self { $( Field::$variant => $default, )* }
            }

            /// Looks a field up by its wire name.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Field> {
                match name {
                    $( $name => Some(Field::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

field_table! {
    /// Remote contract identity.
    Interface => "interface", Str, Common, DefaultValue::Absent;
    Version => "version", Str, Common, DefaultValue::Str("");
    Group => "group", Str, Common, DefaultValue::Str("");
    /// Fault-tolerance strategy name.
    Cluster => "cluster", Str, Common, DefaultValue::Str("failover");
    Loadbalance => "loadbalance", Str, Common, DefaultValue::Str("random");
    Retries => "retries", Int, Common, DefaultValue::Int(2);
    /// Per-call timeout in milliseconds.
    Timeout => "timeout", Int, Common, DefaultValue::Int(1000);
    Connections => "connections", Int, Common, DefaultValue::Int(0);
    Actives => "actives", Int, Common, DefaultValue::Int(0);
    Callbacks => "callbacks", Int, Common, DefaultValue::Int(1);
    Async => "async", Bool, Common, DefaultValue::Bool(false);
    Sent => "sent", Bool, Common, DefaultValue::Bool(false);
    Mock => "mock", Str, Common, DefaultValue::Str("");
    Validation => "validation", Str, Common, DefaultValue::Str("");
    Cache => "cache", Str, Common, DefaultValue::Str("");
    Filter => "filter", List, Common, DefaultValue::List(&[]);
    Listener => "listener", List, Common, DefaultValue::List(&[]);
    Parameters => "parameters", Params, Common, DefaultValue::Params;
    Application => "application", Str, Common, DefaultValue::Str("");
    Module => "module", Str, Common, DefaultValue::Str("");
    Monitor => "monitor", Str, Common, DefaultValue::Str("");
    Registry => "registry", List, Common, DefaultValue::List(&[]);
    Owner => "owner", Str, Common, DefaultValue::Str("");
    Layer => "layer", Str, Common, DefaultValue::Str("");
    Document => "document", Str, Common, DefaultValue::Str("");
    Onconnect => "onconnect", Str, Common, DefaultValue::Str("");
    Ondisconnect => "ondisconnect", Str, Common, DefaultValue::Str("");
    Proxy => "proxy", Str, Common, DefaultValue::Str("");
    Stub => "stub", Str, Common, DefaultValue::Str("");

    /// Export path override; empty means the interface identity.
    Path => "path", Str, ServiceOnly, DefaultValue::Str("");
    Export => "export", Bool, ServiceOnly, DefaultValue::Bool(true);
    Token => "token", Str, ServiceOnly, DefaultValue::Str("");
    Weight => "weight", Int, ServiceOnly, DefaultValue::Int(100);
    /// `-1` waits for readiness, `0` exports now, `>0` delays by that many ms.
    Delay => "delay", Int, ServiceOnly, DefaultValue::Int(0);
    Executes => "executes", Int, ServiceOnly, DefaultValue::Int(0);
    Accesslog => "accesslog", Str, ServiceOnly, DefaultValue::Str("");
    Deprecated => "deprecated", Bool, ServiceOnly, DefaultValue::Bool(false);
    Dynamic => "dynamic", Bool, ServiceOnly, DefaultValue::Bool(true);
    Register => "register", Bool, ServiceOnly, DefaultValue::Bool(true);
    Protocol => "protocol", List, ServiceOnly, DefaultValue::List(&["dubbo"]);
    Local => "local", Str, ServiceOnly, DefaultValue::Str("");
    Provider => "provider", Str, ServiceOnly, DefaultValue::Str("");

    /// Direct point-to-point targets, `;`-separated.
    Url => "url", Str, ReferenceOnly, DefaultValue::Str("");
    Generic => "generic", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Injvm => "injvm", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Check => "check", Bool, ReferenceOnly, DefaultValue::Bool(true);
    Init => "init", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Lazy => "lazy", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Sticky => "sticky", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Reconnect => "reconnect", Str, ReferenceOnly, DefaultValue::Str("");
    Client => "client", Str, ReferenceOnly, DefaultValue::Str("");
    Stubevent => "stubevent", Bool, ReferenceOnly, DefaultValue::Bool(false);
    Consumer => "consumer", Str, ReferenceOnly, DefaultValue::Str("");
}

impl Field {
    #[must_use]
    pub const fn applies_to(self, kind: DescriptorKind) -> bool {
        self.applicability().applies_to(kind)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A field value as declared in a fragment.
///
/// Values are stored untyped-by-field: a fragment may hold a value whose shape does
/// not match the field's [`FieldType`]. The validator reports that mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i32),
    List(Vec<String>),
    Params(Vec<(String, String)>),
}

impl Value {
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn params<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Params(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether the value's shape matches `ty`.
    #[must_use]
    pub const fn has_type(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Self::Str(_), FieldType::Str)
                | (Self::Bool(_), FieldType::Bool)
                | (Self::Int(_), FieldType::Int)
                | (Self::List(_), FieldType::List)
                | (Self::Params(_), FieldType::Params)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_params(&self) -> Option<&[(String, String)]> {
        match self {
            Self::Params(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Wire text of a scalar or list value. Params are flattened by the
    /// announcement encoder instead and encode to their `k=v` list here.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::List(items) => items.join(","),
            Self::Params(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Parses wire text for a field of type `ty`.
    ///
    /// # Errors
    /// Returns a human-readable reason when `raw` is not a valid `ty` literal.
    pub fn decode(ty: FieldType, raw: &str) -> Result<Self, String> {
        match ty {
            FieldType::Str => Ok(Self::Str(raw.to_owned())),
            FieldType::Bool => match raw {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                other => Err(format!("expected true or false, got '{other}'")),
            },
            FieldType::Int => raw
                .trim()
                .parse::<i32>()
                .map(Self::Int)
                .map_err(|e| format!("expected an integer, got '{raw}': {e}")),
            FieldType::List => Ok(Self::List(split_list(raw))),
            FieldType::Params => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
                        .ok_or_else(|| format!("expected key=value, got '{pair}'"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Params),
        }
    }

    /// JSON rendering used by descriptor dumps.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::List(items) => serde_json::Value::from(items.clone()),
            Self::Params(pairs) => serde_json::Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Self::list(items)
    }
}

impl<const N: usize> From<[&str; N]> for Value {
    fn from(items: [&str; N]) -> Self {
        Self::list(items)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_name_round_trips() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(*field));
        }
        assert_eq!(Field::from_name("nope"), None);
    }

    #[test]
    fn test_defaults_match_declared_types() {
        for field in Field::ALL {
            if let Some(value) = field.default_value().to_value() {
                assert!(
                    value.has_type(field.field_type()),
                    "default of '{field}' does not match its type"
                );
            }
        }
        assert_eq!(Field::Interface.default_value().to_value(), None);
    }

    #[test]
    fn test_kind_specific_fields() {
        assert!(Field::Token.applies_to(DescriptorKind::Service));
        assert!(!Field::Token.applies_to(DescriptorKind::Reference));
        assert!(Field::Sticky.applies_to(DescriptorKind::Reference));
        assert!(!Field::Sticky.applies_to(DescriptorKind::Service));
        assert!(Field::Timeout.applies_to(DescriptorKind::Service));
        assert!(Field::Timeout.applies_to(DescriptorKind::Reference));
    }

    #[test]
    fn test_decode_literals() {
        assert_eq!(Value::decode(FieldType::Int, "3000"), Ok(Value::Int(3000)));
        assert!(Value::decode(FieldType::Int, "soon").is_err());
        assert_eq!(Value::decode(FieldType::Bool, "true"), Ok(Value::Bool(true)));
        assert!(Value::decode(FieldType::Bool, "yes").is_err());
        assert_eq!(
            Value::decode(FieldType::List, "dubbo, http"),
            Ok(Value::list(["dubbo", "http"]))
        );
        assert_eq!(Value::decode(FieldType::List, ""), Ok(Value::List(vec![])));
        assert_eq!(
            Value::decode(FieldType::Params, "a=1,b=2"),
            Ok(Value::params([("a", "1"), ("b", "2")]))
        );
        assert!(Value::decode(FieldType::Params, "a").is_err());
    }

    #[test]
    fn test_encode_lists_comma_joined() {
        assert_eq!(Value::list(["a", "b", "c"]).encode(), "a,b,c");
        assert_eq!(Value::Int(-1).encode(), "-1");
        assert_eq!(Value::Bool(false).encode(), "false");
    }

    #[test]
    fn test_scope_sides() {
        assert_eq!(Scope::Reference.side(), Some(Side::Consumer));
        assert_eq!(Scope::Consumer.side(), Some(Side::Consumer));
        assert_eq!(Scope::Service.side(), Some(Side::Provider));
        assert_eq!(Scope::Application.side(), None);
    }
}
