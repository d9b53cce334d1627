//! Fail-fast validation of resolved descriptors.
//!
//! Rules are checked in field-table order and the first violation is returned. The
//! validator never corrects values.

use crate::descriptor::{CacheStrategy, Descriptor};
use crate::error::ConfigError;
use crate::model::{DescriptorKind, Field, Value};

/// Reserved announcement key that identifies the descriptor kind.
pub const SIDE_KEY: &str = "side";

/// Fields that only matter when a reference actually opens connections.
const NETWORK_FIELDS: &[Field] = &[
    Field::Url,
    Field::Client,
    Field::Connections,
    Field::Reconnect,
];

/// Validates a resolved descriptor.
///
/// # Errors
/// - `ConfigError::MissingIdentity` when `interface` is absent or empty
/// - `ConfigError::InvalidField` for the first value breaking its field's contract
pub fn validate(descriptor: &Descriptor) -> Result<(), ConfigError> {
    if descriptor.interface().trim().is_empty() {
        return Err(ConfigError::missing_identity(descriptor.kind()));
    }

    let skip_network = descriptor.kind() == DescriptorKind::Reference
        && descriptor.get(Field::Injvm) == Some(&Value::Bool(true));

    for (field, value) in descriptor.values() {
        if skip_network && NETWORK_FIELDS.contains(&field) {
            continue;
        }
        if !value.has_type(field.field_type()) {
            return Err(ConfigError::invalid_field(
                field.name(),
                format!("expected {}, got '{}'", field.field_type(), value.encode()),
            ));
        }
        check_field(field, value)?;
    }

    if descriptor.kind() == DescriptorKind::Service && descriptor.protocols().is_empty() {
        return Err(ConfigError::invalid_field(
            Field::Protocol.name(),
            "at least one protocol is required",
        ));
    }

    tracing::trace!(interface = descriptor.interface(), "descriptor valid");
    Ok(())
}

fn check_field(field: Field, value: &Value) -> Result<(), ConfigError> {
    match (field, value) {
        (Field::Retries | Field::Delay, Value::Int(i)) => min(field, *i, -1),
        (
            Field::Timeout
            | Field::Connections
            | Field::Actives
            | Field::Callbacks
            | Field::Weight
            | Field::Executes,
            Value::Int(i),
        ) => min(field, *i, 0),
        (Field::Cache, Value::Str(s)) if !s.is_empty() => CacheStrategy::from_name(s)
            .map(|_| ())
            .ok_or_else(|| {
                ConfigError::invalid_field(
                    field.name(),
                    format!("unknown cache strategy '{s}', expected lru, threadlocal or jcache"),
                )
            }),
        (Field::Cluster | Field::Loadbalance | Field::Proxy | Field::Client, Value::Str(s))
            if !s.is_empty() =>
        {
            extension_name(field, s)
        }
        (Field::Filter | Field::Listener | Field::Protocol | Field::Registry, Value::List(items)) => {
            items.iter().try_for_each(|s| extension_name(field, s))
        }
        (Field::Parameters, Value::Params(pairs)) => {
            pairs.iter().try_for_each(|(k, _)| parameter_key(k))
        }
        (Field::Url, Value::Str(s)) => direct_urls(s),
        _ => Ok(()),
    }
}

fn min(field: Field, value: i32, floor: i32) -> Result<(), ConfigError> {
    if value < floor {
        return Err(ConfigError::invalid_field(
            field.name(),
            format!("must be >= {floor}, got {value}"),
        ));
    }
    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}

fn extension_name(field: Field, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(ConfigError::invalid_field(
            field.name(),
            format!("'{name}' is not a valid name, allowed characters are [-._0-9a-zA-Z]"),
        ));
    }
    Ok(())
}

fn parameter_key(key: &str) -> Result<(), ConfigError> {
    if key.trim().is_empty() {
        return Err(ConfigError::invalid_field(
            Field::Parameters.name(),
            "parameter keys must not be empty",
        ));
    }
    if key == SIDE_KEY || Field::from_name(key).is_some() {
        return Err(ConfigError::invalid_field(
            Field::Parameters.name(),
            format!("parameter key '{key}' collides with a reserved name"),
        ));
    }
    Ok(())
}

fn direct_urls(raw: &str) -> Result<(), ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .try_for_each(|target| {
            let invalid = |reason: &dyn std::fmt::Display| {
                ConfigError::invalid_field(Field::Url.name(), format!("'{target}': {reason}"))
            };
            let url = url::Url::parse(target).map_err(|e| invalid(&e))?;
            if url.host_str().is_none_or(str::is_empty) {
                return Err(invalid(&"missing host"));
            }
            Ok(())
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, ScopeChain};
    use crate::model::Scope;
    use crate::resolver::resolve;

    fn service(f: impl FnOnce(Fragment) -> Fragment) -> Descriptor {
        let local = Fragment::new(Scope::Service).with(Field::Interface, "com.example.Echo");
        resolve(&ScopeChain::service(f(local)))
    }

    fn reference(f: impl FnOnce(Fragment) -> Fragment) -> Descriptor {
        let local = Fragment::new(Scope::Reference).with(Field::Interface, "com.example.Echo");
        resolve(&ScopeChain::reference(f(local)))
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate(&service(|f| f)), Ok(()));
        assert_eq!(validate(&reference(|f| f)), Ok(()));
    }

    #[test]
    fn test_missing_identity() {
        let d = resolve(&ScopeChain::service(
            Fragment::new(Scope::Service).with(Field::Timeout, 10),
        ));
        let err = validate(&d).unwrap_err();
        assert!(err.is_missing_identity());

        let d = reference(|f| f.with(Field::Interface, "  "));
        assert!(validate(&d).unwrap_err().is_missing_identity());
    }

    #[test]
    fn test_negative_values() {
        let err = validate(&service(|f| f.with(Field::Timeout, -5))).unwrap_err();
        assert_eq!(err.field(), Some("timeout"));

        assert_eq!(validate(&service(|f| f.with(Field::Delay, -1))), Ok(()));
        assert_eq!(validate(&service(|f| f.with(Field::Retries, -1))), Ok(()));

        let err = validate(&service(|f| f.with(Field::Delay, -2))).unwrap_err();
        assert_eq!(err.field(), Some("delay"));
        let err = validate(&reference(|f| f.with(Field::Retries, -3))).unwrap_err();
        assert_eq!(err.field(), Some("retries"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = validate(&service(|f| f.with(Field::Timeout, "soon"))).unwrap_err();
        assert_eq!(err.field(), Some("timeout"));
        assert!(err.to_string().contains("expected int"));
    }

    #[test]
    fn test_cache_strategy() {
        assert_eq!(validate(&reference(|f| f.with(Field::Cache, "lru"))), Ok(()));
        let err = validate(&reference(|f| f.with(Field::Cache, "redis"))).unwrap_err();
        assert_eq!(err.field(), Some("cache"));
    }

    #[test]
    fn test_extension_names() {
        assert_eq!(
            validate(&service(|f| f.with(Field::Filter, ["-default", "trace.v2"]))),
            Ok(())
        );
        let err = validate(&service(|f| f.with(Field::Loadbalance, "round robin"))).unwrap_err();
        assert_eq!(err.field(), Some("loadbalance"));
        let err = validate(&service(|f| f.with(Field::Protocol, ["dubbo", ""]))).unwrap_err();
        assert_eq!(err.field(), Some("protocol"));
    }

    #[test]
    fn test_empty_protocol_list_rejected() {
        let err = validate(&service(|f| f.with(Field::Protocol, Vec::<String>::new()))).unwrap_err();
        assert_eq!(err.field(), Some("protocol"));
    }

    #[test]
    fn test_parameter_keys_must_not_shadow_fields() {
        let ok = service(|f| f.with(Field::Parameters, Value::params([("region", "eu")])));
        assert_eq!(validate(&ok), Ok(()));

        let err = validate(&service(|f| {
            f.with(Field::Parameters, Value::params([("timeout", "1")]))
        }))
        .unwrap_err();
        assert_eq!(err.field(), Some("parameters"));

        let err = validate(&service(|f| {
            f.with(Field::Parameters, Value::params([("side", "x")]))
        }))
        .unwrap_err();
        assert_eq!(err.field(), Some("parameters"));
    }

    #[test]
    fn test_direct_url_checked_unless_injvm() {
        let err = validate(&reference(|f| f.with(Field::Url, "not a url"))).unwrap_err();
        assert_eq!(err.field(), Some("url"));

        let d = reference(|f| {
            f.with(Field::Url, "not a url")
                .with(Field::Connections, -1)
                .with(Field::Injvm, true)
        });
        assert_eq!(validate(&d), Ok(()));

        let d = reference(|f| f.with(Field::Url, "dubbo://10.0.0.1:20880;dubbo://10.0.0.2:20880"));
        assert_eq!(validate(&d), Ok(()));
    }

    #[test]
    fn test_direct_url_needs_host() {
        for target in ["dubbo:x", "dubbo:/com.example.Echo", "dubbo://10.0.0.1:20880;mailto:a"] {
            let err = validate(&reference(|f| f.with(Field::Url, target))).unwrap_err();
            assert_eq!(err.field(), Some("url"), "{target}");
        }
    }

    #[test]
    fn test_generic_needs_no_extra_fields() {
        assert_eq!(validate(&reference(|f| f.with(Field::Generic, true))), Ok(()));
    }
}
