//! Service identity keys and wildcard matching.

use std::fmt;

/// Match-any marker for `group` and `version`.
pub const ANY: &str = "*";

/// (interface identity, group, version) of a service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub interface: String,
    pub group: String,
    pub version: String,
}

impl ServiceKey {
    #[must_use]
    pub fn new(
        interface: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            group: group.into(),
            version: version.into(),
        }
    }

    /// Whether a provider announcing `provider` satisfies this key used as a
    /// consumer-side pattern.
    ///
    /// `"*"` matches any group or version. A comma-separated consumer group
    /// matches any of its members. Everything else is literal equality.
    #[must_use]
    pub fn matches(&self, provider: &ServiceKey) -> bool {
        self.interface == provider.interface
            && group_matches(&self.group, &provider.group)
            && (self.version == ANY || self.version == provider.version)
    }
}

fn group_matches(pattern: &str, group: &str) -> bool {
    if pattern == ANY {
        return true;
    }
    if pattern.contains(',') {
        return pattern.split(',').map(str::trim).any(|g| g == group);
    }
    pattern == group
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.group.is_empty() {
            write!(f, "{}/", self.group)?;
        }
        f.write_str(&self.interface)?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

/// One export registration: a service key under one transport protocol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportKey {
    pub service: ServiceKey,
    pub protocol: String,
}

impl ExportKey {
    #[must_use]
    pub fn new(service: ServiceKey, protocol: impl Into<String>) -> Self {
        Self {
            service,
            protocol: protocol.into(),
        }
    }
}

impl fmt::Display for ExportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.service)
    }
}
