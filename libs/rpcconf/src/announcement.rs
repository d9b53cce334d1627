//! Announcement URLs: the wire form of a resolved descriptor handed to registries.
//!
//! `scheme://host[:port]/path?query` where
//! - `scheme` is the transport protocol (or `consumer` for references),
//! - `path` is the export path or interface identity,
//! - `query` holds one `name=value` pair per explicitly set field, lists
//!   comma-joined, `parameters` entries flattened to top-level pairs, plus the
//!   `side` pair naming the descriptor kind.
//!
//! Unset fields are omitted so the receiving side can apply its own defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::descriptor::Descriptor;
use crate::error::ConfigError;
use crate::fragment::Fragment;
use crate::model::{DescriptorKind, Field, Scope, Value};
use crate::validator::SIDE_KEY;

/// Scheme used for reference (consumer) announcements.
pub const CONSUMER_SCHEME: &str = "consumer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementUrl {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    params: BTreeMap<String, String>,
}

impl AnnouncementUrl {
    /// Announcement of a service exported under `protocol` at `host:port`.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidField` if the descriptor is not a service or does
    /// not list `protocol`.
    pub fn for_service(
        descriptor: &Descriptor,
        protocol: &str,
        host: &str,
        port: u16,
    ) -> Result<Self, ConfigError> {
        if descriptor.kind() != DescriptorKind::Service {
            return Err(ConfigError::invalid_field(
                Field::Protocol.name(),
                "only service descriptors are announced under a protocol",
            ));
        }
        if !descriptor.protocols().iter().any(|p| p == protocol) {
            return Err(ConfigError::invalid_field(
                Field::Protocol.name(),
                format!("'{protocol}' is not one of the service's protocols"),
            ));
        }
        Ok(Self {
            protocol: protocol.to_owned(),
            host: host.to_owned(),
            port,
            path: descriptor.path().to_owned(),
            params: encode_params(descriptor),
        })
    }

    /// Announcement of a reference subscribing from `host`.
    #[must_use]
    pub fn for_reference(descriptor: &Descriptor, host: &str) -> Self {
        Self {
            protocol: CONSUMER_SCHEME.to_owned(),
            host: host.to_owned(),
            port: 0,
            path: descriptor.interface().to_owned(),
            params: encode_params(descriptor),
        }
    }

    /// Parses an announcement URL.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidUrl` when the text is not a URL or has no host.
    ///
    /// A URL without a port keeps port 0, except for schemes with a well-known
    /// default port which is filled in.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = url::Url::parse(raw).map_err(|e| ConfigError::invalid_url(raw, e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::invalid_url(raw, "missing host"))?
            .to_owned();
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            protocol: url.scheme().to_owned(),
            host,
            // `url` drops the default port of special schemes like http:80.
            port: url.port_or_known_default().unwrap_or(0),
            path: url.path().trim_start_matches('/').to_owned(),
            params,
        })
    }

    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Descriptor kind named by the `side` pair.
    #[must_use]
    pub fn kind(&self) -> Option<DescriptorKind> {
        self.param(SIDE_KEY).and_then(DescriptorKind::from_side)
    }

    /// Rebuilds the fragment the announcement was produced from.
    ///
    /// Known wire names become fields; every other key except `side` is collected
    /// into `parameters`.
    ///
    /// # Errors
    /// - `ConfigError::InvalidUrl` if the `side` pair is missing or unknown
    /// - `ConfigError::InvalidField` if a field's text is not a valid literal
    pub fn to_fragment(&self) -> Result<Fragment, ConfigError> {
        let kind = self.kind().ok_or_else(|| {
            ConfigError::invalid_url(self.to_string(), "missing or unknown 'side' parameter")
        })?;
        let scope = match kind {
            DescriptorKind::Service => Scope::Service,
            DescriptorKind::Reference => Scope::Reference,
        };

        let mut fragment = Fragment::new(scope);
        let mut passthrough = Vec::new();
        for (key, raw) in &self.params {
            if key == SIDE_KEY {
                continue;
            }
            match Field::from_name(key) {
                Some(Field::Parameters) | None => passthrough.push((key.clone(), raw.clone())),
                Some(field) => {
                    let value = Value::decode(field.field_type(), raw)
                        .map_err(|reason| ConfigError::invalid_field(key.as_str(), reason))?;
                    fragment.set(field, value);
                }
            }
        }
        if !passthrough.is_empty() {
            fragment.set(Field::Parameters, Value::Params(passthrough));
        }
        Ok(fragment)
    }

    fn to_url(&self) -> Result<url::Url, url::ParseError> {
        let authority = if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        let mut url = url::Url::parse(&format!("{}://{authority}/{}", self.protocol, self.path))?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }
}

fn encode_params(descriptor: &Descriptor) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (field, value) in descriptor.explicit_values() {
        if let Value::Params(pairs) = value {
            params.extend(pairs.iter().cloned());
        } else {
            params.insert(field.name().to_owned(), value.encode());
        }
    }
    params.insert(SIDE_KEY.to_owned(), descriptor.kind().side().to_owned());
    params
}

impl fmt::Display for AnnouncementUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_url() {
            Ok(url) => f.write_str(url.as_str()),
            Err(_) => write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path),
        }
    }
}

impl FromStr for AnnouncementUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
