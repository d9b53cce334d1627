#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! RPC service/reference configuration
//!
//! This library models the configuration of exported services and consumed
//! references, and turns layered partial configuration into one resolved
//! descriptor per service or reference:
//! - a fixed field table with types, defaults and kind applicability
//! - fragments (one per scope) that record only explicitly set fields
//! - the scope-cascade resolver and the fail-fast validator
//! - announcement URLs, the wire form handed to registries
//!
//! Export/reference lifecycles live in `rpcconf-runtime`.

pub mod announcement;
pub mod descriptor;
pub mod error;
pub mod fragment;
pub mod key;
pub mod model;
pub mod resolver;
pub mod validator;

pub use announcement::AnnouncementUrl;
pub use descriptor::{CacheStrategy, Descriptor, ExportDelay, MockPolicy, Origin};
pub use error::ConfigError;
pub use fragment::{Fragment, ScopeChain};
pub use key::{ANY, ExportKey, ServiceKey};
pub use model::{DescriptorKind, Field, FieldType, Scope, Side, Value};
pub use resolver::{Resolver, resolve, resolve_validated};
pub use validator::validate;
