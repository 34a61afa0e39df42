//! Per-interface configuration overrides.
//!
//! A [`ConfigSource`] supplies overrides keyed by the stable interface
//! identifier or by an explicit alias. Precedence is documented and fixed:
//! values under the explicit identifier override values under the alias,
//! which override builder-supplied defaults.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use restbind_types::QueryStyle;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Overridable per-interface settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceOverrides {
    pub base_uri: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub follow_redirects: Option<bool>,
    pub query_style: Option<QueryStyle>,
    /// Names of builder-registered providers to activate.
    pub providers: Option<Vec<String>>,
    pub accept_invalid_certs: Option<bool>,
    /// Whether the built-in status ≥ 400 exception mapper is active.
    pub default_status_mapping: Option<bool>,
}

impl InterfaceOverrides {
    /// Field-wise merge where `self` wins over `base`.
    pub fn merged_over(self, base: Self) -> Self {
        Self {
            base_uri: self.base_uri.or(base.base_uri),
            connect_timeout_ms: self.connect_timeout_ms.or(base.connect_timeout_ms),
            read_timeout_ms: self.read_timeout_ms.or(base.read_timeout_ms),
            follow_redirects: self.follow_redirects.or(base.follow_redirects),
            query_style: self.query_style.or(base.query_style),
            providers: self.providers.or(base.providers),
            accept_invalid_certs: self.accept_invalid_certs.or(base.accept_invalid_certs),
            default_status_mapping: self.default_status_mapping.or(base.default_status_mapping),
        }
    }

    /// Stable fingerprint used as part of the descriptor cache key.
    pub fn fingerprint(&self) -> u64 {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        serialized.hash(&mut hasher);
        hasher.finish()
    }
}

/// Keyed lookup of per-interface overrides.
pub trait ConfigSource: Send + Sync {
    /// Overrides registered under the stable interface identifier.
    fn for_interface(&self, interface_id: &str) -> Option<InterfaceOverrides>;

    /// Overrides registered under an explicit alias key.
    fn for_alias(&self, alias: &str) -> Option<InterfaceOverrides>;
}

/// Apply the documented precedence: explicit identifier over alias; the
/// result is later merged over builder defaults by the client builder.
pub fn resolve_overrides(source: Option<&Arc<dyn ConfigSource>>, interface_id: &str, alias: Option<&str>) -> InterfaceOverrides {
    let Some(source) = source else {
        return InterfaceOverrides::default();
    };
    let by_alias = alias.and_then(|alias| source.for_alias(alias)).unwrap_or_default();
    let by_id = source.for_interface(interface_id).unwrap_or_default();
    let resolved = by_id.merged_over(by_alias);
    debug!(
        interface = %interface_id,
        alias = alias.unwrap_or("-"),
        has_base_uri = resolved.base_uri.is_some(),
        "configuration overrides resolved"
    );
    resolved
}

/// In-memory configuration source, deserializable from a JSON document of
/// the form `{"interfaces": {...}, "aliases": {...}}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticConfigSource {
    #[serde(default)]
    interfaces: HashMap<String, InterfaceOverrides>,
    #[serde(default)]
    aliases: HashMap<String, InterfaceOverrides>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration document from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn set_interface(mut self, interface_id: impl Into<String>, overrides: InterfaceOverrides) -> Self {
        self.interfaces.insert(interface_id.into(), overrides);
        self
    }

    pub fn set_alias(mut self, alias: impl Into<String>, overrides: InterfaceOverrides) -> Self {
        self.aliases.insert(alias.into(), overrides);
        self
    }
}

impl ConfigSource for StaticConfigSource {
    fn for_interface(&self, interface_id: &str) -> Option<InterfaceOverrides> {
        self.interfaces.get(interface_id).cloned()
    }

    fn for_alias(&self, alias: &str) -> Option<InterfaceOverrides> {
        self.aliases.get(alias).cloned()
    }
}
