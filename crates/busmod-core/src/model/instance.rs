// ── Instance domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Opaque key/value configuration (module config, instance config, meta).
pub type ConfigMap = serde_json::Map<String, Value>;

/// Live values keyed by entity id. Persisted apart from the static record.
pub type EntityState = BTreeMap<String, ConfigMap>;

/// Capability descriptor for one entity of an instance.
///
/// Kept as the raw object so that whatever the module declares (type,
/// range, unit, options, flags, or fields added later) round-trips
/// untouched. Accessors read the well-known keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitySpec(pub ConfigMap);

impl EntitySpec {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut map = ConfigMap::new();
        map.insert("id".into(), Value::String(id.into()));
        map.insert("type".into(), Value::String(kind.into()));
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// `"switch"`, `"sensor"`, `"number"`, ...
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn unit(&self) -> Option<&str> {
        self.0.get("unit").and_then(Value::as_str)
    }

    pub fn read_only(&self) -> bool {
        self.0
            .get("read_only")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One device owned by the module.
///
/// Every field except `id` may be omitted on the wire; `enabled` then
/// defaults to `true` and maps/lists to empty. Explicit `null` is
/// treated the same as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Stable identifier; generated by the store when empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,

    /// Name reported by the hardware.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    /// User override for display.
    #[serde(default, deserialize_with = "null_as_default")]
    pub alias: String,

    #[serde(default = "default_enabled", deserialize_with = "null_as_enabled")]
    pub enabled: bool,

    /// Static connection parameters (address, credentials, ...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: ConfigMap,

    #[serde(default, alias = "controls", deserialize_with = "null_as_default")]
    pub entities: Vec<EntitySpec>,

    #[serde(default, alias = "state", deserialize_with = "null_as_default")]
    pub entity_state: EntityState,

    /// Informational (model, firmware, ...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: ConfigMap,
}

impl Instance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            alias: String::new(),
            enabled: true,
            config: ConfigMap::new(),
            entities: Vec::new(),
            entity_state: EntityState::new(),
            meta: ConfigMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Alias when set, otherwise the hardware name.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new("")
    }
}

/// The static record as written to `<id>.instance.json`: everything
/// except live state.
#[derive(Debug, Serialize)]
pub(crate) struct StaticRecord<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub alias: &'a str,
    pub enabled: bool,
    pub config: &'a ConfigMap,
    pub entities: &'a [EntitySpec],
    pub meta: &'a ConfigMap,
}

impl<'a> From<&'a Instance> for StaticRecord<'a> {
    fn from(instance: &'a Instance) -> Self {
        Self {
            id: &instance.id,
            name: &instance.name,
            alias: &instance.alias,
            enabled: instance.enabled,
            config: &instance.config,
            entities: &instance.entities,
            meta: &instance.meta,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn null_as_enabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<bool>::deserialize(deserializer).map(|v| v.unwrap_or(true))
}
