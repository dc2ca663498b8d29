// ── Bus event ──
//
// The single message type carried on the bus. Immutable once built;
// handlers receive clones.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Free-form event payload (`data` on the wire).
pub type Payload = serde_json::Map<String, Value>;

/// One message on the bus.
///
/// `data` is always an object. An absent or `null` payload decodes as an
/// empty map so handlers never have to special-case it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Routing key, e.g. `"commands/hue"` or `"state/abc/power"`.
    pub topic: String,

    /// Discriminator within the topic, e.g. `"set_config"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Module id of the publisher, when the publisher stamped one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Payload,
}

impl Event {
    pub fn new(topic: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: kind.into(),
            source: None,
            data: Payload::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    /// String field from `data`, `None` if absent or not a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Object field from `data`, `None` if absent or not an object.
    pub fn object_field(&self, key: &str) -> Option<&Payload> {
        self.data.get(key).and_then(Value::as_object)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Payload>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_null_data_decode_as_empty() {
        let a: Event = serde_json::from_value(json!({"topic": "t", "type": "x"})).unwrap();
        let b: Event =
            serde_json::from_value(json!({"topic": "t", "type": "x", "data": null})).unwrap();
        assert!(a.data.is_empty());
        assert!(b.data.is_empty());
        assert_eq!(a.source, None);
    }

    #[test]
    fn source_is_omitted_when_unset() {
        let value = serde_json::to_value(Event::new("t", "x")).unwrap();
        assert!(value.get("source").is_none());
        assert_eq!(value["type"], "x");
    }

    #[test]
    fn field_accessors_check_types() {
        let mut data = Payload::new();
        data.insert("id".into(), json!("d1"));
        data.insert("config".into(), json!({"host": "10.0.0.2"}));
        data.insert("count".into(), json!(3));
        let event = Event::new("t", "x").with_data(data);

        assert_eq!(event.str_field("id"), Some("d1"));
        assert_eq!(event.str_field("count"), None);
        assert!(event.object_field("config").is_some());
        assert!(event.object_field("id").is_none());
    }
}
