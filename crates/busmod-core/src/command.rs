// ── Inbound commands ──
//
// Every command arriving on `commands/<module_id>` is decoded into one
// tagged variant before anything acts on it. Unknown tags and malformed
// payloads surface as `CommandError` and never reach the runner's
// handlers.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use busmod_api::{Event, Payload};

use crate::error::{CoreError, HandlerError};
use crate::model::{ConfigMap, Instance};

/// Module-level command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetConfig,
    SetConfig { config: ConfigMap },
    ExecuteInit,
    GetInstances,
    RegisterInstance(Box<Instance>),
    DeleteInstance { id: String },
    SetAlias { id: String, alias: String },
    Discover { params: ConfigMap },
    BundleApi(ApiRequest),
}

/// Generic request/response envelope (`bundle_api`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub request_id: String,
    pub action: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: ConfigMap,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unsupported command type '{0}'")]
    Unsupported(String),

    #[error("malformed '{kind}' command: {reason}")]
    Malformed { kind: String, reason: String },
}

impl Command {
    /// Decode a command event by its type tag.
    pub fn decode(event: &Event) -> Result<Self, CommandError> {
        let kind = event.kind.as_str();
        let malformed = |reason: String| CommandError::Malformed {
            kind: kind.to_owned(),
            reason,
        };

        let command = match kind {
            "get_config" => Self::GetConfig,
            "set_config" => {
                let config = match event.data.get("config") {
                    None | Some(Value::Null) => ConfigMap::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => return Err(malformed("'config' must be an object".into())),
                };
                Self::SetConfig { config }
            }
            "execute_init" => Self::ExecuteInit,
            "get_instances" => Self::GetInstances,
            "register_instance" => {
                let instance: Instance = from_payload(&event.data).map_err(malformed)?;
                Self::RegisterInstance(Box::new(instance))
            }
            "delete_instance" => Self::DeleteInstance {
                id: required_str(&event.data, "id").map_err(malformed)?,
            },
            "set_alias" => Self::SetAlias {
                id: required_str(&event.data, "id").map_err(malformed)?,
                alias: event
                    .data
                    .get("alias")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            "discover" => Self::Discover {
                params: event.data.clone(),
            },
            "bundle_api" => Self::BundleApi(from_payload(&event.data).map_err(malformed)?),
            other => return Err(CommandError::Unsupported(other.to_owned())),
        };
        Ok(command)
    }

    /// Wire name of the command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetConfig => "get_config",
            Self::SetConfig { .. } => "set_config",
            Self::ExecuteInit => "execute_init",
            Self::GetInstances => "get_instances",
            Self::RegisterInstance(_) => "register_instance",
            Self::DeleteInstance { .. } => "delete_instance",
            Self::SetAlias { .. } => "set_alias",
            Self::Discover { .. } => "discover",
            Self::BundleApi(_) => "bundle_api",
        }
    }
}

// ── Per-instance commands ────────────────────────────────────────────

/// Command arriving on `commands/<instance_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceCommand {
    /// Reply with the live state document on `reply_to`.
    QueryState { reply_to: Option<String> },
}

impl InstanceCommand {
    pub fn decode(event: &Event) -> Result<Self, CommandError> {
        match event.kind.as_str() {
            "query_state" => Ok(Self::QueryState {
                reply_to: event
                    .str_field("reply_to")
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            }),
            other => Err(CommandError::Unsupported(other.to_owned())),
        }
    }
}

// ── API action errors ────────────────────────────────────────────────

/// Why a `bundle_api` action produced `ok: false`. The display string is
/// what goes into the response's `error` field.
#[derive(Debug, Error)]
pub enum ApiActionError {
    #[error("missing id")]
    MissingId,

    #[error("unsupported file_type")]
    UnsupportedFileType,

    #[error("unsupported action")]
    UnsupportedAction,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Tool(#[from] HandlerError),
}

// ── Helpers ──────────────────────────────────────────────────────────

fn from_payload<T: serde::de::DeserializeOwned>(data: &Payload) -> Result<T, String> {
    serde_json::from_value(Value::Object(data.clone())).map_err(|e| e.to_string())
}

fn required_str(data: &Payload, key: &str) -> Result<String, String> {
    match data.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_owned()),
        _ => Err(format!("missing '{key}'")),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<ConfigMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<ConfigMap>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(kind: &str, data: Value) -> Event {
        Event::new("commands/hue", kind).with_data(data.as_object().unwrap().clone())
    }

    #[test]
    fn decodes_set_config() {
        let got = Command::decode(&cmd("set_config", json!({"config": {"token": "t"}}))).unwrap();
        let Command::SetConfig { config } = got else {
            panic!("wrong variant: {got:?}");
        };
        assert_eq!(config["token"], "t");
    }

    #[test]
    fn set_config_without_config_is_empty() {
        let got = Command::decode(&cmd("set_config", json!({}))).unwrap();
        assert_eq!(got, Command::SetConfig { config: ConfigMap::new() });
    }

    #[test]
    fn set_config_with_scalar_is_malformed() {
        let err = Command::decode(&cmd("set_config", json!({"config": 5}))).unwrap_err();
        assert!(matches!(err, CommandError::Malformed { .. }));
    }

    #[test]
    fn decodes_register_instance_with_controls_alias() {
        let got = Command::decode(&cmd(
            "register_instance",
            json!({"name": "Lamp", "controls": [{"id": "power", "type": "switch"}]}),
        ))
        .unwrap();
        let Command::RegisterInstance(inst) = got else {
            panic!("wrong variant");
        };
        assert_eq!(inst.name, "Lamp");
        assert_eq!(inst.entities.len(), 1);
        assert!(inst.enabled);
    }

    #[test]
    fn decodes_register_instance_with_state_alias() {
        let got = Command::decode(&cmd(
            "register_instance",
            json!({"id": "lamp", "state": {"power": {"on": true}}}),
        ))
        .unwrap();
        let Command::RegisterInstance(inst) = got else {
            panic!("wrong variant");
        };
        assert_eq!(inst.entity_state["power"]["on"], json!(true));
    }

    #[test]
    fn delete_requires_id() {
        assert_eq!(
            Command::decode(&cmd("delete_instance", json!({"id": "d1"}))).unwrap(),
            Command::DeleteInstance { id: "d1".into() }
        );
        assert!(Command::decode(&cmd("delete_instance", json!({}))).is_err());
    }

    #[test]
    fn decodes_bundle_api_envelope() {
        let got = Command::decode(&cmd(
            "bundle_api",
            json!({"request_id": "r1", "action": "get_config", "params": null}),
        ))
        .unwrap();
        assert_eq!(
            got,
            Command::BundleApi(ApiRequest {
                request_id: "r1".into(),
                action: "get_config".into(),
                params: ConfigMap::new(),
            })
        );
        assert_eq!(got.kind(), "bundle_api");
    }

    #[test]
    fn bundle_api_without_action_is_malformed() {
        assert!(matches!(
            Command::decode(&cmd("bundle_api", json!({"request_id": "r1"}))),
            Err(CommandError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        assert_eq!(
            Command::decode(&cmd("reboot_universe", json!({}))).unwrap_err(),
            CommandError::Unsupported("reboot_universe".into())
        );
    }

    #[test]
    fn query_state_ignores_empty_reply_to() {
        let ev = cmd("query_state", json!({"reply_to": ""}));
        assert_eq!(
            InstanceCommand::decode(&ev).unwrap(),
            InstanceCommand::QueryState { reply_to: None }
        );
        let ev = cmd("query_state", json!({"reply_to": "ui/replies"}));
        assert_eq!(
            InstanceCommand::decode(&ev).unwrap(),
            InstanceCommand::QueryState {
                reply_to: Some("ui/replies".into())
            }
        );
    }

    #[test]
    fn api_error_strings_are_stable() {
        assert_eq!(ApiActionError::MissingId.to_string(), "missing id");
        assert_eq!(ApiActionError::UnsupportedAction.to_string(), "unsupported action");
        assert_eq!(
            ApiActionError::Tool(HandlerError::new("boom")).to_string(),
            "boom"
        );
    }
}
