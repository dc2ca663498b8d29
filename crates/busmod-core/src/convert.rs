// ── Domain-to-payload conversions ──
//
// Builds the `data` objects for announcements the runtime publishes.
// Every announcement carries `bundle` (the module id) so the core can
// attribute it.

use serde::Serialize;
use serde_json::Value;

use busmod_api::Payload;

use crate::error::CoreError;
use crate::model::{BundleStatus, ConfigMap, EntityState, Instance};

/// Serialize anything that maps to a JSON object into a payload.
pub(crate) fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload, CoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CoreError::Internal(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(CoreError::Internal(format!("payload serialization: {e}"))),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Internal(format!("payload serialization: {e}")))
}

fn with_bundle(bundle: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("bundle".into(), Value::String(bundle.to_owned()));
    payload
}

/// `sys/register`
pub(crate) fn register_payload(bundle: &str, instance: &Instance) -> Result<Payload, CoreError> {
    let mut payload = with_bundle(bundle);
    payload.insert("id".into(), Value::String(instance.id.clone()));
    payload.insert("name".into(), Value::String(instance.name.clone()));
    payload.insert("alias".into(), Value::String(instance.alias.clone()));
    payload.insert("enabled".into(), Value::Bool(instance.enabled));
    payload.insert("config".into(), Value::Object(instance.config.clone()));
    payload.insert("entities".into(), to_json(&instance.entities)?);
    payload.insert("meta".into(), Value::Object(instance.meta.clone()));
    Ok(payload)
}

/// `sys/unregister`
pub(crate) fn unregister_payload(bundle: &str, id: &str) -> Payload {
    let mut payload = with_bundle(bundle);
    payload.insert("id".into(), Value::String(id.to_owned()));
    payload
}

/// `sys/bundle_status`: the status fields flattened next to `bundle`.
pub(crate) fn status_payload(bundle: &str, status: &BundleStatus) -> Result<Payload, CoreError> {
    let mut payload = with_bundle(bundle);
    payload.extend(to_payload(status)?);
    Ok(payload)
}

/// `sys/instances_response`
pub(crate) fn instances_payload(
    bundle: &str,
    instances: &[Instance],
) -> Result<Payload, CoreError> {
    let mut payload = with_bundle(bundle);
    payload.insert("instances".into(), to_json(instances)?);
    Ok(payload)
}

/// `sys/config_response`
pub(crate) fn config_payload(bundle: &str, config: ConfigMap) -> Payload {
    let mut payload = with_bundle(bundle);
    payload.insert("config".into(), Value::Object(config));
    payload
}

/// `state/<id>`: the whole state document.
pub(crate) fn state_payload(
    bundle: &str,
    id: &str,
    state: &EntityState,
) -> Result<Payload, CoreError> {
    let mut payload = with_bundle(bundle);
    payload.insert("id".into(), Value::String(id.to_owned()));
    payload.insert("state".into(), to_json(state)?);
    Ok(payload)
}

/// `state/<id>/<entity>`: one entity's values.
pub(crate) fn entity_state_payload(
    bundle: &str,
    id: &str,
    entity_id: &str,
    values: &ConfigMap,
) -> Payload {
    let mut payload = with_bundle(bundle);
    payload.insert("id".into(), Value::String(id.to_owned()));
    payload.insert("entity_id".into(), Value::String(entity_id.to_owned()));
    payload.insert("state".into(), Value::Object(values.clone()));
    payload
}

/// `sys/bundle_api_response`: result fields flattened next to the envelope.
/// Envelope keys win over result keys of the same name.
pub(crate) fn api_response_payload(
    bundle: &str,
    request_id: &str,
    action: &str,
    outcome: Result<ConfigMap, String>,
) -> Payload {
    let mut payload = Payload::new();
    let error = match outcome {
        Ok(result) => {
            payload.extend(result);
            None
        }
        Err(message) => Some(message),
    };
    payload.insert("bundle".into(), Value::String(bundle.to_owned()));
    payload.insert("request_id".into(), Value::String(request_id.to_owned()));
    payload.insert("action".into(), Value::String(action.to_owned()));
    payload.insert("ok".into(), Value::Bool(error.is_none()));
    if let Some(message) = error {
        payload.insert("error".into(), Value::String(message));
    }
    payload
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::BundleState;
    use serde_json::json;

    #[test]
    fn status_payload_flattens_status() {
        let status = BundleStatus::new(BundleState::Ready, "Verified")
            .with_config(json!({"token": "x"}).as_object().unwrap().clone());
        let payload = status_payload("hue", &status).unwrap();
        insta::assert_json_snapshot!(payload, @r#"
        {
          "bundle": "hue",
          "config": {
            "token": "x"
          },
          "message": "Verified",
          "state": "ready"
        }
        "#);
    }

    #[test]
    fn register_payload_carries_identity_and_entities() {
        let mut inst = Instance::new("Lamp").with_id("d1");
        inst.entities.push(crate::model::EntitySpec::new("power", "switch"));
        let payload = register_payload("hue", &inst).unwrap();
        assert_eq!(payload["id"], "d1");
        assert_eq!(payload["bundle"], "hue");
        assert_eq!(payload["entities"][0]["type"], "switch");
        assert!(payload.get("entity_state").is_none());
    }

    #[test]
    fn api_response_flattens_result_under_envelope() {
        let result = json!({"found": true, "ok": "spoofed"}).as_object().unwrap().clone();
        let payload = api_response_payload("hue", "r1", "get_instance_file", Ok(result));
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["found"], true);
        assert!(payload.get("error").is_none());

        let payload = api_response_payload("hue", "r2", "nope", Err("unsupported action".into()));
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"], "unsupported action");
        assert_eq!(payload["request_id"], "r2");
    }

    #[test]
    fn to_payload_rejects_non_objects() {
        assert!(to_payload(&vec![1, 2]).is_err());
    }
}
