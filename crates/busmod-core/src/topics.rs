// ── Bus topic names ──

pub const SYS_REGISTER: &str = "sys/register";
pub const SYS_UNREGISTER: &str = "sys/unregister";
pub const SYS_BUNDLE_STATUS: &str = "sys/bundle_status";
pub const SYS_INSTANCES_RESPONSE: &str = "sys/instances_response";
pub const SYS_BUNDLE_API_RESPONSE: &str = "sys/bundle_api_response";
pub const SYS_CONFIG_RESPONSE: &str = "sys/config_response";

/// `commands/<id>`: module-level when `id` is the module id, instance-level otherwise.
pub fn command_topic(id: &str) -> String {
    format!("commands/{id}")
}

/// `state/<instance_id>`
pub fn state_topic(instance_id: &str) -> String {
    format!("state/{instance_id}")
}

/// `state/<instance_id>/<entity_id>`
pub fn entity_state_topic(instance_id: &str, entity_id: &str) -> String {
    format!("state/{instance_id}/{entity_id}")
}
