//! `busmod run`: the built-in reference module.
//!
//! Accepts any object config (or one carrying every `--require-key`),
//! keeps a heartbeat running that restarts on each init, moves the bundle
//! from `ready` through `starting` to `active`, and offers an `echo` tool.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use busmod_config::Settings;
use busmod_core::{
    BoxFuture, BundleState, ConfigMap, HandlerError, Instance, InstanceObserver,
    LifecycleHandler, ModuleApi, ToolProvider,
};

use crate::cli::RunArgs;
use crate::error::CliError;

const ECHO_TOOL: &str = "echo";

pub async fn handle(mut args: RunArgs, mut settings: Settings) -> Result<(), CliError> {
    if let Some(id) = args.module_id.take() {
        settings.module_id = id;
    }
    if let Some(dir) = args.state_dir.take() {
        settings.state_dir = dir;
    }
    if let Some(socket) = args.bus_socket.take() {
        settings.bus_socket = socket;
    }
    if let Some(dir) = args.module_dir.take() {
        settings.module_dir = Some(dir);
    }
    let config = settings.to_runtime_config()?;

    let module = ReferenceModule::new(args.require_keys, Duration::from_secs(args.heartbeat_secs));
    busmod_core::run(module, config).await?;
    Ok(())
}

// ── Reference module ─────────────────────────────────────────────────

pub struct ReferenceModule {
    required_keys: Vec<String>,
    heartbeat: Duration,
    /// Token of the logic task started by the latest init.
    logic: Mutex<Option<CancellationToken>>,
}

impl ReferenceModule {
    pub fn new(required_keys: Vec<String>, heartbeat: Duration) -> Self {
        Self {
            required_keys,
            heartbeat,
            logic: Mutex::new(None),
        }
    }
}

impl LifecycleHandler for ReferenceModule {
    async fn validate_config(&self, config: &ConfigMap) -> Result<(), HandlerError> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|key| config.get(key.as_str()).is_none_or(serde_json::Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::new(format!("missing required config: {}", missing.join(", "))))
        }
    }

    async fn init(&self, api: ModuleApi) -> Result<(), HandlerError> {
        let token = api.cancellation();
        let previous = self
            .logic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            info!("refreshing module logic");
            previous.cancel();
        }

        info!(keys = api.module_config().len(), "module logic started");
        api.spawn(module_logic(api.clone(), token, self.heartbeat));
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.logic.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        info!("module logic stopped");
    }

    fn observer(&self) -> Option<&dyn InstanceObserver> {
        Some(self)
    }

    fn tools(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

impl InstanceObserver for ReferenceModule {
    fn on_instance_registered(&self, instance: &Instance) {
        info!(instance = %instance.id, name = instance.display_name(), "tracking instance");
    }

    fn on_instance_deleted(&self, id: &str) {
        info!(instance = %id, "no longer tracking instance");
    }
}

impl ToolProvider for ReferenceModule {
    fn handles(&self, action: &str) -> bool {
        action == ECHO_TOOL
    }

    fn invoke<'a>(
        &'a self,
        action: &'a str,
        params: ConfigMap,
        _api: ModuleApi,
    ) -> BoxFuture<'a, Result<ConfigMap, HandlerError>> {
        Box::pin(async move {
            match action {
                ECHO_TOOL => Ok(params),
                other => Err(HandlerError::new(format!("unknown tool '{other}'"))),
            }
        })
    }
}

// ── Module logic ─────────────────────────────────────────────────────

/// Heartbeat plus the `ready` → `active` walk, until `cancel` fires.
async fn module_logic(api: ModuleApi, cancel: CancellationToken, every: Duration) {
    let mut status = api.subscribe_bundle_status();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let state = status.borrow_and_update().state;
        if state == BundleState::Ready {
            go_active(&api);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let instances = api.instances().map_or(0, |list| list.len());
                info!(instances, "module heartbeat");
            }
        }
    }
    debug!("module logic exited");
}

fn go_active(api: &ModuleApi) {
    let result = api
        .set_bundle_status(BundleState::Starting, "Starting")
        .and_then(|()| api.set_bundle_status(BundleState::Active, "Running"));
    if let Err(e) = result {
        warn!(error = %e, "could not announce module start");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn any_object_config_is_accepted_without_required_keys() {
        let module = ReferenceModule::new(Vec::new(), Duration::from_secs(5));
        assert!(module.validate_config(&ConfigMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn required_keys_must_be_present_and_non_null() {
        let module = ReferenceModule::new(vec!["host".into(), "token".into()], Duration::from_secs(5));

        let ok = config(json!({"host": "10.0.0.2", "token": "abc"}));
        assert!(module.validate_config(&ok).await.is_ok());

        let partial = config(json!({"host": "10.0.0.2", "token": null}));
        let err = module.validate_config(&partial).await.unwrap_err();
        assert_eq!(err.message, "missing required config: token");

        let err = module.validate_config(&ConfigMap::new()).await.unwrap_err();
        assert_eq!(err.message, "missing required config: host, token");
    }

    #[test]
    fn only_echo_is_offered_as_a_tool() {
        let module = ReferenceModule::new(Vec::new(), Duration::from_secs(5));
        assert!(module.handles("echo"));
        assert!(!module.handles("get_config"));
    }
}
