// ── Lifecycle runner ──
//
// Connects to the bus, restores persisted state, runs the module's
// command dispatch loop, and tears everything down within the shutdown
// grace period. Exactly one task consumes `commands/<module_id>`, so
// bundle status transitions never race.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use busmod_api::{BusClient, Event, Subscription};

use crate::api::ModuleApi;
use crate::command::{ApiActionError, ApiRequest, Command};
use crate::config::RuntimeConfig;
use crate::convert;
use crate::error::CoreError;
use crate::handler::LifecycleHandler;
use crate::model::{BundleState, BundleStatus, ConfigMap, Instance};
use crate::store::{Artifact, InstanceStore};
use crate::topics;

const MANIFEST_FILES: [&str; 2] = ["module.json", "bundle.json"];

/// Run a module until SIGINT/SIGTERM or loss of the bus connection.
///
/// Returns `Err(CoreError::BusClosed)` when the bus went away first.
pub async fn run<H: LifecycleHandler>(handler: H, config: RuntimeConfig) -> Result<(), CoreError> {
    run_until(handler, config, shutdown_signal()).await
}

/// Like [`run`], but stops when `shutdown` resolves instead of on signals.
pub async fn run_until<H, F>(handler: H, config: RuntimeConfig, shutdown: F) -> Result<(), CoreError>
where
    H: LifecycleHandler,
    F: Future<Output = ()> + Send,
{
    config.validate()?;
    let span = info_span!("module", id = %config.module_id);
    run_inner(Arc::new(handler), config, shutdown)
        .instrument(span)
        .await
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("interrupt received"),
        () = terminate => info!("terminate received"),
    }
}

async fn run_inner<H, F>(handler: Arc<H>, config: RuntimeConfig, shutdown: F) -> Result<(), CoreError>
where
    H: LifecycleHandler,
    F: Future<Output = ()> + Send,
{
    let store = Arc::new(InstanceStore::open(&config.state_dir)?);
    let saved_config = match store.load_module_config() {
        Ok(config) => config,
        Err(e @ CoreError::CorruptRecord { .. }) => {
            warn!(error = %e, "ignoring unreadable saved config");
            ConfigMap::new()
        }
        Err(e) => return Err(e),
    };
    let initial = if saved_config.is_empty() {
        BundleStatus::new(BundleState::Idling, "Waiting for configuration")
    } else {
        BundleStatus::new(BundleState::Ready, "Initialized with saved config")
            .with_config(saved_config.clone())
    };

    let bus = BusClient::connect(&config.bus_socket, config.module_id.as_str()).await?;
    // Subscribe before announcing anything so replies to our first
    // announcement are not lost.
    let commands = bus.subscribe(topics::command_topic(&config.module_id));

    let grace = config.shutdown_grace;
    let cancel = CancellationToken::new();
    let api = ModuleApi::new(
        config,
        bus.clone(),
        Arc::clone(&store),
        saved_config,
        initial.clone(),
        cancel.clone(),
    );
    api.announce_status(initial)?;

    if let Err(e) = handler.init(api.clone()).await {
        error!(error = %e, "module init failed");
        api.announce_status(BundleStatus::new(
            BundleState::Error,
            format!("Init failed: {e}"),
        ))?;
    }

    restore_instances(handler.as_ref(), &api);

    let dispatch = tokio::spawn(
        dispatch_loop(Arc::clone(&handler), api.clone(), commands, cancel.clone())
            .in_current_span(),
    );
    info!(instances = api.workers().len(), "module running");

    let bus_lost = tokio::select! {
        () = shutdown => {
            info!("shutdown requested");
            false
        }
        () = bus.closed() => {
            warn!("bus connection lost");
            true
        }
    };

    // ── Teardown ──
    cancel.cancel();
    let mut handles = vec![dispatch];
    handles.extend(api.workers().drain());
    handles.extend(api.take_task_handles());
    let pending = handles.len();
    if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
        // Dropping the handles detaches the stragglers.
        warn!(
            tasks = pending,
            grace = ?grace,
            "tasks still running after grace period, abandoning"
        );
    }

    handler.stop().await;
    bus.close().await;
    info!("module stopped");

    if bus_lost { Err(CoreError::BusClosed) } else { Ok(()) }
}

/// Start workers for persisted instances and tell the observer about them.
fn restore_instances<H: LifecycleHandler>(handler: &H, api: &ModuleApi) {
    let instances = match api.instances() {
        Ok(instances) => instances,
        Err(e) => {
            error!(error = %e, "cannot enumerate persisted instances");
            return;
        }
    };
    for instance in &instances {
        if instance.id == api.module_id() {
            warn!(instance = %instance.id, "persisted instance shares the module id, not serving it");
            continue;
        }
        api.start_worker(&instance.id);
        if let Some(observer) = handler.observer() {
            observer.on_instance_registered(instance);
        }
    }
    debug!(count = instances.len(), "persisted instances restored");
}

// ── Dispatch loop ────────────────────────────────────────────────────

async fn dispatch_loop<H: LifecycleHandler>(
    handler: Arc<H>,
    api: ModuleApi,
    mut commands: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = commands.recv() => {
                let Some(event) = event else {
                    debug!("command subscription closed");
                    break;
                };
                let handled = AssertUnwindSafe(dispatch(&handler, &api, &event))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    error!(kind = %event.kind, "command handler panicked");
                }
            }
        }
    }
    debug!("dispatch loop exited");
}

/// Handle one command event. Failures are logged here and never escape.
async fn dispatch<H: LifecycleHandler>(handler: &Arc<H>, api: &ModuleApi, event: &Event) {
    let command = match Command::decode(event) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "ignoring command");
            return;
        }
    };

    let kind = command.kind();
    debug!(kind, "dispatching command");
    if let Err(e) = execute(handler, api, command).await {
        warn!(kind, error = %e, "command failed");
    }
}

async fn execute<H: LifecycleHandler>(
    handler: &Arc<H>,
    api: &ModuleApi,
    command: Command,
) -> Result<(), CoreError> {
    match command {
        Command::GetConfig => api.publish(
            topics::SYS_CONFIG_RESPONSE,
            "config",
            convert::config_payload(api.module_id(), api.module_config()),
        ),
        Command::SetConfig { config } => set_config(handler.as_ref(), api, config).await,
        Command::ExecuteInit => {
            if let Err(e) = handler.init(api.clone()).await {
                error!(error = %e, "module init failed");
                api.announce_status(BundleStatus::new(
                    BundleState::Error,
                    format!("Init failed: {e}"),
                ))?;
            }
            Ok(())
        }
        Command::GetInstances => {
            let instances = api.instances()?;
            api.publish(
                topics::SYS_INSTANCES_RESPONSE,
                "instances",
                convert::instances_payload(api.module_id(), &instances)?,
            )
        }
        Command::RegisterInstance(instance) => register(handler.as_ref(), api, *instance),
        Command::DeleteInstance { id } => delete(handler.as_ref(), api, &id).await,
        Command::SetAlias { id, alias } => {
            let mut instance = api
                .instance(&id)?
                .ok_or_else(|| CoreError::InstanceNotFound { id: id.clone() })?;
            instance.alias = alias;
            // Leave the live state file alone; only the record changes.
            instance.entity_state.clear();
            let saved = api.register_instance(instance)?;
            if let Some(observer) = handler.observer() {
                observer.on_instance_registered(&saved);
            }
            Ok(())
        }
        Command::Discover { params } => {
            if handler.discoverer().is_none() {
                debug!("discover requested but module has no discoverer");
                return Ok(());
            }
            let handler = Arc::clone(handler);
            let task_api = api.clone();
            api.spawn(
                async move {
                    if let Some(discoverer) = handler.discoverer() {
                        discoverer.discover(params, task_api).await;
                    }
                }
                .in_current_span(),
            );
            Ok(())
        }
        Command::BundleApi(request) => {
            let outcome = bundle_api(handler.as_ref(), api, &request)
                .await
                .map_err(|e| e.to_string());
            if let Err(message) = &outcome {
                debug!(action = %request.action, error = %message, "bundle_api action failed");
            }
            api.publish(
                topics::SYS_BUNDLE_API_RESPONSE,
                "bundle_api",
                convert::api_response_payload(
                    api.module_id(),
                    &request.request_id,
                    &request.action,
                    outcome,
                ),
            )
        }
    }
}

// ── Command handlers ─────────────────────────────────────────────────

async fn set_config<H: LifecycleHandler>(
    handler: &H,
    api: &ModuleApi,
    config: ConfigMap,
) -> Result<(), CoreError> {
    api.announce_status(BundleStatus::new(BundleState::Validating, "Validating..."))?;

    if let Err(e) = handler.validate_config(&config).await {
        info!(error = %e, "module config rejected");
        return api.announce_status(BundleStatus::new(BundleState::Error, e.message));
    }

    if let Err(e) = api.store().save_module_config(&config) {
        error!(error = %e, "cannot persist module config");
        return api.announce_status(BundleStatus::new(BundleState::Error, e.to_string()));
    }
    api.set_module_config(config.clone());
    info!("module config accepted");
    api.announce_status(BundleStatus::new(BundleState::Ready, "Verified").with_config(config))
}

fn register<H: LifecycleHandler>(
    handler: &H,
    api: &ModuleApi,
    instance: Instance,
) -> Result<(), CoreError> {
    let instance = match handler.preprocessor() {
        Some(preprocessor) => preprocessor.prepare_instance(instance)?,
        None => instance,
    };
    let saved = api.register_instance(instance)?;
    if let Some(observer) = handler.observer() {
        observer.on_instance_registered(&saved);
    }
    Ok(())
}

async fn delete<H: LifecycleHandler>(handler: &H, api: &ModuleApi, id: &str) -> Result<(), CoreError> {
    if let Some(deleter) = handler.deleter() {
        if let Err(e) = deleter.delete_instance(id).await {
            warn!(instance = id, error = %e, "module delete hook failed, removing files anyway");
        }
    }
    api.delete_instance(id)?;
    if let Some(observer) = handler.observer() {
        observer.on_instance_deleted(id);
    }
    Ok(())
}

// ── Generic API envelope ─────────────────────────────────────────────

async fn bundle_api<H: LifecycleHandler>(
    handler: &H,
    api: &ModuleApi,
    request: &ApiRequest,
) -> Result<ConfigMap, ApiActionError> {
    let params = &request.params;
    let mut result = ConfigMap::new();

    match request.action.as_str() {
        "get_config" => {
            result.insert("config".into(), api.module_config().into());
        }
        "get_instance_file" => {
            let id = param_id(params)?;
            let artifact = params
                .get("file_type")
                .and_then(serde_json::Value::as_str)
                .and_then(Artifact::from_file_type)
                .ok_or(ApiActionError::UnsupportedFileType)?;
            let content = api.store().read_artifact(id, artifact)?;
            result.insert("found".into(), content.is_some().into());
            result.insert("content".into(), content.unwrap_or_default().into());
        }
        "set_instance_script" => {
            let id = param_id(params)?;
            let content = params
                .get("content")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            api.store().write_script(id, content)?;
        }
        "get_bundle_manifest" => {
            let manifest = match api.runtime_config().module_dir() {
                Some(dir) => read_manifest(dir)?,
                None => String::new(),
            };
            result.insert("manifest".into(), manifest.into());
        }
        action => {
            let tools = handler
                .tools()
                .filter(|tools| tools.handles(action))
                .ok_or(ApiActionError::UnsupportedAction)?;
            result = tools.invoke(action, params.clone(), api.clone()).await?;
        }
    }
    Ok(result)
}

fn param_id(params: &ConfigMap) -> Result<&str, ApiActionError> {
    params
        .get("id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(ApiActionError::MissingId)
}

/// First manifest file found in the module directory; empty if none.
fn read_manifest(dir: &Path) -> Result<String, CoreError> {
    for name in MANIFEST_FILES {
        let path = dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => return Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::persistence(path, e)),
        }
    }
    Ok(String::new())
}
