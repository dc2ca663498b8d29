// ── Module API ──
//
// The context object handed to module code: bus access, instance
// operations that keep the store and the bus announcements in step,
// bundle status, and tracked background tasks. Cheap to clone.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use busmod_api::{BusClient, Payload, Subscription, TopicPattern};

use crate::config::RuntimeConfig;
use crate::convert;
use crate::error::CoreError;
use crate::model::{BundleState, BundleStatus, ConfigMap, EntityState, Instance};
use crate::store::InstanceStore;
use crate::topics;
use crate::workers::WorkerRegistry;

const BUNDLE_STATUS: &str = "bundle_status";
const REGISTER: &str = "register";
const UNREGISTER: &str = "unregister";
const STATE: &str = "state";

#[derive(Clone)]
pub struct ModuleApi {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    config: RuntimeConfig,
    bus: BusClient,
    store: Arc<InstanceStore>,
    /// Active module config. Replaced wholesale; readers take a copy.
    module_config: ArcSwap<ConfigMap>,
    status: watch::Sender<BundleStatus>,
    cancel: CancellationToken,
    workers: WorkerRegistry,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ModuleApi {
    pub(crate) fn new(
        config: RuntimeConfig,
        bus: BusClient,
        store: Arc<InstanceStore>,
        module_config: ConfigMap,
        status: BundleStatus,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            inner: Arc::new(ApiInner {
                config,
                bus,
                store,
                module_config: ArcSwap::from_pointee(module_config),
                status,
                cancel,
                workers: WorkerRegistry::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.inner.config.module_id
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &BusClient {
        &self.inner.bus
    }

    // ── Publish / subscribe ──────────────────────────────────────────

    pub fn publish(&self, topic: &str, kind: &str, data: Payload) -> Result<(), CoreError> {
        Ok(self.inner.bus.publish(topic, kind, data)?)
    }

    pub fn subscribe(&self, pattern: impl Into<TopicPattern>) -> Subscription {
        self.inner.bus.subscribe(pattern)
    }

    // ── Instances ────────────────────────────────────────────────────

    /// Persist an instance, make sure its worker runs, and announce it on
    /// `sys/register`. Returns the stored instance (with its id).
    ///
    /// The worker is subscribed before the announcement goes out, so
    /// anyone reacting to `sys/register` can query the instance at once.
    /// Handler hooks are not involved here; the runner applies them around
    /// bus-driven registrations.
    pub fn register_instance(&self, instance: Instance) -> Result<Instance, CoreError> {
        if instance.id == self.module_id() {
            // Its worker would share `commands/<module_id>` with the dispatch loop.
            return Err(CoreError::InvalidInstanceId {
                id: instance.id,
                reason: "same as the module id".into(),
            });
        }
        let saved = self.inner.store.register(instance)?;
        self.start_worker(&saved.id);
        self.publish(
            topics::SYS_REGISTER,
            REGISTER,
            convert::register_payload(self.module_id(), &saved)?,
        )?;
        info!(instance = %saved.id, name = %saved.display_name(), "instance registered");
        Ok(saved)
    }

    /// Replace the live state and publish it once on `state/<id>`.
    pub fn update_state(&self, id: &str, state: &EntityState) -> Result<(), CoreError> {
        self.inner.store.update_state(id, state)?;
        self.publish(
            &topics::state_topic(id),
            STATE,
            convert::state_payload(self.module_id(), id, state)?,
        )
    }

    /// Merge entity values into the live state. Publishes the merged
    /// document on `state/<id>` and each patched entity on
    /// `state/<id>/<entity_id>`.
    pub fn patch_entities(&self, id: &str, patch: &EntityState) -> Result<EntityState, CoreError> {
        let merged = self.inner.store.patch_entities(id, patch)?;
        self.publish(
            &topics::state_topic(id),
            STATE,
            convert::state_payload(self.module_id(), id, &merged)?,
        )?;
        for entity_id in patch.keys() {
            let Some(values) = merged.get(entity_id) else {
                continue;
            };
            self.publish(
                &topics::entity_state_topic(id, entity_id),
                STATE,
                convert::entity_state_payload(self.module_id(), id, entity_id, values),
            )?;
        }
        Ok(merged)
    }

    /// Remove every artifact for `id` and stop its worker. `sys/unregister`
    /// goes out only when the files are confirmed gone.
    pub fn delete_instance(&self, id: &str) -> Result<(), CoreError> {
        let removed = self.inner.store.delete(id);
        self.inner.workers.stop(id);
        removed?;
        self.publish(
            topics::SYS_UNREGISTER,
            UNREGISTER,
            convert::unregister_payload(self.module_id(), id),
        )
    }

    pub fn instances(&self) -> Result<Vec<Instance>, CoreError> {
        self.inner.store.list()
    }

    pub fn instance(&self, id: &str) -> Result<Option<Instance>, CoreError> {
        self.inner.store.get(id)
    }

    pub fn load_state(&self, id: &str) -> Result<EntityState, CoreError> {
        self.inner.store.load_state(id)
    }

    // ── Module config ────────────────────────────────────────────────

    /// Copy of the active module config.
    pub fn module_config(&self) -> ConfigMap {
        ConfigMap::clone(&self.inner.module_config.load())
    }

    pub(crate) fn set_module_config(&self, config: ConfigMap) {
        self.inner.module_config.store(Arc::new(config));
    }

    // ── Bundle status ────────────────────────────────────────────────

    pub fn bundle_status(&self) -> BundleStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_bundle_status(&self) -> watch::Receiver<BundleStatus> {
        self.inner.status.subscribe()
    }

    pub fn bundle_status_stream(&self) -> WatchStream<BundleStatus> {
        WatchStream::new(self.inner.status.subscribe())
    }

    /// Move to `state` (typically `starting` or `active`) and announce it.
    ///
    /// Rejects moves the bundle state table does not allow. The check and
    /// the swap are one step under the watch lock; nothing is published
    /// for a rejected move.
    pub fn set_bundle_status(
        &self,
        state: BundleState,
        message: impl Into<String>,
    ) -> Result<(), CoreError> {
        let next = BundleStatus::new(state, message);
        let payload = convert::status_payload(self.module_id(), &next)?;

        let mut rejected_from = None;
        self.inner.status.send_if_modified(|current| {
            if current.state.can_transition_to(state) {
                *current = next;
                true
            } else {
                rejected_from = Some(current.state);
                false
            }
        });
        if let Some(from) = rejected_from {
            return Err(CoreError::InvalidTransition { from, to: state });
        }

        debug!(state = %state, "bundle status");
        self.publish(topics::SYS_BUNDLE_STATUS, BUNDLE_STATUS, payload)
    }

    /// Record and announce a status without checking the transition.
    pub(crate) fn announce_status(&self, status: BundleStatus) -> Result<(), CoreError> {
        debug!(state = %status.state, message = %status.message, "bundle status");
        let payload = convert::status_payload(self.module_id(), &status)?;
        self.inner.status.send_replace(status);
        self.publish(topics::SYS_BUNDLE_STATUS, BUNDLE_STATUS, payload)
    }

    // ── Tasks and shutdown ───────────────────────────────────────────

    /// Token cancelled when the module shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Spawn a module task that shutdown will wait for (within the grace
    /// period). The task should watch [`Self::cancellation`].
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    // ── Runner internals ─────────────────────────────────────────────

    pub(crate) fn store(&self) -> &Arc<InstanceStore> {
        &self.inner.store
    }

    pub(crate) fn workers(&self) -> &WorkerRegistry {
        &self.inner.workers
    }

    pub(crate) fn start_worker(&self, id: &str) {
        self.inner.workers.start(
            id,
            &self.inner.bus,
            &self.inner.store,
            &self.inner.cancel,
        );
    }

    pub(crate) fn take_task_handles(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *handles)
    }
}

impl std::fmt::Debug for ModuleApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleApi")
            .field("module_id", &self.inner.config.module_id)
            .field("state", &self.inner.status.borrow().state)
            .finish_non_exhaustive()
    }
}
