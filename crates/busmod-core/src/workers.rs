// ── Per-instance workers ──
//
// One task per registered instance listening on `commands/<instance_id>`.
// Workers are keyed by instance id so deletion can find and cancel the
// right one; all of them are children of the module's cancellation token.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use busmod_api::{BusClient, Event, Subscription};

use crate::command::InstanceCommand;
use crate::convert::to_payload;
use crate::error::CoreError;
use crate::store::InstanceStore;
use crate::topics::command_topic;

const STATE_RESPONSE: &str = "state_response";

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct WorkerRegistry {
    workers: DashMap<String, Worker>,
}

impl WorkerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start the worker for `id` unless one is already running.
    ///
    /// The subscription is registered before the task is spawned, so a
    /// command published right after this returns is not missed.
    pub(crate) fn start(
        &self,
        id: &str,
        bus: &BusClient,
        store: &Arc<InstanceStore>,
        parent: &CancellationToken,
    ) {
        if parent.is_cancelled() {
            return;
        }
        let spawn = || {
            let cancel = parent.child_token();
            let handle = tokio::spawn(run_worker(
                id.to_owned(),
                bus.subscribe(command_topic(id)),
                bus.clone(),
                Arc::clone(store),
                cancel.clone(),
            ));
            Worker { cancel, handle }
        };

        match self.workers.entry(id.to_owned()) {
            Entry::Occupied(mut slot) => {
                if slot.get().handle.is_finished() {
                    slot.insert(spawn());
                    debug!(instance = id, "instance worker restarted");
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(spawn());
                debug!(instance = id, "instance worker started");
            }
        }
    }

    /// Cancel the worker for `id`. The task is not awaited.
    pub(crate) fn stop(&self, id: &str) {
        if let Some((_, worker)) = self.workers.remove(id) {
            worker.cancel.cancel();
            debug!(instance = id, "instance worker stopped");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Cancel every worker and hand back their join handles.
    pub(crate) fn drain(&self) -> Vec<JoinHandle<()>> {
        let ids: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.workers.remove(&id))
            .map(|(_, worker)| {
                worker.cancel.cancel();
                worker.handle
            })
            .collect()
    }
}

// ── Worker loop ──────────────────────────────────────────────────────

async fn run_worker(
    id: String,
    mut commands: Subscription,
    bus: BusClient,
    store: Arc<InstanceStore>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = commands.recv() => {
                let Some(event) = event else { break };
                handle_instance_command(&id, &event, &bus, &store);
            }
        }
    }
    trace!(instance = %id, "instance worker exited");
}

fn handle_instance_command(id: &str, event: &Event, bus: &BusClient, store: &InstanceStore) {
    let command = match InstanceCommand::decode(event) {
        Ok(command) => command,
        Err(e) => {
            // Module logic may listen on the same topic for its own commands.
            trace!(instance = id, error = %e, "instance command not handled by runtime");
            return;
        }
    };

    match command {
        InstanceCommand::QueryState { reply_to: None } => {
            debug!(instance = id, "query_state without reply_to ignored");
        }
        InstanceCommand::QueryState {
            reply_to: Some(reply_to),
        } => {
            let reply = store
                .load_state(id)
                .and_then(|state| to_payload(&state))
                .and_then(|data| {
                    bus.publish(reply_to.as_str(), STATE_RESPONSE, data)
                        .map_err(CoreError::from)
                });
            if let Err(e) = reply {
                warn!(instance = id, reply_to = %reply_to, error = %e, "query_state failed");
            }
        }
    }
}
