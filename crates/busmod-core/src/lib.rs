//! Module runtime between `busmod-api` and module code.
//!
//! A module implements [`LifecycleHandler`] (plus any optional capability
//! traits) and hands it to [`run`]. The runtime then:
//!
//! - **connects** to the bus via [`busmod_api::BusClient`] and announces
//!   the module's [`BundleStatus`] on `sys/bundle_status`;
//!
//! - **persists** instances through the [`InstanceStore`]: a static record
//!   and a separate live-state document per instance, plus the module
//!   config, all as JSON files under the state directory;
//!
//! - **dispatches** `commands/<module_id>` one at a time: config get/set,
//!   instance register/delete/alias, discovery, and the generic
//!   `bundle_api` request/response envelope;
//!
//! - **serves** `query_state` on `commands/<instance_id>` from one worker
//!   per instance;
//!
//! - **shuts down** on signal or bus loss, giving loops and module tasks a
//!   grace period before abandoning them.
//!
//! Module code talks back through the cloneable [`ModuleApi`].

pub mod api;
pub mod command;
pub mod config;
mod convert;
pub mod error;
pub mod handler;
pub mod id;
pub mod model;
pub mod runner;
pub mod store;
pub mod topics;
mod workers;

// ── Primary re-exports ──────────────────────────────────────────────
pub use api::ModuleApi;
pub use command::{ApiActionError, ApiRequest, Command, CommandError, InstanceCommand};
pub use config::RuntimeConfig;
pub use error::{CoreError, HandlerError};
pub use handler::{
    DeviceDiscoverer, InstanceDeleter, InstanceObserver, InstancePreprocessor, LifecycleHandler,
    ToolProvider,
};
pub use model::{BundleState, BundleStatus, ConfigMap, EntitySpec, EntityState, Instance};
pub use runner::{run, run_until, shutdown_signal};
pub use store::{Artifact, InstanceStore};

// Capability traits return boxed futures.
pub use futures_util::future::BoxFuture;
