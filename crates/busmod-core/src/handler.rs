// ── Module handler contract ──
//
// What a module author implements. `LifecycleHandler` is mandatory; the
// capability traits are optional and exposed through accessor methods
// that default to `None`, so the runner only calls what a module actually
// provides.

use std::future::Future;

use futures_util::future::BoxFuture;

use crate::api::ModuleApi;
use crate::error::HandlerError;
use crate::model::{ConfigMap, Instance};

/// Mandatory module callbacks plus optional capability lookups.
pub trait LifecycleHandler: Send + Sync + 'static {
    /// Check a proposed module config. The error message is announced
    /// verbatim in the `error` bundle status.
    fn validate_config(
        &self,
        config: &ConfigMap,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;

    /// Called once after connecting and again on `execute_init`.
    fn init(&self, api: ModuleApi) -> impl Future<Output = Result<(), HandlerError>> + Send;

    /// Called during shutdown, after loops and module tasks have been given
    /// their grace period.
    fn stop(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn observer(&self) -> Option<&dyn InstanceObserver> {
        None
    }

    fn preprocessor(&self) -> Option<&dyn InstancePreprocessor> {
        None
    }

    fn deleter(&self) -> Option<&dyn InstanceDeleter> {
        None
    }

    fn discoverer(&self) -> Option<&dyn DeviceDiscoverer> {
        None
    }

    fn tools(&self) -> Option<&dyn ToolProvider> {
        None
    }
}

// ── Capabilities ─────────────────────────────────────────────────────

/// Told about instances after they are persisted or removed.
pub trait InstanceObserver: Send + Sync {
    fn on_instance_registered(&self, instance: &Instance);

    fn on_instance_deleted(&self, id: &str);
}

/// Rewrites a registration payload before it is persisted. An error
/// aborts the registration.
pub trait InstancePreprocessor: Send + Sync {
    fn prepare_instance(&self, instance: Instance) -> Result<Instance, HandlerError>;
}

/// Releases device-side resources before the instance's files go away.
pub trait InstanceDeleter: Send + Sync {
    fn delete_instance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Runs on a `discover` command, as a tracked background task.
pub trait DeviceDiscoverer: Send + Sync {
    fn discover<'a>(&'a self, params: ConfigMap, api: ModuleApi) -> BoxFuture<'a, ()>;
}

/// Extra `bundle_api` actions beyond the built-in ones.
pub trait ToolProvider: Send + Sync {
    fn handles(&self, action: &str) -> bool;

    fn invoke<'a>(
        &'a self,
        action: &'a str,
        params: ConfigMap,
        api: ModuleApi,
    ) -> BoxFuture<'a, Result<ConfigMap, HandlerError>>;
}
