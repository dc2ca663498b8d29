// ── Domain model ──
//
// Instances (static record + live state) and the module's bundle status.

pub mod bundle;
pub mod instance;

pub use bundle::{BundleState, BundleStatus};
pub use instance::{ConfigMap, EntitySpec, EntityState, Instance};
pub(crate) use instance::StaticRecord;
