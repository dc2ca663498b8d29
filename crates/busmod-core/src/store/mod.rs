// ── Persistence layer ──
//
// Filesystem-backed instance records, live state, and module config.

mod artifact;
mod instance_store;

pub use artifact::Artifact;
pub use instance_store::InstanceStore;
