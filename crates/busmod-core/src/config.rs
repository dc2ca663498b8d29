// ── Runtime configuration ──
//
// What the runner needs to start: who it is, where its state lives, and
// where the bus is. Built by the binary (from env/file via busmod-config)
// and handed in; core never reads config files other than the module
// config it persists itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;

/// Bus socket path used when none is configured.
pub const DEFAULT_BUS_SOCKET: &str = "bus.sock";

/// How long shutdown waits for loops and module tasks before abandoning them.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Module id; also the `source` stamped on every published event.
    pub module_id: String,
    /// Persistence root (module config + `instances/`).
    pub state_dir: PathBuf,
    /// Unix socket of the bus.
    pub bus_socket: PathBuf,
    /// Install directory holding `module.json` / `bundle.json`, if known.
    pub module_dir: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl RuntimeConfig {
    pub fn new(module_id: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_id: module_id.into(),
            state_dir: state_dir.into(),
            bus_socket: PathBuf::from(DEFAULT_BUS_SOCKET),
            module_dir: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_bus_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.bus_socket = path.into();
        self
    }

    pub fn with_module_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_dir = Some(path.into());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn module_dir(&self) -> Option<&Path> {
        self.module_dir.as_deref()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.module_id.trim().is_empty() {
            return Err(CoreError::Config {
                message: "module id must be set".into(),
            });
        }
        if self.module_id.contains(['/', '*']) {
            return Err(CoreError::Config {
                message: format!("module id '{}' must not contain '/' or '*'", self.module_id),
            });
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(CoreError::Config {
                message: "state directory must be set".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_contract() {
        let cfg = RuntimeConfig::new("hue", "/var/lib/hue");
        assert_eq!(cfg.bus_socket, PathBuf::from("bus.sock"));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert!(cfg.module_dir().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_identity() {
        assert!(RuntimeConfig::new("", "/tmp/x").validate().is_err());
        assert!(RuntimeConfig::new("hue", "").validate().is_err());
        assert!(RuntimeConfig::new("a/b", "/tmp/x").validate().is_err());
    }
}
