//! Settings for a busmod module process.
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then the environment contract modules are launched with (`MODULE_ID`,
//! `STATE_DIR`, `BUS_SOCKET`, `MODULE_DIR`, `LOG_LEVEL`), then
//! `BUSMOD_`-prefixed variables. The binary applies CLI flags on top and
//! translates the result into `busmod_core::RuntimeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use busmod_core::RuntimeConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BUSMOD_CONFIG";

/// Unprefixed variables set by the core when it launches a module.
const LAUNCH_ENV: [&str; 5] = ["MODULE_ID", "STATE_DIR", "BUS_SOCKET", "MODULE_DIR", "LOG_LEVEL"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Module id; required.
    #[serde(default)]
    pub module_id: String,

    /// Persistence root for module config and instances.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Unix socket of the core bus.
    #[serde(default = "default_bus_socket")]
    pub bus_socket: PathBuf,

    /// Install directory holding the module manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_dir: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module_id: String::new(),
            state_dir: default_state_dir(),
            bus_socket: default_bus_socket(),
            module_dir: None,
            log_level: default_log_level(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_bus_socket() -> PathBuf {
    PathBuf::from(busmod_core::config::DEFAULT_BUS_SOCKET)
}
fn default_log_level() -> String {
    "info".into()
}
fn default_shutdown_grace_secs() -> u64 {
    busmod_core::config::DEFAULT_SHUTDOWN_GRACE.as_secs()
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "module_id".into(),
                reason: "must be set (MODULE_ID)".into(),
            });
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                field: "state_dir".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.bus_socket.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                field: "bus_socket".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Validate and convert into what the runner consumes.
    pub fn to_runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        self.validate()?;
        let mut config = RuntimeConfig::new(self.module_id.trim(), &self.state_dir)
            .with_bus_socket(&self.bus_socket)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace_secs));
        if let Some(ref dir) = self.module_dir {
            config = config.with_module_dir(dir);
        }
        config.validate().map_err(|e| ConfigError::Validation {
            field: "module_id".into(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the default config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "busmod", "busmod").map_or_else(
        || PathBuf::from(".busmod").join("busmod.toml"),
        |dirs| dirs.config_dir().join("busmod.toml"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from defaults, the config file and the environment.
///
/// `explicit` (a `--config` flag) wins over `BUSMOD_CONFIG`, which wins
/// over the platform default. A missing file is not an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = explicit.map_or_else(
        || std::env::var_os(CONFIG_ENV).map_or_else(config_path, PathBuf::from),
        Path::to_path_buf,
    );
    let settings: Settings = figment(&path).extract()?;
    Ok(settings)
}

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::raw().only(&LAUNCH_ENV))
        .merge(Env::prefixed("BUSMOD_").ignore(&["CONFIG"]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let settings = load_settings(Some(&jail.directory().join("absent.toml"))).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.bus_socket, PathBuf::from("bus.sock"));
            assert_eq!(settings.shutdown_grace_secs, 2);
            assert!(settings.validate().is_err());
            Ok(())
        });
    }

    #[test]
    fn file_then_launch_env_then_prefixed_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "busmod.toml",
                r#"
                module_id = "from-file"
                state_dir = "/var/lib/file"
                log_level = "debug"
                shutdown_grace_secs = 5
                "#,
            )?;
            jail.set_env("MODULE_ID", "hue");
            jail.set_env("BUS_SOCKET", "/run/core/bus.sock");
            jail.set_env("BUSMOD_LOG_LEVEL", "trace");

            let settings = load_settings(Some(Path::new("busmod.toml"))).unwrap();
            assert_eq!(settings.module_id, "hue");
            assert_eq!(settings.state_dir, PathBuf::from("/var/lib/file"));
            assert_eq!(settings.bus_socket, PathBuf::from("/run/core/bus.sock"));
            assert_eq!(settings.log_level, "trace");
            assert_eq!(settings.shutdown_grace_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn config_env_points_at_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("custom.toml", "module_id = \"zigbee\"")?;
            jail.set_env(CONFIG_ENV, "custom.toml");

            let settings = load_settings(None).unwrap();
            assert_eq!(settings.module_id, "zigbee");
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_a_figment_error() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("bad.toml", "shutdown_grace_secs = \"soon\"")?;
            let err = load_settings(Some(Path::new("bad.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::Figment(_)));
            Ok(())
        });
    }

    #[test]
    fn runtime_config_translation() {
        let settings = Settings {
            module_id: "hue".into(),
            state_dir: "/tmp/hue".into(),
            module_dir: Some("/opt/modules/hue".into()),
            shutdown_grace_secs: 7,
            ..Settings::default()
        };
        let config = settings.to_runtime_config().unwrap();
        assert_eq!(config.module_id, "hue");
        assert_eq!(config.shutdown_grace, Duration::from_secs(7));
        assert_eq!(config.module_dir(), Some(Path::new("/opt/modules/hue")));
    }

    #[test]
    fn runtime_config_requires_usable_module_id() {
        let settings = Settings {
            module_id: "a/b".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.to_runtime_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn toml_rendering_skips_unset_module_dir() {
        let text = Settings::default().to_toml().unwrap();
        assert!(text.contains("bus_socket = \"bus.sock\""));
        assert!(!text.contains("module_dir"));
    }
}
