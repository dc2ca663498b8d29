pub mod config_cmd;
pub mod harness;
pub mod listen;
pub mod man;
pub mod publish;
pub mod run;

use std::path::PathBuf;

use busmod_config::Settings;

/// An explicit `--socket`, else the configured bus socket.
fn socket_or_configured(socket: Option<PathBuf>, settings: &Settings) -> PathBuf {
    socket.unwrap_or_else(|| settings.bus_socket.clone())
}
