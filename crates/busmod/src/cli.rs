//! Clap derive structures for the `busmod` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "busmod",
    version,
    about = "Run and exercise event-bus modules",
    long_about = "Runs a module against the core event bus, or stands in for the bus\n\
        itself during development.\n\n\
        Module settings come from defaults, an optional TOML file, the launch\n\
        environment (MODULE_ID, STATE_DIR, BUS_SOCKET, MODULE_DIR, LOG_LEVEL)\n\
        and finally command-line flags.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, env = "BUSMOD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reference module until interrupted or the bus goes away
    Run(RunArgs),

    /// Serve a development bus that relays every event to all other clients
    Harness(HarnessArgs),

    /// Publish a single event
    Publish(PublishArgs),

    /// Print events whose topic matches a pattern
    Listen(ListenArgs),

    /// Inspect resolved settings
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Write roff man pages for busmod and each subcommand
    Man(ManArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Module id (overrides MODULE_ID)
    #[arg(long)]
    pub module_id: Option<String>,

    /// Persistence root (overrides STATE_DIR)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Bus socket path (overrides BUS_SOCKET)
    #[arg(long)]
    pub bus_socket: Option<PathBuf>,

    /// Install directory holding module.json (overrides MODULE_DIR)
    #[arg(long)]
    pub module_dir: Option<PathBuf>,

    /// Config key that set_config must provide; repeatable
    #[arg(long = "require-key", value_name = "KEY")]
    pub require_keys: Vec<String>,

    /// Seconds between heartbeat log lines
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Args)]
pub struct HarnessArgs {
    /// Socket path to listen on (a stale file is replaced)
    #[arg(long)]
    pub socket: PathBuf,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Bus socket path (defaults to the configured one)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Event topic
    #[arg(long)]
    pub topic: String,

    /// Event type
    #[arg(long = "type", value_name = "TYPE")]
    pub kind: String,

    /// JSON object carried as the event payload
    #[arg(long)]
    pub data: Option<String>,

    /// Source stamped on the event
    #[arg(long, default_value = "busmod-cli")]
    pub source: String,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Bus socket path (defaults to the configured one)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Topic pattern: exact, `*`, or a `prefix/*` wildcard
    #[arg(long, default_value = "*")]
    pub pattern: String,

    /// Exit after this many events
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved settings as TOML
    Show,

    /// Print the settings file path in use
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Args)]
pub struct ManArgs {
    /// Directory to write `busmod.1`, `busmod-run.1`, ... into
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}
