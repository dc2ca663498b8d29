mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use busmod_config::{ConfigError, Settings};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Settings are read before tracing starts so LOG_LEVEL can pick the
    // default filter. Commands that need them report a load failure.
    let settings = busmod_config::load_settings(cli.global.config.as_deref());
    let log_level = settings.as_ref().ok().map(|s| s.log_level.as_str());
    init_tracing(cli.global.verbose, log_level, cli.global.log_format);

    if let Err(err) = run(cli, settings).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins, then `-v` flags, then the configured log level.
fn init_tracing(verbosity: u8, log_level: Option<&str>, format: LogFormat) {
    let fallback = match verbosity {
        0 => log_level.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli, settings: Result<Settings, ConfigError>) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "busmod", &mut std::io::stdout());
            Ok(())
        }

        Command::Man(args) => commands::man::handle(&args, &Cli::command()),

        // The harness is the bus; it needs no module settings.
        Command::Harness(args) => commands::harness::handle(&args).await,

        Command::Config(args) => commands::config_cmd::handle(&args, &cli.global, &settings?),

        Command::Run(args) => commands::run::handle(args, settings?).await,
        Command::Publish(args) => commands::publish::handle(args, &settings?).await,
        Command::Listen(args) => commands::listen::handle(args, &settings?).await,
    }
}
