//! `busmod listen`: print matching events as JSON lines.

use std::io::Write;

use tracing::info;

use busmod_api::BusClient;
use busmod_config::Settings;

use crate::cli::ListenArgs;
use crate::error::CliError;

const LISTENER_SOURCE: &str = "busmod-listen";

pub async fn handle(args: ListenArgs, settings: &Settings) -> Result<(), CliError> {
    let socket = super::socket_or_configured(args.socket, settings);
    let client = BusClient::connect(&socket, LISTENER_SOURCE).await?;
    let mut subscription = client.subscribe(args.pattern.as_str());
    info!(pattern = %args.pattern, "listening");

    let mut stdout = std::io::stdout();
    let mut seen = 0usize;
    let result = loop {
        if args.count.is_some_and(|limit| seen >= limit) {
            break Ok(());
        }
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = subscription.recv() => {
                let Some(event) = event else {
                    break Err(CliError::BusClosed);
                };
                writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                stdout.flush()?;
                seen += 1;
            }
        }
    };

    client.close().await;
    result
}
