//! `busmod harness`: a development stand-in for the core bus.

use std::io::Write;
use std::time::Duration;

use tracing::info;

use busmod_api::Harness;

use crate::cli::HarnessArgs;
use crate::error::CliError;

/// Upper bound on one recorder wait; the loop simply waits again.
const RECORD_POLL: Duration = Duration::from_secs(60);

pub async fn handle(args: &HarnessArgs) -> Result<(), CliError> {
    let harness = Harness::start(&args.socket)?;
    let mut recorder = harness.recorder();
    info!(socket = %harness.path().display(), "harness listening");

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            event = recorder.next_matching("*", RECORD_POLL) => {
                if let Some(event) = event {
                    writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                    stdout.flush()?;
                }
            }
        }
    }

    info!(clients = harness.client_count(), "harness shutting down");
    harness.shutdown().await;
    Ok(())
}
