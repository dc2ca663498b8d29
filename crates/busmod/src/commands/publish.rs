//! `busmod publish`: send one event and exit.

use tracing::debug;

use busmod_api::{BusClient, Event, Payload};
use busmod_config::Settings;

use crate::cli::PublishArgs;
use crate::error::CliError;

pub async fn handle(args: PublishArgs, settings: &Settings) -> Result<(), CliError> {
    let data = parse_data(args.data.as_deref())?;
    let socket = super::socket_or_configured(args.socket, settings);

    let client = BusClient::connect(&socket, args.source).await?;
    let event = Event::new(args.topic, args.kind).with_data(data);
    debug!(topic = %event.topic, kind = %event.kind, "publishing one event");
    client.send(event)?;
    // close() writes queued events before shutting the socket.
    client.close().await;
    Ok(())
}

/// `--data` must be a JSON object; absent means an empty payload.
fn parse_data(raw: Option<&str>) -> Result<Payload, CliError> {
    let Some(raw) = raw else {
        return Ok(Payload::new());
    };
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: "data".into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}
