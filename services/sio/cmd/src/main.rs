//! sio client binary.
//!
//! Connects to an event endpoint, logs every inbound event, auto-acks events
//! that ask for one, optionally emits a single event, and tears the client
//! down on Ctrl-C or when the connection closes for good.

use anyhow::Context;
use clap::Parser;
use sio_session::{Client, ConnectionState, EmitRequest, Event, InboundEvent, Payload};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::ClientFileConfig;
use logging::SioLogFormatter;

/// Reconnecting event client
#[derive(Parser, Debug)]
#[command(name = "sio-client", version, about = "Reconnecting event-namespace client")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = "sio.yaml")]
    config: PathBuf,

    /// Endpoint address, e.g. 127.0.0.1:4000
    #[arg(long)]
    address: Option<String>,

    /// Namespace to join
    #[arg(long)]
    namespace: Option<String>,

    /// Auth token for the handshake
    #[arg(long)]
    auth: Option<String>,

    /// Do not reconnect after a lost link
    #[arg(long)]
    no_reconnect: bool,

    /// First reconnect delay, e.g. 500ms
    #[arg(long)]
    reconnect_delay_min: Option<humantime::Duration>,

    /// Reconnect delay cap, e.g. 5s
    #[arg(long)]
    reconnect_delay_max: Option<humantime::Duration>,

    /// Event to emit once connected
    #[arg(long)]
    event: Option<String>,

    /// Text payload for --event
    #[arg(long, default_value = "", requires = "event")]
    data: String,

    /// Ask for an ack to --event within this window, e.g. 5s
    #[arg(long, requires = "event")]
    ack_timeout: Option<humantime::Duration>,

    /// How long to wait for the first connection before emitting
    #[arg(long, default_value = "30s")]
    connect_wait: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply_to(&self, config: &mut ClientFileConfig) {
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(auth) = &self.auth {
            config.auth = Some(auth.clone());
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
        if let Some(delay) = self.reconnect_delay_min {
            config.reconnect_delay_min = delay.into();
        }
        if let Some(delay) = self.reconnect_delay_max {
            config.reconnect_delay_max = delay.into();
        }
    }
}

fn describe(payload: &Payload) -> String {
    match payload {
        Payload::String(text) => format!("{:?}", text),
        Payload::Binary(data) => format!("<{} bytes>", data.len()),
    }
}

fn on_event(event: &InboundEvent) {
    match &event.event {
        Event::Error => component_warn!("events", "error: {}", describe(&event.payload)),
        other => component_info!(
            "events",
            "{} {}{}",
            other,
            describe(&event.payload),
            if event.wants_ack {
                format!(" (ack requested, id {})", event.message_id)
            } else {
                String::new()
            }
        ),
    }

    if event.wants_ack {
        if let Err(e) = event.client.ack(event.message_id, Payload::empty()) {
            component_warn!("events", "auto-ack of {} failed: {}", event.message_id, e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("sio_client={}", args.log_level).parse()?)
        .add_directive(format!("sio_session={}", args.log_level).parse()?)
        .add_directive(format!("sio_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(SioLogFormatter::new("sio".to_string()))
        .init();

    info!("Starting sio client v{}", env!("CARGO_PKG_VERSION"));

    let mut file_config = ClientFileConfig::load_from_file(&args.config)?;
    file_config.apply_environment_overrides();
    args.apply_to(&mut file_config);

    let config = file_config
        .builder()
        .on(on_event)
        .on_ack(|result| match result {
            Ok(payload) => component_info!("acks", "ack received: {}", describe(&payload)),
            Err(e) => component_warn!("acks", "ack failed: {}", e),
        })
        .build();

    let client = Client::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", file_config.address))?;

    let mut states = client.subscribe_state();

    if let Some(event) = &args.event {
        let wait: Duration = args.connect_wait.into();
        tokio::time::timeout(
            wait,
            states.wait_for(|state| matches!(state, ConnectionState::Connected | ConnectionState::Closed)),
        )
        .await
        .context("timed out waiting for the connection")?
        .context("client dropped")?;

        let mut request = EmitRequest::new(event.as_str(), args.data.as_str());
        if let Some(timeout) = args.ack_timeout {
            request = request.with_ack(timeout.into());
        }
        match client.emit(request) {
            Ok(Some(id)) => info!("Emitted {} (ack id {})", event, id),
            Ok(None) => info!("Emitted {}", event),
            Err(e) => component_error!("emit", "emit of {} failed: {}", event, e),
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
        }
        _ = states.wait_for(|state| *state == ConnectionState::Closed) => {
            info!("Connection closed");
        }
    }

    let stats = client.stats();
    info!(
        "Session stats: {} frames in, {} frames out, {} events, {} reconnects",
        stats.frames_received, stats.frames_sent, stats.events_delivered, stats.reconnects
    );

    client.destroy().await;
    Ok(())
}
