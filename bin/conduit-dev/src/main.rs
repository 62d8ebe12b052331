//! Conduit Development Runner
//!
//! Loads a configuration, builds the mediation engine and pushes JSON messages
//! through it:
//! - Messages are read from a file or stdin (one object or an array)
//! - Every message is processed on its own task under the configured timeout
//! - Dispatches and per-message outcomes are printed as JSON lines

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use conduit_cluster::RedisCursorFactory;
use conduit_common::{InboundMessage, MediationContext};
use conduit_config::{AppConfig, ConfigLoader};
use conduit_mediation::{ChannelSender, CursorFactory, LocalCursorFactory, MediationEngine, Outcome};

/// Conduit Development Runner
#[derive(Parser, Debug)]
#[command(name = "conduit-dev")]
#[command(about = "Run JSON messages through a Conduit mediation pipeline")]
struct Args {
    /// Configuration file (searched in the standard locations when omitted)
    #[arg(short, long, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Message file holding one message or an array of messages; "-" reads stdin
    #[arg(short, long, default_value = "-")]
    messages: String,

    /// Process every message this many times
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,
}

/// Per-message report printed once processing ends
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    message_id: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    sent_to: Vec<String>,
    properties: serde_json::Map<String, Value>,
}

impl Report {
    fn new(ctx: &MediationContext, outcome: Option<Outcome>) -> Self {
        let (outcome, error) = match outcome {
            Some(Outcome::Completed) => ("completed", None),
            Some(Outcome::Stopped) => ("stopped", None),
            Some(Outcome::Faulted(message)) => ("faulted", Some(message)),
            None => ("timed_out", None),
        };

        Self {
            message_id: ctx.message_id().to_string(),
            outcome,
            error,
            sent_to: ctx.sent_to().to_vec(),
            properties: ctx
                .properties()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging (JSON if LOG_FORMAT=json, text otherwise)
    conduit_common::logging::init_logging("conduit-dev");

    let args = Args::parse();

    if args.example_config {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;

    info!(
        main_sequence = %config.mediation.main_sequence,
        sequences = config.sequences.len(),
        cluster = config.cluster.enabled,
        "Starting Conduit dev runner"
    );

    let cursors: Box<dyn CursorFactory> = if config.cluster.enabled {
        Box::new(RedisCursorFactory::connect(&config.cluster).await?)
    } else {
        Box::new(LocalCursorFactory)
    };

    let (sender, mut dispatches) = ChannelSender::new();
    let engine = Arc::new(MediationEngine::from_config(&config, Arc::new(sender), cursors.as_ref())?);

    let printer = tokio::spawn(async move {
        while let Some(dispatch) = dispatches.recv().await {
            match serde_json::to_string(&dispatch) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize dispatch"),
            }
        }
    });

    let messages = read_messages(&args.messages)?;
    let timeout = Duration::from_millis(config.mediation.message_timeout_ms);
    info!(messages = messages.len(), repeat = args.repeat, "Processing messages");

    let mut handles = Vec::new();
    for _ in 0..args.repeat {
        for message in &messages {
            let engine = Arc::clone(&engine);
            let mut ctx = MediationContext::from_inbound(message.clone());

            handles.push(tokio::spawn(async move {
                let outcome = tokio::time::timeout(timeout, engine.process(&mut ctx)).await.ok();
                if outcome.is_none() {
                    warn!(message_id = %ctx.message_id(), "Message timed out");
                }
                Report::new(&ctx, outcome)
            }));
        }
    }

    for handle in handles {
        let report = handle.await.context("message task panicked")?;
        println!("{}", serde_json::to_string(&report)?);
    }

    // Closing the last sender ends the printer
    drop(engine);
    printer.await.context("dispatch printer panicked")?;

    info!("Conduit dev runner finished");
    Ok(())
}

fn read_messages(source: &str) -> Result<Vec<InboundMessage>> {
    let text = if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read messages from stdin")?;
        text
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {}", source))?
    };

    let value: Value = serde_json::from_str(&text).context("messages are not valid JSON")?;
    let messages = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<InboundMessage>, _>>()?,
        single => vec![serde_json::from_value(single)?],
    };

    Ok(messages)
}
