//! Arbiter CLI
//!
//! Reads specialist outputs as JSON and prints the decision as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Run the configured ladder
//! arbiter arbitrate --input outputs.json
//!
//! # Force a single strategy with a TOML config
//! arbiter arbitrate --input outputs.json --config arbiter.toml --method highest-confidence
//!
//! # One consensus round over stdin
//! cat outputs.json | arbiter consensus --input - --method majority-vote
//!
//! # Threshold overrides
//! ARBITER_MIN_CONFIDENCE=0.5 RUST_LOG=arbiter=debug arbiter arbitrate --input outputs.json
//! ```
//!
//! Input format:
//!
//! ```json
//! {
//!   "specialists": [{"id": "logical", "priority": 3, "weight": 1.5}],
//!   "outputs": [{"responder_id": "logical", "value": "A", "confidence": 0.8}]
//! }
//! ```

mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arbiter::{
    collect_candidates, ArbiterConfig, ArbiterEvent, ArbitrationMethod, ConsensusDriver,
    ConsensusMethod, DecisionArbiter, RequestContext,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use input::ArbitrationInput;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select one candidate through the strategy ladder
    Arbitrate {
        /// JSON input file, or `-` for stdin
        #[arg(long)]
        input: PathBuf,

        /// TOML config file (defaults plus ARBITER_* overrides when absent)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run a single strategy instead of the configured ladder
        #[arg(long)]
        method: Option<ArbitrationMethod>,
    },

    /// Measure agreement with the consensus driver
    Consensus {
        /// JSON input file, or `-` for stdin
        #[arg(long)]
        input: PathBuf,

        /// TOML config file (defaults plus ARBITER_* overrides when absent)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Consensus method (overrides `consensus_method`)
        #[arg(long)]
        method: Option<ConsensusMethod>,

        /// Round budget (overrides `max_rounds`)
        #[arg(long)]
        max_rounds: Option<u32>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ArbiterConfig> {
    let config = match path {
        Some(path) => ArbiterConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ArbiterConfig::from_env().context("Invalid ARBITER_* environment")?,
    };
    Ok(config)
}

fn log_event(event: &ArbiterEvent) {
    info!(
        event = event.event_type(),
        confidence = event.confidence(),
        "Engine event"
    );
}

async fn run(command: Command) -> Result<String> {
    match command {
        Command::Arbitrate {
            input,
            config,
            method,
        } => {
            let config = load_config(config.as_ref())?;
            let input = ArbitrationInput::read(&input)?;
            let roster = input.roster();
            let batch = collect_candidates(input.outputs, &roster);
            if !batch.rejected.is_empty() {
                warn!(rejected = batch.rejected.len(), "Some outputs were rejected");
            }

            let arbiter = DecisionArbiter::new(config).with_sink(Arc::new(log_event));
            let result = match method {
                Some(method) => arbiter.arbitrate_with(method, &batch.accepted, &roster)?,
                None => arbiter.arbitrate(&batch.accepted, &roster)?,
            };
            info!("{}", result.summary_line());
            Ok(serde_json::to_string_pretty(&result)?)
        }
        Command::Consensus {
            input,
            config,
            method,
            max_rounds,
        } => {
            let config = load_config(config.as_ref())?;
            let method = method.unwrap_or(config.consensus_method);
            let max_rounds = max_rounds.unwrap_or(config.max_rounds);

            let input = ArbitrationInput::read(&input)?;
            let roster = input.consensus_roster();
            let mut ctx = match &input.session_id {
                Some(session) => RequestContext::new().with_session(session.clone()),
                None => RequestContext::new(),
            };
            let batch = collect_candidates(input.outputs, &roster);
            if !batch.rejected.is_empty() {
                warn!(rejected = batch.rejected.len(), "Some outputs were rejected");
            }

            let token = ctx.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling consensus");
                    token.cancel();
                }
            });

            let driver = ConsensusDriver::new(config).with_sink(Arc::new(log_event));
            let outcome = driver
                .run_consensus_in(&mut ctx, &roster, &batch.accepted, method, max_rounds)
                .await?;
            info!("{}", outcome.summary_line());
            Ok(serde_json::to_string_pretty(&outcome)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arbiter=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = run(args.command).await?;
    println!("{}", output);

    Ok(())
}
