//! settle CLI: settle a session snapshot from a JSON file.
//!
//! ## Usage
//!
//! ```bash
//! # Payment plan only
//! settle plan --snapshot friday.json --algorithm minimal_transactions
//!
//! # Full settlement, printed as a narrative
//! settle run --snapshot friday.json --export narrative --proof-out proof.json
//!
//! # Check a stored proof (signed under the same SETTLEMENT_SIGNING_SEED,
//! # or by a key passed with --trusted-key)
//! settle verify --proof proof.json --trusted-key 3b6a27bc...
//! ```
//!
//! ## Exit Codes
//! - 0: Success
//! - 1: Settlement refused or proof invalid
//! - 2: Error (missing files, invalid arguments, etc.)

use anyhow::Context;
use clap::{Parser, Subcommand};
use session_ledger::{InMemorySessionSource, SessionSnapshot};
use settlement::{Algorithm, Config, ExportFormat, MathematicalProof, ProofGenerator, SettlementEngine};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// settle: pooled-stake session settlement
#[derive(Parser)]
#[command(name = "settle")]
#[command(version)]
#[command(about = "Compute, validate and prove the payments that close a game session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults and SETTLEMENT_* env otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the payment plan as JSON
    Plan {
        /// Session snapshot (players + transactions) as JSON
        #[arg(long)]
        snapshot: PathBuf,

        /// Algorithm (direct, greedy, hub_based, balanced_flow, minimal_transactions)
        #[arg(long, value_parser = parse_algorithm)]
        algorithm: Option<Algorithm>,
    },

    /// Optimize, validate and prove, then print an export
    Run {
        /// Session snapshot (players + transactions) as JSON
        #[arg(long)]
        snapshot: PathBuf,

        /// Algorithm (direct, greedy, hub_based, balanced_flow, minimal_transactions)
        #[arg(long, value_parser = parse_algorithm)]
        algorithm: Option<Algorithm>,

        /// Export format (structured, narrative, compact, tabular)
        #[arg(long, default_value = "narrative", value_parser = parse_export)]
        export: ExportFormat,

        /// Write the signed proof here
        #[arg(long)]
        proof_out: Option<PathBuf>,
    },

    /// Verify a stored proof
    Verify {
        /// Proof JSON written by `run --proof-out`
        #[arg(long)]
        proof: PathBuf,

        /// Hex public key to accept besides the configured ones (repeatable)
        #[arg(long = "trusted-key")]
        trusted_keys: Vec<String>,
    },
}

fn parse_algorithm(value: &str) -> Result<Algorithm, String> {
    value.parse().map_err(|e: settlement::Error| e.to_string())
}

fn parse_export(value: &str) -> Result<ExportFormat, String> {
    value.parse().map_err(|e: settlement::Error| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Plan { snapshot, algorithm } => {
            let (engine, session_id) = load(&snapshot, config).await?;
            let result = engine.optimize_session(&session_id, algorithm).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(result.is_valid)
        }
        Commands::Run {
            snapshot,
            algorithm,
            export,
            proof_out,
        } => {
            let (engine, session_id) = load(&snapshot, config).await?;
            let mut report = match engine.settle_session(&session_id, algorithm).await {
                Ok(report) => report,
                Err(e @ settlement::Error::Consistency { .. }) => {
                    eprintln!("settlement refused: {}", e);
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            let payload = engine.export_proof(&mut report.proof, export)?;
            println!("{}", payload);

            if let Some(path) = proof_out {
                std::fs::write(&path, serde_json::to_vec_pretty(&report.proof)?)
                    .with_context(|| format!("writing proof {}", path.display()))?;
                tracing::info!("Proof {} written to {}", report.proof.proof_id, path.display());
            }
            Ok(true)
        }
        Commands::Verify { proof, trusted_keys } => {
            config.proof.trusted_public_keys.extend(trusted_keys);
            let content = std::fs::read_to_string(&proof)
                .with_context(|| format!("reading proof {}", proof.display()))?;
            let proof: MathematicalProof = serde_json::from_str(&content)?;

            let verification = ProofGenerator::new(&config.proof)?.verify(&config.proof, &proof)?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(verification.is_valid)
        }
    }
}

async fn load(path: &Path, config: Config) -> anyhow::Result<(SettlementEngine, settlement::SessionId)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot: SessionSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    let session_id = snapshot.session.session_id.clone();

    let source = InMemorySessionSource::new();
    source.insert_snapshot(snapshot).await;

    let engine = SettlementEngine::new(Arc::new(source), config)?;
    Ok((engine, session_id))
}
