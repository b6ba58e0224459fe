// In main.rs, panicking on a startup failure is acceptable: there is no
// caller to hand the error back to, and anyhow's Display gives a readable
// message in the log.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Digest engine entry point: config loading, tracing init, and the
//! run/tune/migrate subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use digest_core::clock::SystemClock;
use digest_core::Config;
use digest_llm::mock::MockProvider;
use digest_llm::LlmGateway;
use digest_pipeline::{NoopLinkEnricher, PipelineWorker};
use digest_scheduler::{DigestScheduler, NoopPoster};
use digest_store::{InMemoryStore, Store};
use digest_tuners::TunerRunner;

#[derive(Parser)]
#[command(name = "digest-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ingest, score, and digest chat channel activity")]
struct Cli {
    /// Path to a TOML config file; built-in defaults fill anything absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the pipeline worker and digest scheduler until interrupted.
    Run,
    /// Runs the three weekly adaptive-tuning jobs once and exits.
    Tune,
    /// Applies the store's schema migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Tune => tune(config).await,
        Commands::Migrate => migrate(config).await,
    }
}

/// The real chat-platform provider and Postgres backing store are external
/// collaborators outside this engine's scope; the in-memory store and a
/// canned-response provider stand in for them here so `run`/`tune` are
/// always runnable end to end.
fn build_store() -> Arc<dyn Store> {
    Arc::new(InMemoryStore::default())
}

fn build_gateway(config: &Config) -> Arc<LlmGateway> {
    Arc::new(LlmGateway::new(
        Box::new(MockProvider::new()),
        config.rate_limit_rps,
    ))
}

async fn run(config: Config) -> Result<()> {
    let store = build_store();
    let gateway = build_gateway(&config);
    let clock = Arc::new(SystemClock);

    let worker = PipelineWorker::new(
        store.clone(),
        gateway.clone(),
        config.clone(),
        clock.clone(),
        Arc::new(NoopLinkEnricher),
    );
    let scheduler = DigestScheduler::new(
        store.clone(),
        gateway.clone(),
        Arc::new(NoopPoster),
        Arc::new(NoopPoster),
        config,
        clock,
    );

    tracing::info!("starting pipeline worker and digest scheduler");
    tokio::join!(worker.run(), scheduler.run());
    Ok(())
}

async fn tune(config: Config) -> Result<()> {
    let store = build_store();
    let runner = TunerRunner::new(store, config);
    tracing::info!("running weekly adaptive-tuning jobs");
    runner.run_all().await;
    Ok(())
}

async fn migrate(_config: Config) -> Result<()> {
    tracing::info!("no migrations to apply: the in-memory store has no schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["digest-engine", "run"]).expect("parse run");
        assert!(matches!(cli.command, Commands::Run));

        let cli = Cli::try_parse_from(["digest-engine", "--config", "x.toml", "tune"])
            .expect("parse tune with config");
        assert!(matches!(cli.command, Commands::Tune));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn clap_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["digest-engine", "bogus"]).is_err());
    }
}
