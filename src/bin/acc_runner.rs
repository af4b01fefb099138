// src/bin/acc_runner.rs
//
// acc-runner: cron-driven SQL job runner (standalone process).
//
// This binary is intentionally focused on:
// - wiring datasources from CLI/env into the engine
// - booting the scheduling loop
// - graceful shutdown via SIGINT/SIGTERM
//
// Example:
//   acc-runner --database-url postgres://127.0.0.1/app \
//              --datasource anasa-db=postgres://127.0.0.1/anasa
//
// Notes:
// - Job definitions are managed by the embedding CRUD layer; this process
//   only schedules and runs them.
// - `--init-schema` creates the two backing tables if they are missing.

use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use acc_runner::{DataSourceDef, Engine, EngineConfig, OverlapPolicy};

#[derive(Parser, Debug)]
#[command(name = "acc-runner", version, about = "Cron-driven SQL job runner")]
struct Args {
    /// Primary Postgres URL: backs job definitions and execution history,
    /// and doubles as a query target under --database-name.
    #[arg(long, env = "ACC_RUNNER_DATABASE_URL", default_value = "postgres://127.0.0.1:5432/acc_runner")]
    database_url: String,

    /// Logical name the primary datasource is registered under.
    #[arg(long, default_value = "primary-db")]
    database_name: String,

    /// Additional named datasources, repeatable:
    ///   --datasource anasa-db=postgres://127.0.0.1/anasa
    #[arg(long = "datasource")]
    datasources: Vec<String>,

    /// Scheduling tick period in seconds (ticks align to minute boundaries)
    #[arg(long, default_value_t = 60)]
    tick_secs: u64,

    /// IANA timezone for cron evaluation
    #[arg(long, env = "ACC_RUNNER_TZ", default_value = "UTC")]
    timezone: String,

    /// Fetch cap for SELECT results
    #[arg(long, default_value_t = 10_000)]
    max_fetch_rows: usize,

    /// Policy for a trigger hitting an already-running job: skip | allow
    #[arg(long, default_value = "skip")]
    overlap: OverlapPolicy,

    /// Create the scheduled_jobs / execution_history tables if missing
    #[arg(long, default_value_t = false)]
    init_schema: bool,

    /// Grace period before exit after shutdown signal
    #[arg(long, default_value_t = 5)]
    shutdown_grace_secs: u64,
}

fn parse_datasources(specs: &[String]) -> anyhow::Result<Vec<DataSourceDef>> {
    specs
        .iter()
        .map(|raw| {
            let (name, url) = raw
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected name=url, got '{raw}'"))?;
            Ok(DataSourceDef::new(name.trim(), url.trim()))
        })
        .collect()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id              BIGSERIAL PRIMARY KEY,
    job_name        TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    target_db_name  TEXT NOT NULL,
    sql_query       TEXT NOT NULL,
    description     TEXT,
    active          BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE TABLE IF NOT EXISTS execution_history (
    id               BIGSERIAL PRIMARY KEY,
    scheduled_job_id BIGINT REFERENCES scheduled_jobs(id),
    job_name         TEXT NOT NULL,
    start_time       TIMESTAMPTZ NOT NULL,
    end_time         TIMESTAMPTZ,
    status           TEXT NOT NULL,
    message          TEXT,
    duration_ms      BIGINT
);
CREATE INDEX IF NOT EXISTS idx_execution_history_start_time
    ON execution_history (start_time DESC);
"#;

async fn init_schema(url: &str) -> anyhow::Result<()> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;
    for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(&pool).await?;
    }
    pool.close().await;
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (local convenience)
    if let Ok(path) = dotenvy::dotenv() {
        println!("Loaded .env from: {}", path.display());
    }

    // Tracing (respects RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.init_schema {
        info!("Initializing schema");
        init_schema(&args.database_url).await?;
    }

    let mut config = EngineConfig::new(DataSourceDef::new(
        args.database_name.clone(),
        args.database_url.clone(),
    ));
    config.datasources = parse_datasources(&args.datasources)?;
    config.tick_secs = args.tick_secs;
    config.timezone = args.timezone.clone();
    config.max_fetch_rows = args.max_fetch_rows;
    config.overlap = args.overlap;

    if config.datasources.is_empty() {
        warn!("No secondary datasources configured; jobs can only target {}", args.database_name);
    }

    info!(
        primary = %args.database_name,
        datasources = args.datasources.len(),
        tick_secs = args.tick_secs,
        "Starting acc-runner"
    );

    let engine = Engine::new(config)?;
    engine.start();

    info!("acc-runner running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    return;
                }
            }
            std::future::pending::<()>().await
        } => {}
    }

    // Stop the scheduling loop; in-flight runs finish on their own
    engine.shutdown();

    let grace = Duration::from_secs(args.shutdown_grace_secs);
    info!(?grace, "Waiting for graceful shutdown");
    tokio::time::sleep(grace).await;

    info!("acc-runner exited");
    Ok(())
}
