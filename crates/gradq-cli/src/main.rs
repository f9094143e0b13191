mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gradq_core::{TaskKind, TaskMessage, TaskPayload};
use gradq_ingest::{seed::seed_from_file, IngestConfig, PgSink};
use gradq_queue::{AmqpDispatcher, BrokerConfig, TaskDispatcher};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "gradq")]
#[command(about = "GradCafe results ingestion worker and tooling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Consume tasks from the broker until it closes the consumer.
    Worker,
    /// Run the HTTP trigger surface.
    Serve,
    /// Publish one task.
    Enqueue {
        kind: TaskKind,
        /// JSON object passed as the task payload.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Apply schema migrations.
    Migrate,
    /// Load a JSON, NDJSON, or concatenated-object dump of scraped entries.
    Seed { path: PathBuf },
    /// Print the analytics view.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Worker) {
        Commands::Worker => {
            let config = IngestConfig::from_env();
            let router = gradq_ingest::router_from_config(&config).await?;
            gradq_queue::run_worker(&BrokerConfig::from_env(), &router).await?;
        }
        Commands::Serve => {
            gradq_web::serve_from_env().await?;
        }
        Commands::Enqueue { kind, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let message = TaskMessage::new(kind, payload).with_header("caller", "cli");
            AmqpDispatcher::new(BrokerConfig::from_env())
                .publish(message)
                .await
                .with_context(|| format!("publishing {kind}"))?;
            println!("queued {kind}");
        }
        Commands::Migrate => {
            let sink = PgSink::connect(&IngestConfig::from_env().database_url).await?;
            sqlx::migrate!("../../migrations")
                .run(sink.pool())
                .await
                .context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Seed { path } => {
            let config = IngestConfig::from_env();
            let sink = PgSink::connect(&config.database_url).await?;
            let outcome = seed_from_file(&sink, &config.source_name, &path).await?;
            println!(
                "seed complete: attempted={} inserted={} skipped={} watermark={}",
                outcome.attempted,
                outcome.inserted,
                outcome.skipped(),
                outcome.watermark.as_deref().unwrap_or("-")
            );
        }
        Commands::Summary => {
            let config = IngestConfig::from_env();
            let sink = PgSink::connect(&config.database_url).await?;
            let rows = sink
                .analytics_summary(&config.analytics_view)
                .await
                .context("reading analytics view")?;
            for row in rows {
                println!("{}", serde_json::to_string_pretty(&row)?);
            }
        }
    }

    Ok(())
}

fn parse_payload(raw: Option<&str>) -> Result<TaskPayload> {
    match raw {
        None => Ok(TaskPayload::new()),
        Some(raw) => serde_json::from_str(raw).context("--payload must be a JSON object"),
    }
}
