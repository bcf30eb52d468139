use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::config::ProviderKind;
use tollgate::{Request, Tollgate, TollgateConfig};
use tollgate_cache::ledger::{load_journal, summarize_by_tenant, summarize_by_tier};
use tollgate_cache::{CostSummary, InvalidationEvent, InvalidationReason, InvalidationScope};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Complexity-adaptive workflow router with tiered result caching", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the same request repeatedly and print the JSON summary
    Bench {
        /// Request text
        request: String,

        /// Number of sequential runs
        #[arg(short, long, default_value = "20")]
        repeat: usize,

        #[arg(long)]
        tenant: Option<String>,

        #[arg(long)]
        user: Option<String>,

        /// Print Prometheus metrics after the summary
        #[arg(long)]
        metrics: bool,

        /// Use the deterministic offline provider
        #[arg(long)]
        offline: bool,
    },

    /// Publish an invalidation event (global, tenant or user)
    Invalidate {
        scope: InvalidationScope,

        /// Tenant or user id
        target: Option<String>,
    },

    /// Aggregate the cost journal
    Report {
        /// Journal file (defaults to the one under the data directory)
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tollgate=info,tollgate_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    match cli.command {
        Commands::Bench {
            request,
            repeat,
            tenant,
            user,
            metrics,
            offline,
        } => {
            if repeat == 0 {
                bail!("--repeat must be at least 1");
            }
            let prometheus = if metrics {
                Some(
                    PrometheusBuilder::new()
                        .install_recorder()
                        .context("Failed to install metrics recorder")?,
                )
            } else {
                None
            };
            if offline {
                config.generation.provider = ProviderKind::Offline;
            }

            let app = Tollgate::build(config).await.context("Failed to start")?;
            let request = Request {
                tenant_id: tenant,
                user_id: user,
                payload: request,
            };
            let summary = app.harness().run(&request, repeat).await?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
            if let Some(handle) = prometheus {
                println!("{}", handle.render());
            }
        }

        Commands::Invalidate { scope, target } => {
            let event = match (scope, target) {
                (InvalidationScope::Global, _) => InvalidationEvent::global(InvalidationReason::Manual),
                (InvalidationScope::Tenant, Some(id)) => InvalidationEvent::tenant(id, InvalidationReason::Manual),
                (InvalidationScope::User, Some(id)) => InvalidationEvent::user(id, InvalidationReason::Manual),
                (scope, None) => bail!("{} invalidation needs a target id", scope),
            };

            let app = Tollgate::build(config).await.context("Failed to start")?;
            let report = app.bus.publish(event).await;
            println!(
                "Delivered to {} handler(s), removed {} entr{}",
                report.delivered,
                report.removed,
                if report.removed == 1 { "y" } else { "ies" }
            );
            for failure in &report.failures {
                println!("  failed: {}", failure);
            }
        }

        Commands::Report { journal } => {
            let path = journal.unwrap_or_else(|| config.journal_path());
            let records = load_journal(&path)
                .await
                .with_context(|| format!("Failed to read journal {}", path.display()))?;

            println!("Cost report: {}", path.display());
            println!("{}", "=".repeat(60));
            println!("Total: {}", CostSummary::of(&records));
            println!();
            println!("By resource tier:");
            for (tier, summary) in summarize_by_tier(&records) {
                println!("  {:<10} {}", tier, summary);
            }
            println!();
            println!("By tenant:");
            for (tenant, summary) in summarize_by_tenant(&records) {
                println!("  {:<10} {}", tenant, summary);
            }
        }

        Commands::Config => {
            print!("{}", config.to_yaml()?);
            println!("# data directory: {}", config.data_dir().display());
        }
    }

    Ok(())
}
