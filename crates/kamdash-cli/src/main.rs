use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use kamdash_core::Source;
use kamdash_sync::{brief_markdown, maybe_build_scheduler, DashboardService, SyncConfig, WriteOutcome};
use kamdash_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kamdash")]
#[command(about = "KAM actionables dashboard command-line interface")]
struct Cli {
    #[command(flatten)]
    data: DataArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args)]
struct DataArgs {
    /// Read captured fixture pages instead of Airtable; writes are logged only.
    #[arg(long, global = true)]
    fixtures: bool,

    /// Fixture directory, defaults to `<workspace>/fixtures`.
    #[arg(long, global = true, requires = "fixtures")]
    fixtures_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the dashboard web UI.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fetch both sources once and report what came back.
    Sync,
    /// Print a markdown digest of the current actionables.
    Brief {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Append a comment, optionally snoozing the item.
    Comment {
        #[arg(long)]
        source: Option<Source>,
        #[arg(long)]
        id: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        snooze: Option<NaiveDate>,
    },
    /// Write the completion marker for an item.
    Complete {
        #[arg(long)]
        source: Option<Source>,
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (config, service) = build_service(&cli.data).await?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let scheduler = maybe_build_scheduler(&service, &config).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.refresh_cron, "scheduled refresh enabled");
            }

            let refresher = service.clone();
            tokio::spawn(async move {
                refresher.refresh(false).await;
            });

            let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or_else(kamdash_web::port_from_env)));
            kamdash_web::serve(AppState::new(service, config.workspace_root.clone()), addr).await?;
        }
        Commands::Sync => {
            let summary = service.refresh(false).await;
            println!(
                "sync complete: items={} warnings={} pruned_completed={} pruned_handled={}",
                summary.items,
                summary.warnings.len(),
                summary.pruned_completed,
                summary.pruned_handled
            );
            for warning in &summary.warnings {
                eprintln!("warning: {warning}");
            }
        }
        Commands::Brief { out } => {
            service.refresh(true).await;
            let brief = brief_markdown(&service.view().await);
            match out {
                Some(path) => {
                    std::fs::write(&path, brief).with_context(|| format!("writing {}", path.display()))?;
                    println!("brief written to {}", path.display());
                }
                None => print!("{brief}"),
            }
        }
        Commands::Comment {
            source,
            id,
            text,
            snooze,
        } => {
            load_item(&service, source, &id).await?;
            let outcome = service.submit_action(&id, &text, snooze).await?.wait().await?;
            report_write("comment", &id, outcome);
        }
        Commands::Complete { source, id } => {
            load_item(&service, source, &id).await?;
            let outcome = service.complete(&id).await?.wait().await?;
            report_write("complete", &id, outcome);
        }
    }

    Ok(())
}

async fn build_service(data: &DataArgs) -> Result<(SyncConfig, DashboardService)> {
    if data.fixtures {
        let config = SyncConfig::offline_from_env()?;
        let service = DashboardService::from_fixtures(&config, data.fixtures_dir.as_deref()).await;
        Ok((config, service))
    } else {
        let config = SyncConfig::from_env()?;
        let service = DashboardService::from_config(&config).await?;
        Ok((config, service))
    }
}

/// Refreshes, then checks the id exists and belongs to `source` when one is given.
async fn load_item(service: &DashboardService, source: Option<Source>, id: &str) -> Result<()> {
    service.refresh(true).await;
    let found = service.store().read().await.item(id).map(|item| item.source);
    match (found, source) {
        (None, _) => bail!("no actionable with id {id}"),
        (Some(actual), Some(expected)) if actual != expected => {
            bail!("{id} belongs to {actual}, not {expected}")
        }
        _ => Ok(()),
    }
}

fn report_write(action: &str, id: &str, outcome: Option<WriteOutcome>) {
    match outcome {
        Some(outcome) => println!(
            "{action} written for {id} (base={:?}):\n{}",
            outcome.base, outcome.updated_notes
        ),
        None => println!("{action} for {id} already in flight"),
    }
}
