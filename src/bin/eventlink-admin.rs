use anyhow::Result;
use clap::{Parser, Subcommand};
use eventlink::attribution::RecalculationOrchestrator;
use eventlink::config::Config;
use eventlink::storage::{AssociationStore, SqliteStorage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "eventlink-admin")]
#[command(about = "Eventlink attribution management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link an event to a shortlink and recompute the link's windows
    Link {
        link_id: String,
        event_id: String,
    },
    /// Unlink an event from a shortlink
    Unlink {
        link_id: String,
        event_id: String,
    },
    /// Recompute windows and metrics for one link
    Recompute {
        link_id: String,
    },
    /// Recompute every link an event belongs to (after a reschedule)
    RecomputeEvent {
        event_id: String,
    },
    /// Drop a deleted event's associations and redistribute windows
    EventDeleted {
        event_id: String,
    },
    /// Recompute windows and metrics for every link
    RecomputeAll,
    /// Re-aggregate metrics with the stored windows
    Refresh {
        /// Only refresh this link
        #[arg(long)]
        link: Option<String>,
        /// Resume a previous refresh after this link id
        #[arg(long)]
        after: Option<String>,
    },
    /// Show a link's windows and cached metrics
    Show {
        link_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );

    // Ensure database is initialized
    storage.init().await?;

    let orchestrator =
        RecalculationOrchestrator::new(storage.clone(), storage.clone(), storage.clone())
            .with_concurrency(config.refresh.concurrency);

    match cli.command {
        Commands::Link { link_id, event_id } => {
            let association = orchestrator.create_association(&link_id, &event_id).await?;
            println!(
                "✓ Linked event '{}' to '{}' with window {}",
                event_id, link_id, association.range
            );
        }
        Commands::Unlink { link_id, event_id } => {
            let remaining = orchestrator.remove_association(&link_id, &event_id).await?;
            println!(
                "✓ Unlinked event '{}' from '{}', {} associations remain",
                event_id,
                link_id,
                remaining.len()
            );
        }
        Commands::Recompute { link_id } => {
            let rows = orchestrator.recompute_link(&link_id).await?;
            print_associations(&link_id, &rows);
        }
        Commands::RecomputeEvent { event_id } => {
            let count = orchestrator.recompute_for_event(&event_id).await?;
            println!("✓ Recomputed {} links for event '{}'", count, event_id);
        }
        Commands::EventDeleted { event_id } => {
            let count = orchestrator.handle_event_deleted(&event_id).await?;
            println!("✓ Redistributed {} links after deleting '{}'", count, event_id);
        }
        Commands::RecomputeAll => {
            let count = orchestrator.recompute_all().await?;
            println!("✓ Recomputed {} links", count);
        }
        Commands::Refresh { link: Some(link_id), .. } => {
            let count = orchestrator.refresh_link_metrics(&link_id).await?;
            println!("✓ Refreshed {} associations of '{}'", count, link_id);
        }
        Commands::Refresh { link: None, after } => {
            let report = orchestrator
                .refresh_metrics_after(after.as_deref(), None)
                .await?;
            println!(
                "✓ Refreshed {} associations across {} links ({} failed)",
                report.associations_refreshed, report.links_refreshed, report.links_failed
            );
        }
        Commands::Show { link_id } => {
            let rows = orchestrator.list_associations(&link_id).await?;
            print_associations(&link_id, &rows);
        }
    }

    Ok(())
}

fn print_associations(link_id: &str, rows: &[eventlink::models::LinkEventAssociation]) {
    if rows.is_empty() {
        println!("No associations found for '{}'.", link_id);
        return;
    }

    println!("Associations for '{}':", link_id);
    println!("{:<30} {:<28} {:>10} {}", "Event", "Window", "Clicks", "Last synced");
    println!("{}", "-".repeat(90));
    for row in rows {
        let synced = row
            .last_synced_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "pending".to_string());
        println!(
            "{:<30} {:<28} {:>10} {}",
            row.event_id,
            row.range.to_string(),
            row.cached_metrics.clicks,
            synced
        );
    }
}
