//! Memoria CLI
//!
//! Migration runner and lifecycle maintenance commands.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use memoria::config::MemoriaConfig;
use memoria::lifecycle::{DecayCalculator, ImportanceScorer, LifecycleManager};
use memoria::storage::{MigrationRunner, SqliteAdapter, StorageAdapter};
use memoria::vector::InMemoryVectorIndex;

#[derive(Parser)]
#[command(name = "memoria")]
#[command(about = "Memory lifecycle and retrieval core CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "DATABASE_PATH", default_value = "memoria.db")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage schema migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
    /// Show store statistics for a workspace
    Stats {
        /// Workspace id
        workspace_id: String,
    },
    /// Run one lifecycle evaluation batch for a workspace
    Evaluate {
        /// Workspace id
        workspace_id: String,
        /// Page offset
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Batch size (1-1000)
        #[arg(long, default_value = "1000")]
        limit: usize,
    },
    /// Delete expired archived memories for a workspace
    Cleanup {
        /// Workspace id
        workspace_id: String,
        /// Compute aggregates without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply all pending migrations
    Up,
    /// Revert the most recent migrations
    Down {
        /// How many migrations to revert
        #[arg(default_value = "1")]
        count: usize,
    },
    /// List applied and pending migrations
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let storage = SqliteAdapter::open(&cli.db_path)?;

    match cli.command {
        Commands::Migrate { command } => {
            let runner = MigrationRunner::with_builtin(&storage)?;
            match command {
                MigrateCommands::Up => {
                    let applied = runner.up()?;
                    if applied.is_empty() {
                        println!("Nothing to apply");
                    } else {
                        for name in applied {
                            println!("Applied {}", name);
                        }
                    }
                }
                MigrateCommands::Down { count } => {
                    let reversed = runner.down(count)?;
                    if reversed.is_empty() {
                        println!("Nothing to revert");
                    } else {
                        for name in reversed {
                            println!("Reverted {}", name);
                        }
                    }
                }
                MigrateCommands::Status => {
                    let status = runner.status()?;
                    println!("Applied:");
                    for m in &status.applied {
                        println!("  {:03} {} ({})", m.id, m.name, m.applied_at);
                    }
                    println!("Pending:");
                    for name in &status.pending {
                        println!("  {}", name);
                    }
                }
            }
        }

        Commands::Stats { workspace_id } => {
            let manager = build_manager(storage)?;
            let metrics = manager.get_metrics(&workspace_id)?;
            println!("Counts by state:");
            for (state, count) in &metrics.by_state {
                println!("  {:10} {}", state, count);
            }
            println!("Pinned: {}", metrics.pinned_count);
            if let Some(avg) = metrics.avg_decay_score {
                println!("Avg decay: {:.3}", avg);
            }
            if let Some(avg) = metrics.avg_importance_score {
                println!("Avg importance: {:.3}", avg);
            }
            println!(
                "Archived: {} ({} bytes, {} expired pending cleanup)",
                metrics.archived_count, metrics.archived_bytes, metrics.expired_pending
            );
        }

        Commands::Evaluate {
            workspace_id,
            offset,
            limit,
        } => {
            let manager = build_manager(storage)?;
            let report = manager.evaluate_batch(&workspace_id, offset, limit)?;
            println!(
                "Evaluated {} ({} marked decaying, {} archived, {} refreshed, {} expired pending)",
                report.evaluated,
                report.marked_decaying,
                report.archived,
                report.refreshed,
                report.expired_pending
            );
            for (id, error) in &report.errors {
                eprintln!("  {}: {}", id, error);
            }
        }

        Commands::Cleanup {
            workspace_id,
            dry_run,
        } => {
            let manager = build_manager(storage)?;
            let report = manager.cleanup_expired(&workspace_id, dry_run)?;
            println!(
                "{}Deleted {} memories, {} relationships, ~{} bytes in {}ms",
                if report.dry_run { "[dry run] " } else { "" },
                report.memories_deleted,
                report.relationships_deleted,
                report.bytes_reclaimed,
                report.execution_time_ms
            );
            for (id, error) in &report.errors {
                eprintln!("  {}: {}", id, error);
            }
        }
    }

    Ok(())
}

fn build_manager(storage: SqliteAdapter) -> anyhow::Result<LifecycleManager> {
    let config = MemoriaConfig::from_env()?;
    let storage: Arc<dyn StorageAdapter> = Arc::new(storage);

    // Maintenance commands never touch vectors beyond deletes, which the
    // reconciler can replay against the real index later
    let vectors = Arc::new(InMemoryVectorIndex::new(384));

    Ok(LifecycleManager::new(
        storage,
        vectors,
        DecayCalculator::from_config(&config.decay)?,
        ImportanceScorer::from_config(&config.importance)?,
        config.lifecycle,
    ))
}
