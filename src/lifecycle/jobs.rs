//! Background lifecycle jobs
//!
//! A single long-running task drives periodic evaluation, cleanup and
//! vector reconciliation. Each tick works page by page with bounded
//! batches; the stop signal is observed between batches so shutdown
//! never waits on a full sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;

use crate::embedding::Embedder;
use crate::error::Result;

use super::manager::LifecycleManager;

/// Commands for the lifecycle worker
#[derive(Debug)]
pub enum LifecycleCommand {
    /// Run a full cycle immediately
    RunNow,
    /// Stop the worker
    Stop,
}

/// Handle to the background lifecycle loop
pub struct LifecycleWorker {
    sender: mpsc::Sender<LifecycleCommand>,
    stop_flag: Arc<AtomicBool>,
}

impl LifecycleWorker {
    /// Start the background loop
    ///
    /// Every `evaluation_interval_ms` the worker evaluates each workspace
    /// page by page, runs one cleanup batch, prunes old events, and (when
    /// an embedder is supplied) reconciles the vector index.
    pub fn start(manager: Arc<LifecycleManager>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<LifecycleCommand>(16);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();

        tokio::spawn(async move {
            let period = Duration::from_millis(manager.config().evaluation_interval_ms.max(1));
            let mut tick = interval(period);
            // The first tick fires immediately; skip it so startup is quiet
            tick.tick().await;

            loop {
                tokio::select! {
                    Some(cmd) = receiver.recv() => {
                        match cmd {
                            LifecycleCommand::RunNow => {
                                Self::run_cycle(&manager, embedder.as_deref(), &flag).await;
                            }
                            LifecycleCommand::Stop => break,
                        }
                    }
                    _ = tick.tick() => {
                        if flag.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::run_cycle(&manager, embedder.as_deref(), &flag).await;
                    }
                }
            }

            tracing::info!("lifecycle worker stopped");
        });

        Self { sender, stop_flag }
    }

    async fn run_cycle(
        manager: &Arc<LifecycleManager>,
        embedder: Option<&dyn Embedder>,
        stop_flag: &AtomicBool,
    ) {
        let workspaces = match manager.list_workspace_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("lifecycle cycle could not list workspaces: {}", e);
                return;
            }
        };

        let batch_size = manager.config().batch_size;

        for workspace_id in workspaces {
            let mut offset = 0;
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }

                match manager.evaluate_batch(&workspace_id, offset, batch_size) {
                    Ok(report) => {
                        if report.marked_decaying + report.archived > 0 {
                            tracing::info!(
                                workspace_id = %workspace_id,
                                decaying = report.marked_decaying,
                                archived = report.archived,
                                "evaluation batch applied transitions"
                            );
                        }
                        // Archived rows leave the page, so only advance past
                        // the rows that stayed
                        offset += (report.evaluated - report.archived) as usize;
                        if (report.evaluated as usize) < batch_size {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(workspace_id = %workspace_id, "evaluation failed: {}", e);
                        break;
                    }
                }

                // Yield between batches
                tokio::task::yield_now().await;
            }

            if stop_flag.load(Ordering::Relaxed) {
                return;
            }

            if let Err(e) = manager.cleanup_expired(&workspace_id, false) {
                tracing::warn!(workspace_id = %workspace_id, "cleanup failed: {}", e);
            }
            if let Err(e) = manager.cleanup_lifecycle_events(&workspace_id) {
                tracing::warn!(workspace_id = %workspace_id, "event pruning failed: {}", e);
            }
        }

        if let Some(embedder) = embedder {
            match manager.reconcile_vectors(embedder) {
                Ok(report) if report.vectors_upserted + report.orphans_deleted > 0 => {
                    tracing::info!(
                        upserted = report.vectors_upserted,
                        orphans = report.orphans_deleted,
                        "vector reconciliation pass"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("vector reconciliation failed: {}", e),
            }
        }
    }

    /// Request an immediate cycle
    pub async fn trigger(&self) -> Result<()> {
        let _ = self.sender.send(LifecycleCommand::RunNow).await;
        Ok(())
    }

    /// Signal the worker to stop at the next batch boundary
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.sender.send(LifecycleCommand::Stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::lifecycle::decay::{DecayCalculator, DecayFunction};
    use crate::lifecycle::importance::ImportanceScorer;
    use crate::storage::{MigrationRunner, SqlValue, SqliteAdapter, StorageExecutor};
    use crate::types::{LifecycleState, RetentionPolicy};
    use crate::vector::InMemoryVectorIndex;
    use chrono::{Duration as ChronoDuration, Utc};

    fn manager() -> Arc<LifecycleManager> {
        let storage = Arc::new(SqliteAdapter::open_in_memory().unwrap());
        MigrationRunner::with_builtin(storage.as_ref())
            .unwrap()
            .up()
            .unwrap();
        storage
            .execute(
                "INSERT INTO workspaces (id, name, workspace_type) VALUES ($1, $2, $3)",
                &[
                    SqlValue::from("w1"),
                    SqlValue::from("test"),
                    SqlValue::from("personal"),
                ],
            )
            .unwrap();

        let now = Utc::now();
        storage
            .execute(
                "INSERT INTO memories
                    (id, workspace_id, memory_type, content, confidence, metadata,
                     lifecycle_state, last_accessed_at, access_count, importance_score,
                     decay_score, pinned, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, $12)",
                &[
                    SqlValue::from("m1"),
                    SqlValue::from("w1"),
                    SqlValue::from("fact"),
                    SqlValue::from("stale content"),
                    SqlValue::Real(0.9),
                    SqlValue::from("{}"),
                    SqlValue::from(LifecycleState::Active.as_str()),
                    SqlValue::from(now - ChronoDuration::days(400)),
                    SqlValue::Integer(1),
                    SqlValue::Real(0.5),
                    SqlValue::Real(1.0),
                    SqlValue::from(now - ChronoDuration::days(400)),
                ],
            )
            .unwrap();

        let mut config = LifecycleConfig {
            evaluation_interval_ms: 3_600_000,
            ..Default::default()
        };
        config.retention_policies.insert(
            "*".to_string(),
            RetentionPolicy {
                ttl_ms: 90 * 24 * 60 * 60 * 1000,
                importance_multiplier: 0.0,
                grace_period_ms: 0,
            },
        );

        Arc::new(LifecycleManager::new(
            storage,
            Arc::new(InMemoryVectorIndex::new(4)),
            DecayCalculator::new(DecayFunction::Exponential { lambda: 0.05 }).unwrap(),
            ImportanceScorer::default(),
            config,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trigger_runs_cycle_and_stop_halts() {
        let manager = manager();
        let worker = LifecycleWorker::start(manager.clone(), None);

        worker.trigger().await.unwrap();
        // Give the cycle a moment to run
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The stale memory should have been archived by the cycle
        let metrics = manager.get_metrics("w1").unwrap();
        assert_eq!(metrics.archived_count, 1);

        worker.stop().await;
    }
}
