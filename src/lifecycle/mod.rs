//! Memory lifecycle engine
//!
//! Decay and importance scoring, the state machine, the append-only
//! event log, archival/restore, permanent cleanup, and the manager that
//! orchestrates them with a background job loop.

pub mod archival;
pub mod cleanup;
pub mod decay;
pub mod events;
pub mod importance;
pub mod jobs;
pub mod manager;
pub mod state_machine;

pub use archival::{ArchivalService, ArchiveStat, BatchArchiveResult, RestoreResult};
pub use cleanup::{CleanupOptions, CleanupReport, CleanupService};
pub use decay::{DecayCalculator, DecayFunction};
pub use events::{get_history, get_recent_transitions, log_transition, NewLifecycleEvent};
pub use importance::{ImportanceInputs, ImportanceScorer, ImportanceWeights};
pub use jobs::{LifecycleCommand, LifecycleWorker};
pub use manager::{EvaluationReport, LifecycleManager, LifecycleMetrics, ReconcileReport};
pub use state_machine::{default_reason, validate_transition, TransitionVerdict};
