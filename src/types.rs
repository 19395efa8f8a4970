//! Core types for Memoria

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Unique identifier for a memory (UUID v4, stored as text)
pub type MemoryId = String;

/// Unique identifier for a workspace
pub type WorkspaceId = String;

/// A memory record in the hot store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Owning workspace (all operations are scoped to it)
    pub workspace_id: WorkspaceId,
    /// Source conversation, if the memory was extracted from one
    pub conversation_id: Option<String>,
    /// Memory type (open vocabulary: "entity", "fact", "decision", "doc.chunk", ...)
    #[serde(rename = "type")]
    pub memory_type: String,
    /// Main content of the memory
    pub content: String,
    /// Extraction/source confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Lifecycle state
    #[serde(default)]
    pub lifecycle_state: LifecycleState,
    /// When the memory was last accessed
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times accessed
    #[serde(default)]
    pub access_count: i64,
    /// Usage-based value (0.0 - 1.0)
    #[serde(default = "default_importance")]
    pub importance_score: f64,
    /// Time-based freshness (0.0 - 1.0); 1.0 = just accessed
    #[serde(default = "default_decay")]
    pub decay_score: f64,
    /// Per-row TTL override in milliseconds (None = use retention policy)
    pub effective_ttl_ms: Option<i64>,
    /// Exempt from automatic lifecycle transitions
    #[serde(default)]
    pub pinned: bool,
    /// Who pinned the memory
    pub pinned_by: Option<String>,
    /// When the memory was pinned
    pub pinned_at: Option<DateTime<Utc>>,
    /// Set when the memory was archived or expired
    pub archived_at: Option<DateTime<Utc>>,
    /// When the archived copy becomes eligible for permanent cleanup
    pub expires_at: Option<DateTime<Utc>>,
    /// Vector upsert still owed to the index (crash-recovery flag)
    #[serde(default)]
    pub vector_pending: bool,
    /// SHA256 of normalized content, for dedup fast paths
    pub content_hash: Option<String>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_importance() -> f64 {
    0.5
}

fn default_decay() -> f64 {
    1.0
}

/// Lifecycle state of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Fresh, included in retrieval by default
    #[default]
    Active,
    /// Decay score fell below threshold; still retrievable
    Decaying,
    /// Moved to the archive table; vector removed
    Archived,
    /// Archive retention elapsed; awaiting permanent cleanup
    Expired,
    /// User-pinned; exempt from automatic transitions
    Pinned,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Decaying => "decaying",
            LifecycleState::Archived => "archived",
            LifecycleState::Expired => "expired",
            LifecycleState::Pinned => "pinned",
        }
    }

    pub fn all() -> &'static [LifecycleState] {
        &[
            LifecycleState::Active,
            LifecycleState::Decaying,
            LifecycleState::Archived,
            LifecycleState::Expired,
            LifecycleState::Pinned,
        ]
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(LifecycleState::Active),
            "decaying" => Ok(LifecycleState::Decaying),
            "archived" => Ok(LifecycleState::Archived),
            "expired" => Ok(LifecycleState::Expired),
            "pinned" => Ok(LifecycleState::Pinned),
            _ => Err(format!("Unknown lifecycle state: {}", s)),
        }
    }
}

/// Who triggered a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    System,
    User,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::System => "system",
            TriggeredBy::User => "user",
        }
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(TriggeredBy::System),
            "user" => Ok(TriggeredBy::User),
            _ => Err(format!("Unknown trigger source: {}", s)),
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory moved out of the hot table
///
/// Mirrors `Memory` less the live fields (no decay score, no pin columns,
/// no vector); adds archival bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedMemory {
    pub id: MemoryId,
    pub workspace_id: WorkspaceId,
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub importance_score: f64,
    pub access_count: i64,
    pub last_accessed_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the memory was moved to the archive
    pub archived_at: DateTime<Utc>,
    /// When the archived copy becomes eligible for permanent deletion
    pub expires_at: DateTime<Utc>,
}

/// Directed relationship between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_memory_id: MemoryId,
    pub to_memory_id: MemoryId,
    /// Open vocabulary: "relates_to", "supersedes", "depends_on", ...
    pub relationship_type: String,
    /// Confidence in the edge (0.0 - 1.0)
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: i64,
    pub memory_id: MemoryId,
    pub workspace_id: WorkspaceId,
    pub previous_state: LifecycleState,
    pub new_state: LifecycleState,
    /// Human-readable explanation; always present
    pub reason: String,
    pub triggered_by: TriggeredBy,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Workspace type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceType {
    #[default]
    Personal,
    Team,
}

impl WorkspaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceType::Personal => "personal",
            WorkspaceType::Team => "team",
        }
    }
}

impl std::str::FromStr for WorkspaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "personal" => Ok(WorkspaceType::Personal),
            "team" => Ok(WorkspaceType::Team),
            _ => Err(format!("Unknown workspace type: {}", s)),
        }
    }
}

/// Scoping unit for all records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    #[serde(rename = "type")]
    pub workspace_type: WorkspaceType,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Maximum workspace name length
pub const MAX_WORKSPACE_NAME_LENGTH: usize = 64;

/// Workspace name validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceNameError {
    Empty,
    TooLong,
    InvalidChars,
    Reserved,
}

impl std::fmt::Display for WorkspaceNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceNameError::Empty => write!(f, "Workspace name cannot be empty"),
            WorkspaceNameError::TooLong => write!(
                f,
                "Workspace name exceeds {} characters",
                MAX_WORKSPACE_NAME_LENGTH
            ),
            WorkspaceNameError::InvalidChars => write!(
                f,
                "Workspace name can only contain lowercase letters, numbers, hyphens, and underscores"
            ),
            WorkspaceNameError::Reserved => write!(f, "Workspace name is reserved"),
        }
    }
}

impl std::error::Error for WorkspaceNameError {}

/// Normalize and validate a workspace name
///
/// Rules:
/// - Trim whitespace and convert to lowercase
/// - Only allow [a-z0-9_-] characters
/// - Max 64 characters
/// - Cannot start with underscore (reserved for system workspaces)
pub fn normalize_workspace_name(s: &str) -> Result<String, WorkspaceNameError> {
    let normalized = s.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(WorkspaceNameError::Empty);
    }

    if normalized.len() > MAX_WORKSPACE_NAME_LENGTH {
        return Err(WorkspaceNameError::TooLong);
    }

    if !normalized
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(WorkspaceNameError::InvalidChars);
    }

    if normalized.starts_with('_') {
        return Err(WorkspaceNameError::Reserved);
    }

    Ok(normalized)
}

/// Compute the content hash used for dedup fast paths
///
/// SHA256 of lowercased, whitespace-collapsed content, prefixed "sha256:".
pub fn compute_content_hash(content: &str) -> String {
    let normalized = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub workspace_id: WorkspaceId,
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    /// Defaults to 1.0 when absent
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Per-row TTL override in milliseconds
    pub effective_ttl_ms: Option<i64>,
    /// Embedding for the vector index; when None the row is created with
    /// `vector_pending` set and the reconciler owes the upsert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CreateMemoryInput {
    pub fn new(
        workspace_id: impl Into<WorkspaceId>,
        memory_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            conversation_id: None,
            memory_type: memory_type.into(),
            content: content.into(),
            confidence: None,
            metadata: HashMap::new(),
            effective_ttl_ms: None,
            embedding: None,
        }
    }
}

/// Input for updating memory content fields (lifecycle fields go through
/// the lifecycle manager)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<String>,
    pub confidence: Option<f64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Patch for lifecycle fields, validated by the lifecycle manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecyclePatch {
    pub lifecycle_state: Option<LifecycleState>,
    pub importance_score: Option<f64>,
    pub decay_score: Option<f64>,
    pub pinned: Option<bool>,
    pub effective_ttl_ms: Option<Option<i64>>,
    /// Reason recorded on the lifecycle event; generated when absent
    pub reason: Option<String>,
    pub user_id: Option<String>,
}

/// Options for memory search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum results (default 10)
    pub limit: Option<usize>,
    /// Restrict to these memory types
    pub types: Option<Vec<String>>,
    /// Merge matching archived memories into the results
    #[serde(default)]
    pub include_archived: bool,
    /// Drop results below this confidence
    pub min_confidence: Option<f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: Some(10),
            types: None,
            include_archived: false,
            min_confidence: None,
        }
    }
}

/// A memory paired with its retrieval scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// Raw vector similarity from the index
    pub similarity_score: f64,
    /// Composite rank assigned by the ranker (0.0 - 1.0)
    #[serde(default)]
    pub rank: f64,
}

/// Retention policy for a memory type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Base time-to-live before archival, in milliseconds
    pub ttl_ms: i64,
    /// Scales the TTL by importance: effective = ttl * (1 + multiplier * importance)
    pub importance_multiplier: f64,
    /// Extra slack after the effective TTL elapses
    pub grace_period_ms: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl_ms: 90 * 24 * 60 * 60 * 1000, // 90 days
            importance_multiplier: 1.0,
            grace_period_ms: 7 * 24 * 60 * 60 * 1000, // 7 days
        }
    }
}

impl RetentionPolicy {
    /// Effective TTL for a memory given its importance score
    pub fn effective_ttl_ms(&self, importance_score: f64) -> i64 {
        let scaled =
            self.ttl_ms as f64 * (1.0 + self.importance_multiplier * importance_score.clamp(0.0, 1.0));
        scaled as i64 + self.grace_period_ms
    }
}
