//! MAKER reliability layer
//!
//! Runs N independent microagent calls over the same source text,
//! red-flags malformed candidates, and picks a winner by pairwise
//! overlap consensus. Partial failures are tolerated; zero valid
//! candidates yields None so the caller can fall back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MakerConfig;
use crate::error::Result;

use super::llm::{LlmClient, LlmRequest};

/// Validated microagent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakerNotes {
    pub summary: String,
    pub decisions: Vec<String>,
    pub todos: Vec<String>,
}

/// Outcome of a reliable extraction
#[derive(Debug, Clone)]
pub struct MakerOutcome {
    pub notes: Option<MakerNotes>,
    /// Candidates that passed validation
    pub valid_candidates: usize,
    /// Calls that failed or were red-flagged
    pub rejected: usize,
}

/// N-way voting wrapper around a microagent prompt
pub struct MakerLayer {
    llm: Arc<dyn LlmClient>,
    config: MakerConfig,
}

impl MakerLayer {
    pub fn new(llm: Arc<dyn LlmClient>, config: MakerConfig) -> Self {
        Self { llm, config }
    }

    fn prompt(source_text: &str) -> String {
        format!(
            "Extract durable notes from the following text. Respond with JSON only:\n\
             {{\"summary\": \"<20-1500 char summary>\", \"decisions\": [\"...\"], \"todos\": [\"...\"]}}\n\n\
             Text:\n{}",
            source_text
        )
    }

    /// Run the microagent vote
    ///
    /// Each call is independent with its own timeout; any subset of valid
    /// candidates is enough. Returns `notes: None` when all were rejected.
    pub async fn reliable_extract(&self, source_text: &str) -> Result<MakerOutcome> {
        let request = LlmRequest {
            system: None,
            prompt: Self::prompt(source_text),
            temperature: self.config.temperature,
            max_tokens: None,
            timeout: Duration::from_millis(self.config.call_timeout_ms),
        };

        let mut candidates = Vec::with_capacity(self.config.runs);
        let mut rejected = 0;

        for attempt in 0..self.config.runs {
            match self.llm.complete(&request).await {
                Ok(raw) => match validate_candidate(&raw) {
                    Some(notes) => candidates.push(notes),
                    None => {
                        tracing::debug!(attempt, "microagent output red-flagged");
                        rejected += 1;
                    }
                },
                Err(e) => {
                    tracing::debug!(attempt, "microagent call failed: {}", e);
                    rejected += 1;
                }
            }
        }

        let valid_candidates = candidates.len();
        let notes = select_by_consensus(candidates);
        Ok(MakerOutcome {
            notes,
            valid_candidates,
            rejected,
        })
    }
}

/// Strip a leading/trailing markdown code fence
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...)
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Red-flagging validation of one raw candidate
///
/// Requires parseable JSON with a summary of 20..=1500 chars and string
/// arrays for decisions and todos; a near-empty result (summary under 50
/// chars with no decisions and no todos) is rejected.
pub fn validate_candidate(raw: &str) -> Option<MakerNotes> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value = serde_json::from_str(cleaned).ok()?;

    let summary = value.get("summary")?.as_str()?.trim().to_string();
    if summary.len() < 20 || summary.len() > 1500 {
        return None;
    }

    let string_array = |key: &str| -> Option<Vec<String>> {
        match value.get(key) {
            None => None,
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            Some(_) => None,
        }
    };

    let decisions = string_array("decisions")?;
    let todos = string_array("todos")?;

    if summary.len() < 50 && decisions.is_empty() && todos.is_empty() {
        return None;
    }

    Some(MakerNotes {
        summary,
        decisions,
        todos,
    })
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<String> = a.iter().map(|s| normalize(s)).collect();
    let set_b: HashSet<String> = b.iter().map(|s| normalize(s)).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> Vec<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    };
    jaccard(&tokens(a), &tokens(b))
}

/// Pairwise overlap between two candidates
fn overlap_score(a: &MakerNotes, b: &MakerNotes) -> f64 {
    jaccard(&a.decisions, &b.decisions)
        + jaccard(&a.todos, &b.todos)
        + token_jaccard(&a.summary, &b.summary)
}

/// Pick the candidate with the highest total pairwise overlap
fn select_by_consensus(candidates: Vec<MakerNotes>) -> Option<MakerNotes> {
    match candidates.len() {
        0 => None,
        1 => candidates.into_iter().next(),
        _ => {
            let mut best_index = 0;
            let mut best_score = f64::MIN;
            for i in 0..candidates.len() {
                let score: f64 = (0..candidates.len())
                    .filter(|j| *j != i)
                    .map(|j| overlap_score(&candidates[i], &candidates[j]))
                    .sum();
                if score > best_score {
                    best_score = score;
                    best_index = i;
                }
            }
            candidates.into_iter().nth(best_index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::llm::ScriptedLlm;

    fn candidate_json(summary: &str, decisions: &[&str], todos: &[&str]) -> String {
        serde_json::json!({
            "summary": summary,
            "decisions": decisions,
            "todos": todos,
        })
        .to_string()
    }

    const GOOD_SUMMARY: &str =
        "The team agreed on authentication and session storage for the new deployment.";

    #[test]
    fn test_validation_accepts_well_formed() {
        let raw = candidate_json(GOOD_SUMMARY, &["Use OAuth2"], &["Write the RFC"]);
        let notes = validate_candidate(&raw).unwrap();
        assert_eq!(notes.decisions, vec!["Use OAuth2"]);
        assert_eq!(notes.todos, vec!["Write the RFC"]);
    }

    #[test]
    fn test_validation_strips_code_fences() {
        let raw = format!(
            "```json\n{}\n```",
            candidate_json(GOOD_SUMMARY, &["Use OAuth2"], &[])
        );
        assert!(validate_candidate(&raw).is_some());
    }

    #[test]
    fn test_validation_red_flags() {
        // Not JSON
        assert!(validate_candidate("the summary is: stuff happened").is_none());
        // Summary too short
        assert!(validate_candidate(&candidate_json("too short", &["d"], &[])).is_none());
        // Summary too long
        assert!(validate_candidate(&candidate_json(&"x".repeat(1501), &[], &[])).is_none());
        // Non-string array items
        assert!(validate_candidate(
            &serde_json::json!({"summary": GOOD_SUMMARY, "decisions": [1, 2], "todos": []})
                .to_string()
        )
        .is_none());
        // Missing arrays
        assert!(validate_candidate(
            &serde_json::json!({"summary": GOOD_SUMMARY}).to_string()
        )
        .is_none());
        // Near-empty: short summary with no decisions and no todos
        assert!(validate_candidate(&candidate_json(
            "Short but over twenty characters.",
            &[],
            &[]
        ))
        .is_none());
    }

    #[test]
    fn test_consensus_picks_overlap_winner() {
        let agree_a = validate_candidate(&candidate_json(
            "The team decided on OAuth2 and cookie storage for sessions going forward.",
            &["Use OAuth2", "Store in cookies"],
            &[],
        ))
        .unwrap();
        let agree_b = validate_candidate(&candidate_json(
            "The team decided to use OAuth2 with cookie storage for sessions.",
            &["Use OAuth2", "Store in cookies"],
            &[],
        ))
        .unwrap();
        let divergent = validate_candidate(&candidate_json(
            "A completely different reading about database sharding strategy instead.",
            &["Shard by tenant"],
            &["Benchmark writes"],
        ))
        .unwrap();

        let winner =
            select_by_consensus(vec![divergent, agree_a.clone(), agree_b]).unwrap();
        assert!(winner.decisions.contains(&"Use OAuth2".to_string()));
        assert!(winner.decisions.contains(&"Store in cookies".to_string()));
    }

    #[test]
    fn test_consensus_single_and_empty() {
        assert!(select_by_consensus(vec![]).is_none());

        let only = validate_candidate(&candidate_json(GOOD_SUMMARY, &["Decide"], &[])).unwrap();
        assert_eq!(select_by_consensus(vec![only.clone()]), Some(only));
    }

    #[tokio::test]
    async fn test_reliable_extract_tolerates_partial_failures() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(candidate_json(
                "The team agreed on OAuth2 and cookie-based session storage today.",
                &["Use OAuth2", "Store in cookies"],
                &[],
            )),
            Err(crate::error::MemoriaError::Llm("timeout".to_string())),
            Ok(candidate_json(
                "Agreement was reached to use OAuth2 with cookie session storage.",
                &["Use OAuth2", "Store in cookies"],
                &[],
            )),
        ]));
        let layer = MakerLayer::new(llm, MakerConfig::default());

        let outcome = layer.reliable_extract("meeting transcript").await.unwrap();
        assert_eq!(outcome.valid_candidates, 2);
        assert_eq!(outcome.rejected, 1);
        let notes = outcome.notes.unwrap();
        assert!(notes.decisions.contains(&"Use OAuth2".to_string()));
    }

    #[tokio::test]
    async fn test_reliable_extract_all_invalid_returns_none() {
        let llm = Arc::new(ScriptedLlm::repeating("not json at all"));
        let layer = MakerLayer::new(llm, MakerConfig::default());

        let outcome = layer.reliable_extract("source").await.unwrap();
        assert!(outcome.notes.is_none());
        assert_eq!(outcome.valid_candidates, 0);
        assert_eq!(outcome.rejected, 3);
    }
}
