//! Context formatting
//!
//! Turns a ranked memory list into a token-budgeted text block per a
//! named template. Memories are appended greedily in input order; the
//! output token count never exceeds the budget.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::ScoredMemory;

use super::tokenizer::TokenCounter;

static TEMPLATE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(content|type|confidence|timestamp|score)\}\}").expect("valid regex"));

/// A named text template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTemplate {
    pub name: String,
    pub header: Option<String>,
    /// Per-memory format; supports {{content}}, {{type}}, {{confidence}},
    /// {{timestamp}} and {{score}}
    pub memory_format: String,
    pub separator: String,
    pub footer: Option<String>,
    /// When false, metadata variables render as empty strings
    pub include_metadata: bool,
}

impl ContextTemplate {
    /// The built-in default template
    pub fn default_template() -> Self {
        Self {
            name: "default".to_string(),
            header: Some("Relevant memories:".to_string()),
            memory_format: "- [{{type}}] {{content}}".to_string(),
            separator: "\n".to_string(),
            footer: None,
            include_metadata: true,
        }
    }

    fn render_memory(&self, scored: &ScoredMemory) -> String {
        TEMPLATE_VAR
            .replace_all(&self.memory_format, |caps: &Captures<'_>| match &caps[1] {
                "content" => scored.memory.content.clone(),
                _ if !self.include_metadata => String::new(),
                "type" => scored.memory.memory_type.clone(),
                "confidence" => format!("{:.2}", scored.memory.confidence),
                "timestamp" => scored.memory.created_at.format("%Y-%m-%d").to_string(),
                "score" => format!("{:.3}", scored.rank),
                _ => String::new(),
            })
            .into_owned()
    }

    fn compose(&self, rendered: &[String]) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(header) = self.header.as_deref() {
            parts.push(header);
        }
        let body = rendered.join(&self.separator);
        if !body.is_empty() {
            parts.push(&body);
        }
        if let Some(footer) = self.footer.as_deref() {
            parts.push(footer);
        }
        parts.join("\n")
    }
}

/// Output of a formatting pass
#[derive(Debug, Clone)]
pub struct FormattedContext {
    pub context: String,
    /// The memories that made it under the budget, in input order
    pub memories: Vec<ScoredMemory>,
    pub token_count: usize,
    pub template: String,
    pub truncated: bool,
}

/// Renders memories through templates under a token budget
pub struct ContextFormatter {
    tokenizer: Arc<dyn TokenCounter>,
}

impl ContextFormatter {
    pub fn new(tokenizer: Arc<dyn TokenCounter>) -> Self {
        Self { tokenizer }
    }

    /// Format memories under `token_budget`
    ///
    /// Header and footer are accounted first; if they alone exceed the
    /// budget no memories are kept. Memories are then appended greedily in
    /// input order until the next addition would exceed the budget.
    pub fn format(
        &self,
        memories: &[ScoredMemory],
        template: &ContextTemplate,
        token_budget: usize,
    ) -> FormattedContext {
        let overhead = self
            .tokenizer
            .count_tokens(&template.compose(&[]));
        if overhead > token_budget {
            let context = template.compose(&[]);
            return FormattedContext {
                token_count: self.tokenizer.count_tokens(&context),
                context,
                memories: Vec::new(),
                template: template.name.clone(),
                truncated: true,
            };
        }

        let mut rendered: Vec<String> = Vec::new();
        let mut kept: Vec<ScoredMemory> = Vec::new();
        let mut truncated = false;

        for scored in memories {
            rendered.push(template.render_memory(scored));
            let candidate = template.compose(&rendered);
            if self.tokenizer.count_tokens(&candidate) > token_budget {
                rendered.pop();
                truncated = true;
                break;
            }
            kept.push(scored.clone());
        }

        let context = template.compose(&rendered);
        FormattedContext {
            token_count: self.tokenizer.count_tokens(&context),
            context,
            memories: kept,
            template: template.name.clone(),
            truncated,
        }
    }
}
