//! Retrieval and context assembly
//!
//! Tokenizers, the composite ranker, the template formatter and the
//! context engine façade over embedding + vector search + the store.

pub mod engine;
pub mod formatter;
pub mod ranker;
pub mod tokenizer;

pub use engine::{ContextEngine, ContextEvent, ContextRequest, DEFAULT_NAME};
pub use formatter::{ContextFormatter, ContextTemplate, FormattedContext};
pub use ranker::{Ranker, RankerConfig};
pub use tokenizer::{ApproxTokenizer, TiktokenTokenizer, TokenCounter};
