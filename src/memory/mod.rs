//! Agent Memory System
//!
//! Memory persistence, context strategies and budgeted context assembly.

pub mod context_manager;
pub mod store;
pub mod summarizer;

pub use context_manager::{assemble_from_candidates, AssembleRequest, ContextAssembler};
pub use store::{InMemoryMemoryStore, MemoryStore};
pub use summarizer::{
    ContextStrategy, FullTextStrategy, HeadlineStrategy, ScoreContext, StrategyKind,
};
