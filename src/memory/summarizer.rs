//! Context strategies
//!
//! A strategy decides how memories are scored, how much room each one
//! takes, and how a selection is rendered into summary text. The assembler
//! only talks to the `ContextStrategy` trait, so ranking and selection stay
//! independent of the strategy in use.

use crate::config::{RankingWeights, StrategyWeights};
use crate::error::MemoryOsError;
use crate::models::{estimate_tokens, Memory};
use crate::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Characters kept per memory by the headline strategy
const HEADLINE_CHARS: usize = 80;

/// Normalization bounds taken from the candidate set itself.
///
/// Nothing here reads the clock, so the same candidates always score the same.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext {
    pub oldest_created: DateTime<Utc>,
    pub newest_touch: DateTime<Utc>,
    pub max_access_count: u64,
}

fn last_touch(memory: &Memory) -> DateTime<Utc> {
    memory.updated_at.max(memory.accessed_at)
}

impl ScoreContext {
    pub fn from_candidates(candidates: &[Memory]) -> Self {
        let oldest_created = candidates
            .iter()
            .map(|m| m.created_at)
            .min()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let newest_touch = candidates
            .iter()
            .map(last_touch)
            .max()
            .unwrap_or(oldest_created);
        let max_access_count = candidates
            .iter()
            .map(|m| m.access_count)
            .max()
            .unwrap_or(0);

        Self {
            oldest_created,
            newest_touch,
            max_access_count,
        }
    }

    /// 1.0 for the most recently touched candidate, 0.0 for the oldest
    pub fn recency(&self, memory: &Memory) -> f64 {
        let span = (self.newest_touch - self.oldest_created).num_milliseconds();
        if span <= 0 {
            return 1.0;
        }

        let age = (last_touch(memory) - self.oldest_created).num_milliseconds();
        (age as f64 / span as f64).clamp(0.0, 1.0)
    }

    pub fn frequency(&self, memory: &Memory) -> f64 {
        if self.max_access_count == 0 {
            return 0.0;
        }
        (memory.access_count as f64 / self.max_access_count as f64).clamp(0.0, 1.0)
    }
}

/// Scoring, sizing and summarization policy used by the context assembler
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Higher scores are selected first
    fn score(&self, memory: &Memory, ctx: &ScoreContext) -> f64;

    /// Text contributed by one memory to the summary
    fn render(&self, memory: &Memory) -> String;

    fn estimate_size(&self, memory: &Memory) -> usize {
        self.measure(&self.render(memory))
    }

    fn summarize(&self, selected: &[&Memory]) -> String {
        selected.iter().map(|m| self.render(m)).collect()
    }

    fn measure(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Cut a summary down so that `measure` fits `budget`
    fn truncate(&self, summary: String, budget: usize) -> String {
        truncate_to_tokens(summary, budget)
    }
}

/// Cut text on a char boundary so its token estimate is at most `budget`
pub fn truncate_to_tokens(mut text: String, budget: usize) -> String {
    let max_bytes = budget.saturating_mul(4);
    if text.len() <= max_bytes {
        return text;
    }

    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

fn weighted_score(weights: &RankingWeights, memory: &Memory, ctx: &ScoreContext) -> f64 {
    weights.importance * memory.importance
        + weights.recency * ctx.recency(memory)
        + weights.frequency * ctx.frequency(memory)
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One line per memory with the full content
pub struct FullTextStrategy {
    name: &'static str,
    weights: RankingWeights,
}

impl FullTextStrategy {
    pub fn new(weights: RankingWeights) -> Self {
        Self {
            name: "full",
            weights,
        }
    }

    /// Full text under the `recency` name, normally with recency-heavy weights
    pub fn recency(weights: RankingWeights) -> Self {
        Self {
            name: "recency",
            weights,
        }
    }
}

impl ContextStrategy for FullTextStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn score(&self, memory: &Memory, ctx: &ScoreContext) -> f64 {
        weighted_score(&self.weights, memory, ctx)
    }

    fn render(&self, memory: &Memory) -> String {
        format!("- [{}] {}\n", memory.memory_type, single_line(&memory.content))
    }
}

/// One line per memory holding only its first sentence
pub struct HeadlineStrategy {
    weights: RankingWeights,
    max_chars: usize,
}

impl HeadlineStrategy {
    pub fn new(weights: RankingWeights) -> Self {
        Self {
            weights,
            max_chars: HEADLINE_CHARS,
        }
    }

    fn headline(&self, content: &str) -> String {
        let line = single_line(content);
        let sentence = match line.find(". ") {
            Some(end) => &line[..=end],
            None => line.as_str(),
        };

        if sentence.chars().count() <= self.max_chars {
            return sentence.to_string();
        }

        let mut cut: String = sentence.chars().take(self.max_chars.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

impl ContextStrategy for HeadlineStrategy {
    fn name(&self) -> &str {
        "headline"
    }

    fn score(&self, memory: &Memory, ctx: &ScoreContext) -> f64 {
        weighted_score(&self.weights, memory, ctx)
    }

    fn render(&self, memory: &Memory) -> String {
        format!("- [{}] {}\n", memory.memory_type, self.headline(&memory.content))
    }
}

/// Built-in strategies selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Full,
    Headline,
    Recency,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Full => "full",
            StrategyKind::Headline => "headline",
            StrategyKind::Recency => "recency",
        }
    }

    pub fn build(&self, weights: StrategyWeights) -> Arc<dyn ContextStrategy> {
        match self {
            StrategyKind::Full => Arc::new(FullTextStrategy::new(weights.ranking)),
            StrategyKind::Headline => Arc::new(HeadlineStrategy::new(weights.ranking)),
            StrategyKind::Recency => Arc::new(FullTextStrategy::recency(weights.recency)),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = MemoryOsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(StrategyKind::Full),
            "headline" => Ok(StrategyKind::Headline),
            "recency" => Ok(StrategyKind::Recency),
            other => Err(MemoryOsError::InvalidArgument(format!(
                "unknown context strategy: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
