//! Context Window Assembly
//!
//! Picks the most relevant memories of an agent that fit a token budget
//! and compresses them into a single summary for an LLM prompt.
//!
//! Assembly is a pure function of one store result set: nothing is cached,
//! and an assembly that is dropped midway leaves nothing behind.

use crate::config::{MemoryOsConfig, StrategyWeights};
use crate::error::MemoryOsError;
use crate::memory::store::MemoryStore;
use crate::memory::summarizer::{ContextStrategy, ScoreContext, StrategyKind};
use crate::models::{AssemblyOutcome, ContextArtifact, Memory, MemoryQuery};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for one assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembleRequest {
    pub agent_id: String,
    /// Signed so that negative budgets can be rejected explicitly
    pub token_budget: i64,
    #[serde(default)]
    pub strategy: Option<String>,
    /// Narrow candidates through store search instead of listing everything
    #[serde(default)]
    pub query: Option<String>,
}

impl AssembleRequest {
    pub fn new(agent_id: impl Into<String>, token_budget: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            token_budget,
            strategy: None,
            query: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Builds context artifacts from an agent's memories
pub struct ContextAssembler {
    store: Arc<dyn MemoryStore>,
    weights: StrategyWeights,
    default_strategy: StrategyKind,
    search_limit: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            weights: StrategyWeights::default(),
            default_strategy: StrategyKind::Full,
            search_limit: MemoryOsConfig::default().search_limit,
        }
    }

    pub fn with_config(store: Arc<dyn MemoryStore>, config: &MemoryOsConfig) -> Result<Self> {
        Ok(Self {
            store,
            weights: config.strategy_weights(),
            default_strategy: StrategyKind::from_str(&config.default_strategy)?,
            search_limit: config.search_limit,
        })
    }

    /// Resolve a strategy by name, falling back to the configured default
    pub fn strategy(&self, name: Option<&str>) -> Result<Arc<dyn ContextStrategy>> {
        let kind = match name {
            Some(n) if !n.trim().is_empty() => StrategyKind::from_str(n)?,
            _ => self.default_strategy,
        };
        Ok(kind.build(self.weights))
    }

    pub async fn assemble(&self, request: &AssembleRequest) -> Result<ContextArtifact> {
        let budget = validate(&request.agent_id, request.token_budget)?;
        let strategy = self.strategy(request.strategy.as_deref())?;

        self.assemble_inner(&request.agent_id, budget, request.query.as_deref(), strategy.as_ref())
            .await
    }

    /// Assemble with a caller-supplied strategy
    pub async fn assemble_with(
        &self,
        agent_id: &str,
        token_budget: i64,
        strategy: &dyn ContextStrategy,
    ) -> Result<ContextArtifact> {
        let budget = validate(agent_id, token_budget)?;
        self.assemble_inner(agent_id, budget, None, strategy).await
    }

    async fn assemble_inner(
        &self,
        agent_id: &str,
        budget: usize,
        query: Option<&str>,
        strategy: &dyn ContextStrategy,
    ) -> Result<ContextArtifact> {
        let query = query.filter(|q| !q.trim().is_empty());
        let candidates = match query {
            Some(q) => self.store.search(agent_id, q, self.search_limit).await?,
            None => self.store.list(agent_id).await?,
        };

        debug!(agent = agent_id, candidates = candidates.len(), "context candidates loaded");

        let filtered_out = candidates.is_empty() && query.is_some() && self.has_memories(agent_id).await?;
        let mut artifact = assemble_from_candidates(strategy, agent_id, budget, candidates);
        if filtered_out {
            artifact.outcome = AssemblyOutcome::NoMatches;
        }
        Ok(artifact)
    }

    async fn has_memories(&self, agent_id: &str) -> Result<bool> {
        let first = MemoryQuery {
            limit: 1,
            ..MemoryQuery::for_agent(agent_id)
        };
        Ok(!self.store.query(&first).await?.is_empty())
    }
}

fn validate(agent_id: &str, token_budget: i64) -> Result<usize> {
    if agent_id.trim().is_empty() {
        return Err(MemoryOsError::InvalidArgument("agent_id is required".into()));
    }

    usize::try_from(token_budget).map_err(|_| {
        MemoryOsError::InvalidArgument(format!(
            "token budget must be non-negative, got {}",
            token_budget
        ))
    })
}

/// Rank, select and summarize a candidate set.
///
/// Ranking is score descending with ties broken by id, so the order is
/// total. Selection is greedy and stops at the first memory that does
/// not fit; memories are never split.
pub fn assemble_from_candidates(
    strategy: &dyn ContextStrategy,
    agent_id: &str,
    budget: usize,
    candidates: Vec<Memory>,
) -> ContextArtifact {
    let ctx = ScoreContext::from_candidates(&candidates);

    let mut seen = HashSet::with_capacity(candidates.len());
    let mut ranked: Vec<(f64, usize, &Memory)> = candidates
        .iter()
        .map(|m| (strategy.score(m, &ctx), strategy.estimate_size(m), m))
        .collect();

    ranked.sort_by(|(sa, _, a), (sb, _, b)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
    ranked.retain(|(_, _, m)| seen.insert(m.id.as_str()));

    let original_size: usize = ranked.iter().map(|(_, size, _)| size).sum();

    let mut used = 0usize;
    let mut selected: Vec<&Memory> = Vec::new();
    for &(_, size, memory) in &ranked {
        if used + size > budget {
            break;
        }
        used += size;
        selected.push(memory);
    }

    let outcome = if ranked.is_empty() {
        AssemblyOutcome::NoCandidates
    } else if selected.is_empty() {
        AssemblyOutcome::BudgetTooSmall
    } else if selected.len() < ranked.len() {
        AssemblyOutcome::Partial
    } else {
        AssemblyOutcome::Complete
    };

    let mut summary = if selected.is_empty() {
        String::new()
    } else {
        strategy.summarize(&selected)
    };
    let mut compressed_size = strategy.measure(&summary);
    let mut truncated = false;

    if compressed_size > budget {
        summary = strategy.truncate(summary, budget);
        compressed_size = strategy.measure(&summary);
        truncated = true;

        if compressed_size > budget {
            warn!(
                agent = agent_id,
                strategy = strategy.name(),
                "strategy truncation overshot budget, dropping summary"
            );
            summary = String::new();
            compressed_size = 0;
        }
    }

    let included_memories: Vec<String> = selected.iter().map(|m| m.id.clone()).collect();
    let id = artifact_digest(agent_id, strategy.name(), budget, &included_memories, &summary);

    info!(
        agent = agent_id,
        strategy = strategy.name(),
        budget,
        candidates = ranked.len(),
        selected = included_memories.len(),
        original_size,
        compressed_size,
        truncated,
        %outcome,
        "context assembled"
    );

    ContextArtifact {
        id,
        agent_id: agent_id.to_string(),
        original_size,
        compressed_size,
        summary,
        included_memories,
        strategy: strategy.name().to_string(),
        token_budget: budget,
        outcome,
        truncated,
        created_at: Utc::now(),
    }
}

/// Stable identifier of an assembly result
fn artifact_digest(
    agent_id: &str,
    strategy: &str,
    budget: usize,
    included: &[String],
    summary: &str,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(agent_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(strategy.as_bytes());
    hasher.update([0u8]);
    hasher.update(budget.to_le_bytes());
    for id in included {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(summary.as_bytes());

    hex::encode(hasher.finalize())
}
