//! Memory persistence layer
//!
//! Durable storage of memory records keyed by agent, type and id.
//! Ships with an in-memory backend; anything implementing `MemoryStore`
//! can replace it.

use crate::error::MemoryOsError;
use crate::models::{Memory, MemoryQuery, MemoryType};
use crate::Result;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for memory persistence
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or replace a record
    async fn put(&self, memory: Memory) -> Result<()>;
    /// Replace an existing record in one step; `NotFound` when absent.
    /// Does not count as an access.
    async fn replace(&self, memory: Memory) -> Result<()>;
    /// Fetch a record, recording the access
    async fn get(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<Memory>;
    async fn delete(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<()>;
    /// Relevance-ranked search over an agent's memories
    async fn search(&self, agent_id: &str, query: &str, limit: usize) -> Result<Vec<Memory>>;
    /// Filtered listing ordered by id
    async fn query(&self, query: &MemoryQuery) -> Result<Vec<Memory>>;
    /// Every memory owned by an agent, ordered by id
    async fn list(&self, agent_id: &str) -> Result<Vec<Memory>>;
}

type AgentMemories = BTreeMap<(MemoryType, String), Memory>;

/// In-memory store; each agent's records sit behind their own lock
pub struct InMemoryMemoryStore {
    agents: RwLock<HashMap<String, Arc<RwLock<AgentMemories>>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    async fn agent_slot(&self, agent_id: &str) -> Option<Arc<RwLock<AgentMemories>>> {
        let agents = self.agents.read().await;
        agents.get(agent_id).cloned()
    }

    async fn agent_slot_or_insert(&self, agent_id: &str) -> Arc<RwLock<AgentMemories>> {
        if let Some(slot) = self.agent_slot(agent_id).await {
            return slot;
        }

        let mut agents = self.agents.write().await;
        agents
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone()
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(agent_id: &str, memory_type: MemoryType, id: &str) -> MemoryOsError {
    MemoryOsError::NotFound(format!("memory {}/{}/{}", agent_id, memory_type, id))
}

/// Number of query terms present in the content or tags
fn keyword_hits(memory: &Memory, terms: &[String]) -> usize {
    let content = memory.content.to_lowercase();

    terms
        .iter()
        .filter(|term| {
            content.contains(term.as_str())
                || memory.tags.iter().any(|t| t.to_lowercase() == **term)
        })
        .count()
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {

    async fn put(&self, mut memory: Memory) -> Result<()> {
        memory.validate()?;

        let slot = self.agent_slot_or_insert(&memory.agent_id).await;
        let mut records = slot.write().await;
        let key = (memory.memory_type, memory.id.clone());

        if let Some(existing) = records.get(&key) {
            memory.created_at = existing.created_at;
            memory.access_count = memory.access_count.max(existing.access_count);
            memory.accessed_at = memory.accessed_at.max(existing.accessed_at);
            memory.updated_at = Utc::now().max(memory.created_at);
        }

        debug!(agent = %memory.agent_id, id = %memory.id, memory_type = %memory.memory_type, "memory stored");
        records.insert(key, memory);
        Ok(())
    }

    async fn replace(&self, mut memory: Memory) -> Result<()> {
        let (agent_id, memory_type) = (memory.agent_id.clone(), memory.memory_type);
        let slot = self
            .agent_slot(&agent_id)
            .await
            .ok_or_else(|| not_found(&agent_id, memory_type, &memory.id))?;

        let mut records = slot.write().await;
        let existing = records
            .get_mut(&(memory_type, memory.id.clone()))
            .ok_or_else(|| not_found(&agent_id, memory_type, &memory.id))?;

        memory.created_at = existing.created_at;
        memory.access_count = existing.access_count;
        memory.accessed_at = existing.accessed_at;
        memory.updated_at = Utc::now().max(memory.created_at);
        memory.validate()?;

        debug!(agent = %agent_id, id = %memory.id, %memory_type, "memory replaced");
        *existing = memory;
        Ok(())
    }

    async fn get(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<Memory> {
        let slot = self
            .agent_slot(agent_id)
            .await
            .ok_or_else(|| not_found(agent_id, memory_type, id))?;

        let mut records = slot.write().await;
        let memory = records
            .get_mut(&(memory_type, id.to_string()))
            .ok_or_else(|| not_found(agent_id, memory_type, id))?;

        memory.access_count += 1;
        memory.accessed_at = Utc::now();

        Ok(memory.clone())
    }

    async fn delete(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<()> {
        let slot = self
            .agent_slot(agent_id)
            .await
            .ok_or_else(|| not_found(agent_id, memory_type, id))?;

        let mut records = slot.write().await;
        records
            .remove(&(memory_type, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(agent_id, memory_type, id))
    }

    async fn search(&self, agent_id: &str, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let Some(slot) = self.agent_slot(agent_id).await else {
            return Ok(Vec::new());
        };

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let records = slot.read().await;
        let mut ranked: Vec<(usize, &Memory)> = records
            .values()
            .map(|m| (keyword_hits(m, &terms), m))
            .filter(|(hits, _)| terms.is_empty() || *hits > 0)
            .collect();

        ranked.sort_by(|(ha, a), (hb, b)| {
            hb.cmp(ha)
                .then_with(|| b.importance.partial_cmp(&a.importance).unwrap_or(Ordering::Equal))
                .then_with(|| a.id.cmp(&b.id))
        });

        let take = if limit == 0 { ranked.len() } else { limit };

        Ok(ranked
            .into_iter()
            .take(take)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        let Some(slot) = self.agent_slot(&query.agent_id).await else {
            return Ok(Vec::new());
        };

        let records = slot.read().await;
        let mut matched: Vec<Memory> = records
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));

        let take = if query.limit == 0 { matched.len() } else { query.limit };

        Ok(matched.into_iter().skip(query.offset).take(take).collect())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Memory>> {
        self.query(&MemoryQuery::for_agent(agent_id)).await
    }
}
