//! MemoryOS facade
//!
//! Composes the memory store, shared entry registry, context assembler and
//! skill index behind one explicitly constructed object. The API server and
//! tests build their own instance; there is no process-wide registry.

use crate::config::MemoryOsConfig;
use crate::error::MemoryOsError;
use crate::memory::{AssembleRequest, ContextAssembler, MemoryStore};
use crate::models::{
    ContextArtifact, Memory, MemoryQuery, MemoryStats, MemoryType, Permission, SharedEntry, Skill,
};
use crate::shared::{SharedRegistry, SharedValue};
use crate::skills::SkillIndex;
use crate::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MOST_ACCESSED_LIMIT: usize = 5;

/// `shared` and `skill` records mirror registry and skill index state and
/// are only written through those components.
fn require_plain_memory(memory_type: MemoryType) -> Result<()> {
    match memory_type {
        MemoryType::Shared | MemoryType::Skill => Err(MemoryOsError::InvalidArgument(format!(
            "{} memories are managed through the {} operations",
            memory_type,
            if memory_type == MemoryType::Shared { "shared entry" } else { "skill" }
        ))),
        _ => Ok(()),
    }
}

pub struct MemoryOs {
    config: MemoryOsConfig,
    store: Arc<dyn MemoryStore>,
    shared: SharedRegistry,
    assembler: ContextAssembler,
    skills: SkillIndex,
}

impl MemoryOs {
    pub fn new(config: MemoryOsConfig, store: Arc<dyn MemoryStore>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: SharedRegistry::new(store.clone()),
            assembler: ContextAssembler::with_config(store.clone(), &config)?,
            skills: SkillIndex::new(store.clone(), config.mastery),
            store,
            config,
        })
    }

    pub fn config(&self) -> &MemoryOsConfig {
        &self.config
    }

    pub fn shared(&self) -> &SharedRegistry {
        &self.shared
    }

    pub fn skills(&self) -> &SkillIndex {
        &self.skills
    }

    // =============================
    // Memories
    // =============================

    /// Store a new memory, assigning an id and timestamps. Returns the id.
    pub async fn store_memory(&self, mut memory: Memory) -> Result<String> {
        require_plain_memory(memory.memory_type)?;
        if memory.id.trim().is_empty() {
            memory.id = Uuid::new_v4().to_string();
        }

        let now = Utc::now();
        memory.created_at = now;
        memory.updated_at = now;
        memory.accessed_at = now;
        memory.access_count = 0;
        memory.validate()?;

        let id = memory.id.clone();
        info!(agent = %memory.agent_id, id = %id, memory_type = %memory.memory_type, "storing memory");
        self.store.put(memory).await?;
        Ok(id)
    }

    pub async fn get_memory(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<Memory> {
        self.store.get(agent_id, memory_type, id).await
    }

    /// Replace the content of an existing memory
    pub async fn update_memory(&self, mut memory: Memory) -> Result<()> {
        require_plain_memory(memory.memory_type)?;
        // Timestamps are restored by the store; keep validation from tripping on client clocks
        memory.updated_at = memory.updated_at.max(memory.created_at);
        memory.validate()?;

        self.store.replace(memory).await
    }

    pub async fn delete_memory(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<()> {
        require_plain_memory(memory_type)?;
        self.store.delete(agent_id, memory_type, id).await?;
        info!(agent = agent_id, id, %memory_type, "memory deleted");
        Ok(())
    }

    pub async fn search_memories(&self, agent_id: &str, query: &str, limit: usize) -> Result<Vec<Memory>> {
        if agent_id.trim().is_empty() {
            return Err(MemoryOsError::InvalidArgument("agent_id is required".into()));
        }
        self.store.search(agent_id, query, limit).await
    }

    pub async fn query_memories(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        self.store.query(query).await
    }

    pub async fn memory_stats(&self, agent_id: &str) -> Result<MemoryStats> {
        let memories = self.store.list(agent_id).await?;

        let mut by_type = BTreeMap::new();
        for memory_type in MemoryType::ALL {
            by_type.insert(memory_type, 0);
        }
        for memory in &memories {
            *by_type.entry(memory.memory_type).or_insert(0) += 1;
        }

        let avg_importance = if memories.is_empty() {
            0.0
        } else {
            memories.iter().map(|m| m.importance).sum::<f64>() / memories.len() as f64
        };

        let mut by_access: Vec<&Memory> = memories.iter().collect();
        by_access.sort_by(|a, b| b.access_count.cmp(&a.access_count).then_with(|| a.id.cmp(&b.id)));

        Ok(MemoryStats {
            agent_id: agent_id.to_string(),
            total_memories: memories.len(),
            by_type,
            total_tokens: memories.iter().map(Memory::token_count).sum(),
            avg_importance,
            most_accessed: by_access
                .into_iter()
                .filter(|m| m.access_count > 0)
                .take(MOST_ACCESSED_LIMIT)
                .map(|m| m.id.clone())
                .collect(),
        })
    }

    // =============================
    // Context
    // =============================

    pub async fn assemble_context(&self, request: &AssembleRequest) -> Result<ContextArtifact> {
        self.assembler.assemble(request).await
    }

    /// Summary text only, using the configured default budget when none is given
    pub async fn context_window(&self, agent_id: &str, max_tokens: Option<i64>) -> Result<String> {
        let budget = max_tokens.unwrap_or(self.config.max_tokens as i64);
        let artifact = self
            .assembler
            .assemble(&AssembleRequest::new(agent_id, budget))
            .await?;
        Ok(artifact.summary)
    }

    // =============================
    // Shared entries
    // =============================

    pub async fn create_shared(&self, team_id: &str, key: &str, value: &str, agent_id: &str) -> Result<SharedEntry> {
        self.shared.create(team_id, key, value, agent_id).await
    }

    pub async fn read_shared(&self, team_id: &str, key: &str, agent_id: &str) -> Result<SharedValue> {
        self.shared.read(team_id, key, agent_id).await
    }

    pub async fn update_shared(
        &self,
        team_id: &str,
        key: &str,
        agent_id: &str,
        value: &str,
        expected_version: u64,
    ) -> Result<u64> {
        self.shared
            .update(team_id, key, agent_id, value, expected_version)
            .await
    }

    pub async fn lock_shared(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        self.shared.lock(team_id, key, agent_id).await
    }

    pub async fn unlock_shared(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        self.shared.unlock(team_id, key, agent_id).await
    }

    pub async fn delete_shared(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        self.shared.delete(team_id, key, agent_id).await
    }

    pub async fn grant_shared(
        &self,
        team_id: &str,
        key: &str,
        agent_id: &str,
        target_agent: &str,
        permission: Permission,
    ) -> Result<()> {
        self.shared
            .grant(team_id, key, agent_id, target_agent, permission)
            .await
    }

    pub async fn revoke_shared(
        &self,
        team_id: &str,
        key: &str,
        agent_id: &str,
        target_agent: &str,
    ) -> Result<()> {
        self.shared.revoke(team_id, key, agent_id, target_agent).await
    }

    /// Full entry snapshot including ACL and lock state
    pub async fn shared_entry(&self, team_id: &str, key: &str, agent_id: &str) -> Result<SharedEntry> {
        self.shared.get(team_id, key, agent_id).await
    }

    // =============================
    // Skills
    // =============================

    pub async fn register_skill(&self, agent_id: &str, skill: Skill) -> Result<Skill> {
        self.skills.register_skill(agent_id, skill).await
    }

    pub async fn update_skill(&self, agent_id: &str, skill: Skill) -> Result<Skill> {
        self.skills.update_skill(agent_id, skill).await
    }

    pub async fn get_skill(&self, agent_id: &str, name: &str) -> Result<Skill> {
        self.skills.get_skill(agent_id, name).await
    }

    /// Skills in a category, or every skill when `category` is empty
    pub async fn skills_by_category(&self, agent_id: &str, category: &str) -> Result<Vec<Skill>> {
        if category.is_empty() {
            return self.skills.list_skills(agent_id).await;
        }
        self.skills.skills_by_category(agent_id, category).await
    }

    pub async fn record_practice(&self, agent_id: &str, name: &str, success: bool) -> Result<Skill> {
        self.skills.record_practice(agent_id, name, success).await
    }
}
