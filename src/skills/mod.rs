//! Skill index
//!
//! Per-agent view over skill memories, indexed by name and category,
//! with mastery tracking. Every agent has its own slot, so agents never
//! contend with each other.

use crate::config::MasteryPolicy;
use crate::error::MemoryOsError;
use crate::memory::MemoryStore;
use crate::models::{Memory, MemoryType, Skill};
use crate::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct AgentSkills {
    by_name: BTreeMap<String, Skill>,
    by_category: BTreeMap<String, BTreeSet<String>>,
}

impl AgentSkills {
    fn insert(&mut self, skill: Skill) {
        if let Some(previous) = self.by_name.get(&skill.name) {
            if previous.category != skill.category {
                let category = previous.category.clone();
                self.unindex(&category, &skill.name);
            }
        }

        self.by_category
            .entry(skill.category.clone())
            .or_default()
            .insert(skill.name.clone());
        self.by_name.insert(skill.name.clone(), skill);
    }

    fn unindex(&mut self, category: &str, name: &str) {
        if let Some(names) = self.by_category.get_mut(category) {
            names.remove(name);
            if names.is_empty() {
                self.by_category.remove(category);
            }
        }
    }
}

/// Descending mastery, then name
fn sort_skills(skills: &mut [Skill]) {
    skills.sort_by(|a, b| {
        b.mastery
            .total_cmp(&a.mastery)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(MemoryOsError::InvalidArgument(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn validate_skill(skill: &Skill) -> Result<()> {
    if skill.name.trim().is_empty() {
        return Err(MemoryOsError::InvalidArgument("skill name is required".into()));
    }
    check_unit("mastery", skill.mastery)?;
    check_unit("success_rate", skill.success_rate)
}

fn skill_not_found(agent_id: &str, name: &str) -> MemoryOsError {
    MemoryOsError::NotFound(format!("skill {} for agent {}", name, agent_id))
}

/// Apply one practice result to a skill
pub fn apply_practice(skill: &mut Skill, success: bool, policy: &MasteryPolicy) {
    let outcome = if success { 1.0 } else { 0.0 };
    let attempts = skill.practice_count as f64;

    skill.success_rate = ((skill.success_rate * attempts + outcome) / (attempts + 1.0)).clamp(0.0, 1.0);
    skill.practice_count += 1;

    let mastery = skill.mastery.clamp(0.0, 1.0);
    skill.mastery = if success {
        (mastery + policy.learning_rate * (1.0 - mastery)).clamp(mastery, 1.0)
    } else {
        (mastery - policy.decay_rate * mastery).clamp(0.0, mastery)
    };

    skill.last_practiced = Some(Utc::now());
}

pub struct SkillIndex {
    agents: RwLock<HashMap<String, Arc<RwLock<AgentSkills>>>>,
    store: Arc<dyn MemoryStore>,
    policy: MasteryPolicy,
}

impl SkillIndex {
    pub fn new(store: Arc<dyn MemoryStore>, policy: MasteryPolicy) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store,
            policy,
        }
    }

    async fn slot(&self, agent_id: &str) -> Option<Arc<RwLock<AgentSkills>>> {
        let agents = self.agents.read().await;
        agents.get(agent_id).cloned()
    }

    async fn slot_or_insert(&self, agent_id: &str) -> Arc<RwLock<AgentSkills>> {
        if let Some(slot) = self.slot(agent_id).await {
            return slot;
        }

        let mut agents = self.agents.write().await;
        agents.entry(agent_id.to_string()).or_default().clone()
    }

    /// Mirror a skill into the memory store as a `skill` record
    async fn persist(&self, agent_id: &str, skill: &Skill) -> Result<()> {
        let content = if skill.description.is_empty() {
            skill.name.clone()
        } else {
            format!("{}: {}", skill.name, skill.description)
        };

        let mut memory = Memory::new(agent_id, MemoryType::Skill, content)
            .with_id(skill.id.clone())
            .with_importance(skill.mastery.clamp(0.0, 1.0));
        memory.created_at = skill.created_at;
        memory.tags = vec![skill.category.clone()];
        if let serde_json::Value::Object(fields) = serde_json::to_value(skill)? {
            memory.metadata = fields.into_iter().collect();
        }

        self.store.put(memory).await
    }

    pub async fn register_skill(&self, agent_id: &str, mut skill: Skill) -> Result<Skill> {
        if agent_id.trim().is_empty() {
            return Err(MemoryOsError::InvalidArgument("agent_id is required".into()));
        }
        validate_skill(&skill)?;

        if skill.id.trim().is_empty() {
            skill.id = Uuid::new_v4().to_string();
        }

        let slot = self.slot_or_insert(agent_id).await;
        let mut skills = slot.write().await;

        if skills.by_name.contains_key(&skill.name) {
            return Err(MemoryOsError::DuplicateSkill(format!(
                "{} already registered for agent {}",
                skill.name, agent_id
            )));
        }

        self.persist(agent_id, &skill).await?;
        skills.insert(skill.clone());

        info!(agent = agent_id, skill = %skill.name, category = %skill.category, "skill registered");
        Ok(skill)
    }

    /// Replace an existing skill's definition, keeping its practice history
    pub async fn update_skill(&self, agent_id: &str, mut skill: Skill) -> Result<Skill> {
        validate_skill(&skill)?;

        let slot = self
            .slot(agent_id)
            .await
            .ok_or_else(|| skill_not_found(agent_id, &skill.name))?;
        let mut skills = slot.write().await;

        let existing = skills
            .by_name
            .get(&skill.name)
            .ok_or_else(|| skill_not_found(agent_id, &skill.name))?;

        skill.id = existing.id.clone();
        skill.created_at = existing.created_at;
        skill.practice_count = existing.practice_count;
        skill.success_rate = existing.success_rate;
        skill.last_practiced = existing.last_practiced;

        self.persist(agent_id, &skill).await?;
        skills.insert(skill.clone());

        debug!(agent = agent_id, skill = %skill.name, "skill updated");
        Ok(skill)
    }

    pub async fn get_skill(&self, agent_id: &str, name: &str) -> Result<Skill> {
        let slot = self
            .slot(agent_id)
            .await
            .ok_or_else(|| skill_not_found(agent_id, name))?;
        let skills = slot.read().await;

        skills
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| skill_not_found(agent_id, name))
    }

    pub async fn skills_by_category(&self, agent_id: &str, category: &str) -> Result<Vec<Skill>> {
        let Some(slot) = self.slot(agent_id).await else {
            return Ok(Vec::new());
        };
        let skills = slot.read().await;

        let mut matched: Vec<Skill> = skills
            .by_category
            .get(category)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| skills.by_name.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default();

        sort_skills(&mut matched);
        Ok(matched)
    }

    pub async fn list_skills(&self, agent_id: &str) -> Result<Vec<Skill>> {
        let Some(slot) = self.slot(agent_id).await else {
            return Ok(Vec::new());
        };
        let skills = slot.read().await;

        let mut all: Vec<Skill> = skills.by_name.values().cloned().collect();
        sort_skills(&mut all);
        Ok(all)
    }

    pub async fn record_practice(&self, agent_id: &str, name: &str, success: bool) -> Result<Skill> {
        let slot = self
            .slot(agent_id)
            .await
            .ok_or_else(|| skill_not_found(agent_id, name))?;
        let mut skills = slot.write().await;

        let mut skill = skills
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| skill_not_found(agent_id, name))?;

        apply_practice(&mut skill, success, &self.policy);

        self.persist(agent_id, &skill).await?;
        skills.insert(skill.clone());

        debug!(
            agent = agent_id,
            skill = name,
            success,
            mastery = skill.mastery,
            success_rate = skill.success_rate,
            "skill practiced"
        );
        Ok(skill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMemoryStore;

    fn index() -> (SkillIndex, Arc<InMemoryMemoryStore>) {
        let store = Arc::new(InMemoryMemoryStore::new());
        (SkillIndex::new(store.clone(), MasteryPolicy::default()), store)
    }

    #[tokio::test]
    async fn test_practice_scenario() {
        let (index, _) = index();
        index
            .register_skill("a1", Skill::new("search", "retrieval"))
            .await
            .unwrap();

        let mut mastery = 0.0;
        for _ in 0..3 {
            let skill = index.record_practice("a1", "search", true).await.unwrap();
            assert!(skill.mastery > mastery);
            mastery = skill.mastery;
        }

        let failed = index.record_practice("a1", "search", false).await.unwrap();
        assert!(failed.mastery <= mastery);
        assert_eq!(failed.practice_count, 4);
        assert!((failed.success_rate - 0.75).abs() < 1e-9);
        assert!(failed.last_practiced.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let (index, _) = index();
        index
            .register_skill("a1", Skill::new("search", "retrieval"))
            .await
            .unwrap();

        let err = index
            .register_skill("a1", Skill::new("search", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryOsError::DuplicateSkill(_)));

        // Names are only unique per agent
        index
            .register_skill("a2", Skill::new("search", "retrieval"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_rejected() {
        let (index, store) = index();

        let err = index
            .register_skill("a1", Skill::new("search", "retrieval").with_mastery(1.2))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryOsError::InvalidArgument(_)));

        let err = index.register_skill("a1", Skill::new(" ", "retrieval")).await.unwrap_err();
        assert!(matches!(err, MemoryOsError::InvalidArgument(_)));

        assert!(store.list("a1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_category_listing_order() {
        let (index, _) = index();
        for (name, mastery) in [("beta", 0.5), ("alpha", 0.5), ("gamma", 0.9)] {
            index
                .register_skill("a1", Skill::new(name, "tools").with_mastery(mastery))
                .await
                .unwrap();
        }
        index
            .register_skill("a1", Skill::new("chat", "social"))
            .await
            .unwrap();

        let names: Vec<_> = index
            .skills_by_category("a1", "tools")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["gamma", "alpha", "beta"]);

        assert_eq!(index.list_skills("a1").await.unwrap().len(), 4);
        assert!(index.skills_by_category("a1", "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failures() {
        let (index, _) = index();

        assert!(matches!(
            index.get_skill("a1", "search").await,
            Err(MemoryOsError::NotFound(_))
        ));
        assert!(matches!(
            index.record_practice("a1", "search", true).await,
            Err(MemoryOsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_moves_category_and_keeps_history() {
        let (index, _) = index();
        let registered = index
            .register_skill("a1", Skill::new("search", "retrieval"))
            .await
            .unwrap();
        index.record_practice("a1", "search", true).await.unwrap();

        let updated = index
            .update_skill("a1", Skill::new("search", "tools").with_description("web search"))
            .await
            .unwrap();

        assert_eq!(updated.id, registered.id);
        assert_eq!(updated.practice_count, 1);
        assert!(index.skills_by_category("a1", "retrieval").await.unwrap().is_empty());
        assert_eq!(index.skills_by_category("a1", "tools").await.unwrap().len(), 1);

        assert!(matches!(
            index.update_skill("a1", Skill::new("missing", "tools")).await,
            Err(MemoryOsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_skill_is_mirrored_as_memory() {
        let (index, store) = index();
        let skill = index
            .register_skill("a1", Skill::new("search", "retrieval").with_description("find things"))
            .await
            .unwrap();

        let memory = store.get("a1", MemoryType::Skill, &skill.id).await.unwrap();
        assert_eq!(memory.content, "search: find things");
        assert_eq!(memory.tags, vec!["retrieval"]);
        assert_eq!(memory.metadata["category"], serde_json::json!("retrieval"));
    }

    #[test]
    fn test_mastery_stays_in_range() {
        let policy = MasteryPolicy {
            learning_rate: 1.0,
            decay_rate: 1.0,
        };
        let mut skill = Skill::new("search", "retrieval").with_mastery(0.99);

        apply_practice(&mut skill, true, &policy);
        assert_eq!(skill.mastery, 1.0);
        apply_practice(&mut skill, true, &policy);
        assert_eq!(skill.mastery, 1.0);

        apply_practice(&mut skill, false, &policy);
        assert_eq!(skill.mastery, 0.0);
        apply_practice(&mut skill, false, &policy);
        assert_eq!(skill.mastery, 0.0);
        assert!((0.0..=1.0).contains(&skill.success_rate));
    }
}
