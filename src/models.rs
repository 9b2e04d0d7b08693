//! Core data models for MemoryOS

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MemoryOsError;
use crate::Result;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Event-based memories (experiences, interactions)
    Episodic,
    /// Factual knowledge
    Semantic,
    /// Procedural knowledge
    Skill,
    /// Short-term, immediate context
    Working,
    /// Multi-agent shared values
    Shared,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Skill,
        MemoryType::Working,
        MemoryType::Shared,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Skill => "skill",
            MemoryType::Working => "working",
            MemoryType::Shared => "shared",
        }
    }
}

impl FromStr for MemoryType {
    type Err = MemoryOsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "skill" => Ok(MemoryType::Skill),
            "working" => Ok(MemoryType::Working),
            "shared" => Ok(MemoryType::Shared),
            other => Err(MemoryOsError::InvalidArgument(format!(
                "unknown memory type: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access level an agent holds on a shared entry.
/// `Write` implies `Read`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    /// Whether holding `self` satisfies a check for `required`
    pub fn allows(self, required: Permission) -> bool {
        match required {
            Permission::Read => true,
            Permission::Write => self == Permission::Write,
        }
    }
}

impl FromStr for Permission {
    type Err = MemoryOsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            other => Err(MemoryOsError::InvalidArgument(format!(
                "unknown permission: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::Read => "read",
            Permission::Write => "write",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Memory =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub agent_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// 0.0 - 1.0
    #[serde(default)]
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<f64>>,
}

impl Memory {
    pub fn new(agent_id: impl Into<String>, memory_type: MemoryType, content: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            memory_type,
            agent_id: agent_id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
            importance: 0.5,
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
            tags: Vec::new(),
            embeddings: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Reject records that break the model invariants
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(MemoryOsError::InvalidArgument("agent_id is required".into()));
        }

        if !(0.0..=1.0).contains(&self.importance) || self.importance.is_nan() {
            return Err(MemoryOsError::InvalidArgument(format!(
                "importance must be within [0, 1], got {}",
                self.importance
            )));
        }

        if self.updated_at < self.created_at {
            return Err(MemoryOsError::InvalidArgument(
                "updated_at precedes created_at".into(),
            ));
        }

        Ok(())
    }

    /// Approximate token count of the content
    pub fn token_count(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Rough token estimate (~4 bytes per token)
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Filter used to list memories from a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub agent_id: String,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub min_importance: f64,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// 0 means unlimited
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl MemoryQuery {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, memory: &Memory) -> bool {
        if memory.agent_id != self.agent_id {
            return false;
        }
        if let Some(memory_type) = self.memory_type {
            if memory.memory_type != memory_type {
                return false;
            }
        }
        if memory.importance < self.min_importance {
            return false;
        }
        if let Some(since) = self.since {
            if memory.created_at < since {
                return false;
            }
        }
        if !self.tags.iter().all(|t| memory.tags.contains(t)) {
            return false;
        }

        let content = memory.content.to_lowercase();
        self.keywords
            .iter()
            .all(|kw| content.contains(&kw.to_lowercase()))
    }
}

//
// ================= Shared Entry =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedEntry {
    pub team_id: String,
    pub key: String,
    pub value: String,
    pub version: u64,
    pub acl: BTreeMap<String, Permission>,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl SharedEntry {
    pub fn new(team_id: &str, key: &str, value: String, creating_agent: &str) -> Self {
        let now = Utc::now();
        let mut acl = BTreeMap::new();
        acl.insert(creating_agent.to_string(), Permission::Write);

        Self {
            team_id: team_id.to_string(),
            key: key.to_string(),
            value,
            version: 1,
            acl,
            locked: false,
            lock_owner: None,
            created_at: now,
            updated_at: now,
            updated_by: creating_agent.to_string(),
        }
    }

    /// Human readable `team/key` identity
    pub fn resource(&self) -> String {
        format!("{}/{}", self.team_id, self.key)
    }

    /// Agent holding the lock, if any
    pub fn holder(&self) -> Option<&str> {
        if self.locked {
            self.lock_owner.as_deref()
        } else {
            None
        }
    }
}

//
// ================= Context =================
//

/// Why an artifact holds what it holds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyOutcome {
    /// Every candidate fit
    Complete,
    /// Budget ran out after at least one selection
    Partial,
    /// Candidates existed but the first did not fit
    BudgetTooSmall,
    /// Agent has no memories
    NoCandidates,
    /// Agent has memories but none matched the query
    NoMatches,
}

impl fmt::Display for AssemblyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssemblyOutcome::Complete => "complete",
            AssemblyOutcome::Partial => "partial",
            AssemblyOutcome::BudgetTooSmall => "budget_too_small",
            AssemblyOutcome::NoCandidates => "no_candidates",
            AssemblyOutcome::NoMatches => "no_matches",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextArtifact {
    pub id: String,
    pub agent_id: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub summary: String,
    pub included_memories: Vec<String>,
    pub strategy: String,
    pub token_budget: usize,
    pub outcome: AssemblyOutcome,
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
}

//
// ================= Skills =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub returns: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// 0.0 - 1.0
    #[serde(default)]
    pub mastery: f64,
    /// 0.0 - 1.0
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub practice_count: u64,
    #[serde(default)]
    pub last_practiced: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Skill {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            category: category.into(),
            parameters: Vec::new(),
            returns: String::new(),
            examples: Vec::new(),
            prerequisites: Vec::new(),
            mastery: 0.0,
            success_rate: 0.0,
            practice_count: 0,
            last_practiced: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_mastery(mut self, mastery: f64) -> Self {
        self.mastery = mastery;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

//
// ================= Stats =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub agent_id: String,
    pub total_memories: usize,
    pub by_type: BTreeMap<MemoryType, usize>,
    pub total_tokens: usize,
    pub avg_importance: f64,
    pub most_accessed: Vec<String>,
}
