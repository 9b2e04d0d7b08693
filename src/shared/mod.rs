//! Shared entry registry
//!
//! Team-scoped, versioned key/value entries with optimistic concurrency.
//! Each (team, key) lives in its own slot guarded by its own mutex; the
//! arena map is only locked long enough to find or insert a slot, so
//! unrelated keys never wait on each other.
//!
//! A committed slot without an entry is a deleted key. Slots whose create
//! never reached the store stay uncommitted and read as never existing.

pub mod acl;

use crate::error::MemoryOsError;
use crate::models::{Memory, MemoryType, Permission, SharedEntry};
use crate::memory::MemoryStore;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct EntrySlot {
    entry: Option<SharedEntry>,
    /// Set once a create has been persisted
    committed: bool,
}

type Slot = Arc<Mutex<EntrySlot>>;

/// Value and version returned by a read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedValue {
    pub value: String,
    pub version: u64,
}

/// Owner id under which shared entries are mirrored into the memory store
pub fn team_owner_id(team_id: &str) -> String {
    format!("team:{}", team_id)
}

fn mirror_id(key: &str) -> String {
    format!("shared:{}", key)
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MemoryOsError::InvalidArgument(format!("{} is required", name)));
    }
    Ok(())
}

fn validate_ids(team_id: &str, key: &str, agent_id: &str) -> Result<()> {
    require("team_id", team_id)?;
    require("key", key)?;
    require("agent_id", agent_id)
}

fn not_found(team_id: &str, key: &str) -> MemoryOsError {
    MemoryOsError::NotFound(format!("shared entry {}/{}", team_id, key))
}

fn live<'a>(slot: &'a mut EntrySlot, team_id: &str, key: &str) -> Result<&'a mut SharedEntry> {
    slot.entry.as_mut().ok_or_else(|| not_found(team_id, key))
}

pub struct SharedRegistry {
    entries: RwLock<HashMap<(String, String), Slot>>,
    store: Arc<dyn MemoryStore>,
}

impl SharedRegistry {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    async fn slot(&self, team_id: &str, key: &str) -> Option<Slot> {
        let entries = self.entries.read().await;
        entries
            .get(&(team_id.to_string(), key.to_string()))
            .cloned()
    }

    async fn slot_or_insert(&self, team_id: &str, key: &str) -> Slot {
        if let Some(slot) = self.slot(team_id, key).await {
            return slot;
        }

        let mut entries = self.entries.write().await;
        entries
            .entry((team_id.to_string(), key.to_string()))
            .or_insert_with(Slot::default)
            .clone()
    }

    async fn existing_slot(&self, team_id: &str, key: &str) -> Result<Slot> {
        self.slot(team_id, key)
            .await
            .ok_or_else(|| not_found(team_id, key))
    }

    /// Mirror an entry into the memory store as a `shared` record
    async fn persist(&self, entry: &SharedEntry) -> Result<()> {
        let mut memory = Memory::new(
            team_owner_id(&entry.team_id),
            MemoryType::Shared,
            entry.value.clone(),
        )
        .with_id(mirror_id(&entry.key));

        memory.created_at = entry.created_at;
        memory.updated_at = entry.updated_at;
        memory.metadata.insert("key".into(), serde_json::json!(entry.key));
        memory.metadata.insert("version".into(), serde_json::json!(entry.version));
        memory.metadata.insert("acl".into(), serde_json::to_value(&entry.acl)?);
        memory.metadata.insert("locked".into(), serde_json::json!(entry.locked));
        memory.metadata.insert("lock_owner".into(), serde_json::json!(entry.lock_owner));
        memory.metadata.insert("updated_by".into(), serde_json::json!(entry.updated_by));

        self.store.put(memory).await
    }

    /// Create a new entry at version 1, writable by its creator
    pub async fn create(
        &self,
        team_id: &str,
        key: &str,
        initial_value: impl Into<String>,
        agent_id: &str,
    ) -> Result<SharedEntry> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.slot_or_insert(team_id, key).await;
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.entry.as_ref() {
            return Err(MemoryOsError::AlreadyExists(format!(
                "shared entry {}",
                existing.resource()
            )));
        }

        let entry = SharedEntry::new(team_id, key, initial_value.into(), agent_id);
        self.persist(&entry).await?;
        guard.entry = Some(entry.clone());
        guard.committed = true;

        info!(team = team_id, key, agent = agent_id, "shared entry created");
        Ok(entry)
    }

    pub async fn read(&self, team_id: &str, key: &str, agent_id: &str) -> Result<SharedValue> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let guard = slot.lock().await;
        let entry = guard.entry.as_ref().ok_or_else(|| not_found(team_id, key))?;
        acl::check(entry, agent_id, Permission::Read)?;

        Ok(SharedValue {
            value: entry.value.clone(),
            version: entry.version,
        })
    }

    /// Full snapshot of an entry, including ACL and lock state
    pub async fn get(&self, team_id: &str, key: &str, agent_id: &str) -> Result<SharedEntry> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let guard = slot.lock().await;
        let entry = guard.entry.as_ref().ok_or_else(|| not_found(team_id, key))?;
        acl::check(entry, agent_id, Permission::Read)?;

        Ok(entry.clone())
    }

    /// Compare-and-swap write. Returns the new version.
    pub async fn update(
        &self,
        team_id: &str,
        key: &str,
        agent_id: &str,
        new_value: impl Into<String>,
        expected_version: u64,
    ) -> Result<u64> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;
        let entry = live(&mut guard, team_id, key)?;

        acl::check(entry, agent_id, Permission::Write)?;
        acl::check_lock(entry, agent_id)?;

        if entry.version != expected_version {
            debug!(
                team = team_id,
                key,
                agent = agent_id,
                expected = expected_version,
                actual = entry.version,
                "shared entry version conflict"
            );
            return Err(MemoryOsError::VersionConflict {
                expected: expected_version,
                actual: entry.version,
            });
        }

        let mut next = entry.clone();
        next.value = new_value.into();
        next.version += 1;
        next.updated_at = Utc::now();
        next.updated_by = agent_id.to_string();

        self.persist(&next).await?;
        *entry = next;

        info!(team = team_id, key, agent = agent_id, version = entry.version, "shared entry updated");
        Ok(entry.version)
    }

    /// Take the exclusive lock. Re-locking by the holder is a no-op.
    pub async fn lock(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;
        let entry = live(&mut guard, team_id, key)?;

        acl::check(entry, agent_id, Permission::Write)?;

        match entry.holder() {
            Some(owner) if owner == agent_id => return Ok(()),
            Some(owner) => {
                return Err(MemoryOsError::AlreadyLocked {
                    resource: entry.resource(),
                    owner: owner.to_string(),
                })
            }
            None => {}
        }

        let mut next = entry.clone();
        next.locked = true;
        next.lock_owner = Some(agent_id.to_string());

        self.persist(&next).await?;
        *entry = next;

        info!(team = team_id, key, agent = agent_id, "shared entry locked");
        Ok(())
    }

    pub async fn unlock(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;
        let entry = live(&mut guard, team_id, key)?;

        if entry.holder() != Some(agent_id) {
            return Err(MemoryOsError::NotLockOwner {
                agent: agent_id.to_string(),
                resource: entry.resource(),
            });
        }

        let mut next = entry.clone();
        next.locked = false;
        next.lock_owner = None;

        self.persist(&next).await?;
        *entry = next;

        info!(team = team_id, key, agent = agent_id, "shared entry unlocked");
        Ok(())
    }

    /// Delete an entry. Deleting an already deleted entry succeeds;
    /// a key that never existed is `NotFound`.
    pub async fn delete(&self, team_id: &str, key: &str, agent_id: &str) -> Result<()> {
        validate_ids(team_id, key, agent_id)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;

        let Some(entry) = guard.entry.as_ref() else {
            if !guard.committed {
                return Err(not_found(team_id, key));
            }
            debug!(team = team_id, key, agent = agent_id, "shared entry already deleted");
            return Ok(());
        };

        acl::check(entry, agent_id, Permission::Write)?;
        acl::check_lock(entry, agent_id)?;

        match self
            .store
            .delete(&team_owner_id(team_id), MemoryType::Shared, &mirror_id(key))
            .await
        {
            Ok(()) | Err(MemoryOsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        guard.entry = None;

        info!(team = team_id, key, agent = agent_id, "shared entry deleted");
        Ok(())
    }

    /// Give `target_agent` a permission on the entry
    pub async fn grant(
        &self,
        team_id: &str,
        key: &str,
        granting_agent: &str,
        target_agent: &str,
        permission: Permission,
    ) -> Result<()> {
        validate_ids(team_id, key, granting_agent)?;
        require("target_agent", target_agent)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;
        let entry = live(&mut guard, team_id, key)?;

        acl::check(entry, granting_agent, Permission::Write)?;
        acl::check_lock(entry, granting_agent)?;

        let mut next = entry.clone();
        next.acl.insert(target_agent.to_string(), permission);

        self.persist(&next).await?;
        *entry = next;

        info!(
            team = team_id,
            key,
            agent = granting_agent,
            target = target_agent,
            %permission,
            "shared entry access granted"
        );
        Ok(())
    }

    /// Remove `target_agent` from the ACL. The last writer cannot be revoked.
    pub async fn revoke(
        &self,
        team_id: &str,
        key: &str,
        revoking_agent: &str,
        target_agent: &str,
    ) -> Result<()> {
        validate_ids(team_id, key, revoking_agent)?;
        require("target_agent", target_agent)?;

        let slot = self.existing_slot(team_id, key).await?;
        let mut guard = slot.lock().await;
        let entry = live(&mut guard, team_id, key)?;

        acl::check(entry, revoking_agent, Permission::Write)?;
        acl::check_lock(entry, revoking_agent)?;

        let mut next = entry.clone();
        if next.acl.remove(target_agent).is_none() {
            return Ok(());
        }

        if acl::writer_count(&next) == 0 {
            warn!(team = team_id, key, target = target_agent, "refusing to revoke last writer");
            return Err(MemoryOsError::InvalidArgument(format!(
                "cannot revoke the last writer of {}",
                entry.resource()
            )));
        }

        self.persist(&next).await?;
        *entry = next;

        info!(team = team_id, key, agent = revoking_agent, target = target_agent, "shared entry access revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMemoryStore;

    fn registry() -> (SharedRegistry, Arc<InMemoryMemoryStore>) {
        let store = Arc::new(InMemoryMemoryStore::new());
        (SharedRegistry::new(store.clone()), store)
    }

    /// Store whose writes fail while `offline` is set
    struct FlakyStore {
        inner: InMemoryMemoryStore,
        offline: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryMemoryStore::new(),
                offline: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(MemoryOsError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "store offline",
                )));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MemoryStore for FlakyStore {
        async fn put(&self, memory: Memory) -> Result<()> {
            self.check()?;
            self.inner.put(memory).await
        }

        async fn replace(&self, memory: Memory) -> Result<()> {
            self.check()?;
            self.inner.replace(memory).await
        }

        async fn get(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<Memory> {
            self.inner.get(agent_id, memory_type, id).await
        }

        async fn delete(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete(agent_id, memory_type, id).await
        }

        async fn search(&self, agent_id: &str, query: &str, limit: usize) -> Result<Vec<Memory>> {
            self.inner.search(agent_id, query, limit).await
        }

        async fn query(&self, query: &crate::models::MemoryQuery) -> Result<Vec<Memory>> {
            self.inner.query(query).await
        }

        async fn list(&self, agent_id: &str) -> Result<Vec<Memory>> {
            self.inner.list(agent_id).await
        }
    }

    #[tokio::test]
    async fn test_create_update_conflict_scenario() {
        let (registry, _) = registry();

        let entry = registry.create("t1", "k", "v1", "agentA").await.unwrap();
        assert_eq!(entry.version, 1);
        assert!(!entry.locked);
        assert_eq!(entry.acl.get("agentA"), Some(&Permission::Write));

        let version = registry.update("t1", "k", "agentA", "v2", 1).await.unwrap();
        assert_eq!(version, 2);

        let err = registry.update("t1", "k", "agentA", "v3", 1).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryOsError::VersionConflict { expected: 1, actual: 2 }
        ));

        let current = registry.read("t1", "k", "agentA").await.unwrap();
        assert_eq!(current, SharedValue { value: "v2".into(), version: 2 });
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "agentA").await.unwrap();

        let err = registry.create("t1", "k", "other", "agentB").await.unwrap_err();
        assert!(matches!(err, MemoryOsError::AlreadyExists(_)));

        // Same key in another team is independent
        registry.create("t2", "k", "v1", "agentB").await.unwrap();
    }

    #[tokio::test]
    async fn test_every_successful_update_bumps_version_by_one() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v0", "agentA").await.unwrap();

        for expected in 1..=5u64 {
            let version = registry
                .update("t1", "k", "agentA", format!("v{}", expected), expected)
                .await
                .unwrap();
            assert_eq!(version, expected + 1);
        }
    }

    #[tokio::test]
    async fn test_lock_scenario() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "agentA").await.unwrap();
        registry
            .grant("t1", "k", "agentA", "agentB", Permission::Write)
            .await
            .unwrap();

        registry.lock("t1", "k", "agentA").await.unwrap();
        // Holder may re-lock
        registry.lock("t1", "k", "agentA").await.unwrap();

        assert!(matches!(
            registry.lock("t1", "k", "agentB").await,
            Err(MemoryOsError::AlreadyLocked { .. })
        ));
        assert!(matches!(
            registry.update("t1", "k", "agentB", "v2", 1).await,
            Err(MemoryOsError::Locked { .. })
        ));
        assert!(matches!(
            registry.unlock("t1", "k", "agentB").await,
            Err(MemoryOsError::NotLockOwner { .. })
        ));

        // Readers are never blocked and locking does not bump the version
        let current = registry.read("t1", "k", "agentB").await.unwrap();
        assert_eq!(current.version, 1);

        // The holder can still write
        assert_eq!(registry.update("t1", "k", "agentA", "v2", 1).await.unwrap(), 2);

        registry.unlock("t1", "k", "agentA").await.unwrap();
        assert_eq!(registry.update("t1", "k", "agentB", "v3", 2).await.unwrap(), 3);

        let entry = registry.get("t1", "k", "agentB").await.unwrap();
        assert!(!entry.locked);
        assert_eq!(entry.lock_owner, None);
    }

    #[tokio::test]
    async fn test_unlock_when_unlocked_is_rejected() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "agentA").await.unwrap();

        assert!(matches!(
            registry.unlock("t1", "k", "agentA").await,
            Err(MemoryOsError::NotLockOwner { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_agent_cannot_update() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "owner").await.unwrap();
        registry
            .grant("t1", "k", "owner", "reader", Permission::Read)
            .await
            .unwrap();

        assert_eq!(registry.read("t1", "k", "reader").await.unwrap().value, "v1");

        for expected in [0, 1, 2] {
            let err = registry
                .update("t1", "k", "reader", "hijack", expected)
                .await
                .unwrap_err();
            assert!(matches!(err, MemoryOsError::PermissionDenied { .. }));
        }
        assert!(matches!(
            registry.lock("t1", "k", "reader").await,
            Err(MemoryOsError::PermissionDenied { .. })
        ));
        assert!(matches!(
            registry.delete("t1", "k", "reader").await,
            Err(MemoryOsError::PermissionDenied { .. })
        ));
        assert!(matches!(
            registry.read("t1", "k", "stranger").await,
            Err(MemoryOsError::PermissionDenied { .. })
        ));

        assert_eq!(registry.read("t1", "k", "owner").await.unwrap().version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_have_single_winner() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        registry.create("t1", "k", "v0", "agentA").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update("t1", "k", "agentA", format!("v{}", i), 1)
                    .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 2);
                    wins += 1;
                }
                Err(MemoryOsError::VersionConflict { expected: 1, actual: 2 }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(registry.read("t1", "k", "agentA").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_lock_on_one_key_does_not_affect_another() {
        let (registry, _) = registry();
        registry.create("t1", "a", "1", "agentA").await.unwrap();
        registry.create("t1", "b", "1", "agentB").await.unwrap();

        registry.lock("t1", "a", "agentA").await.unwrap();
        assert_eq!(registry.update("t1", "b", "agentB", "2", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let (registry, store) = registry();

        assert!(matches!(
            registry.delete("t1", "never", "agentA").await,
            Err(MemoryOsError::NotFound(_))
        ));

        registry.create("t1", "k", "v1", "agentA").await.unwrap();
        assert!(store
            .get(&team_owner_id("t1"), MemoryType::Shared, "shared:k")
            .await
            .is_ok());

        registry.delete("t1", "k", "agentA").await.unwrap();
        // Idempotent once the key has existed
        registry.delete("t1", "k", "agentA").await.unwrap();

        assert!(matches!(
            registry.read("t1", "k", "agentA").await,
            Err(MemoryOsError::NotFound(_))
        ));
        assert!(matches!(
            registry.update("t1", "k", "agentA", "v2", 1).await,
            Err(MemoryOsError::NotFound(_))
        ));
        assert!(store
            .get(&team_owner_id("t1"), MemoryType::Shared, "shared:k")
            .await
            .is_err());

        // Re-creation starts over at version 1
        let entry = registry.create("t1", "k", "fresh", "agentB").await.unwrap();
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_delete_blocked_by_foreign_lock() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "agentA").await.unwrap();
        registry
            .grant("t1", "k", "agentA", "agentB", Permission::Write)
            .await
            .unwrap();
        registry.lock("t1", "k", "agentA").await.unwrap();

        assert!(matches!(
            registry.delete("t1", "k", "agentB").await,
            Err(MemoryOsError::Locked { .. })
        ));
    }

    #[tokio::test]
    async fn test_mirror_tracks_latest_version() {
        let (registry, store) = registry();
        registry.create("t1", "k", "v1", "agentA").await.unwrap();
        registry.update("t1", "k", "agentA", "v2", 1).await.unwrap();

        let mirror = store
            .get(&team_owner_id("t1"), MemoryType::Shared, "shared:k")
            .await
            .unwrap();
        assert_eq!(mirror.content, "v2");
        assert_eq!(mirror.metadata["version"], serde_json::json!(2));
        assert_eq!(mirror.metadata["acl"]["agentA"], serde_json::json!("write"));
    }

    #[tokio::test]
    async fn test_revoke() {
        let (registry, _) = registry();
        registry.create("t1", "k", "v1", "owner").await.unwrap();
        registry
            .grant("t1", "k", "owner", "helper", Permission::Read)
            .await
            .unwrap();

        registry.revoke("t1", "k", "owner", "helper").await.unwrap();
        assert!(matches!(
            registry.read("t1", "k", "helper").await,
            Err(MemoryOsError::PermissionDenied { .. })
        ));

        assert!(matches!(
            registry.revoke("t1", "k", "owner", "owner").await,
            Err(MemoryOsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_validation_precedes_side_effects() {
        let (registry, store) = registry();

        assert!(matches!(
            registry.create("", "k", "v", "agentA").await,
            Err(MemoryOsError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.create("t1", "k", "v", " ").await,
            Err(MemoryOsError::InvalidArgument(_))
        ));
        assert!(store.list(&team_owner_id("t1")).await.unwrap().is_empty());

        // Nothing was reserved for the rejected create
        assert!(matches!(
            registry.delete("t1", "k", "agentA").await,
            Err(MemoryOsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_trace() {
        let store = Arc::new(FlakyStore::new());
        let registry = SharedRegistry::new(store.clone());

        store.set_offline(true);
        assert!(matches!(
            registry.create("t1", "k", "v1", "agentA").await,
            Err(MemoryOsError::IoError(_))
        ));
        store.set_offline(false);

        assert!(matches!(
            registry.delete("t1", "k", "agentA").await,
            Err(MemoryOsError::NotFound(_))
        ));
        assert!(matches!(
            registry.read("t1", "k", "agentA").await,
            Err(MemoryOsError::NotFound(_))
        ));

        // The key can still be created, and once deleted, deletes stay idempotent
        let entry = registry.create("t1", "k", "v1", "agentA").await.unwrap();
        assert_eq!(entry.version, 1);
        registry.delete("t1", "k", "agentA").await.unwrap();
        registry.delete("t1", "k", "agentA").await.unwrap();
    }
}
