//! Access control for shared entries
//!
//! Pure checks over a `SharedEntry`; no state of their own.

use crate::error::MemoryOsError;
use crate::models::{Permission, SharedEntry};
use crate::Result;

/// Permission an agent holds on the entry, if any
pub fn permission_of(entry: &SharedEntry, agent_id: &str) -> Option<Permission> {
    entry.acl.get(agent_id).copied()
}

pub fn is_allowed(entry: &SharedEntry, agent_id: &str, required: Permission) -> bool {
    permission_of(entry, agent_id)
        .map(|held| held.allows(required))
        .unwrap_or(false)
}

pub fn check(entry: &SharedEntry, agent_id: &str, required: Permission) -> Result<()> {
    if is_allowed(entry, agent_id, required) {
        return Ok(());
    }

    Err(MemoryOsError::PermissionDenied {
        agent: agent_id.to_string(),
        permission: required.to_string(),
        resource: entry.resource(),
    })
}

/// Fails when the entry is locked by someone other than `agent_id`
pub fn check_lock(entry: &SharedEntry, agent_id: &str) -> Result<()> {
    match entry.holder() {
        Some(owner) if owner != agent_id => Err(MemoryOsError::Locked {
            resource: entry.resource(),
            owner: owner.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Number of agents holding write access
pub fn writer_count(entry: &SharedEntry) -> usize {
    entry
        .acl
        .values()
        .filter(|p| **p == Permission::Write)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> SharedEntry {
        let mut entry = SharedEntry::new("t1", "k", "v1".into(), "writer");
        entry.acl.insert("reader".into(), Permission::Read);
        entry
    }

    #[test]
    fn test_permission_matrix() {
        let entry = entry();

        assert!(check(&entry, "writer", Permission::Read).is_ok());
        assert!(check(&entry, "writer", Permission::Write).is_ok());
        assert!(check(&entry, "reader", Permission::Read).is_ok());
        assert!(matches!(
            check(&entry, "reader", Permission::Write),
            Err(MemoryOsError::PermissionDenied { .. })
        ));
        assert!(!is_allowed(&entry, "stranger", Permission::Read));
        assert_eq!(writer_count(&entry), 1);
    }

    #[test]
    fn test_lock_check() {
        let mut entry = entry();
        assert!(check_lock(&entry, "anyone").is_ok());

        entry.locked = true;
        entry.lock_owner = Some("writer".into());
        assert!(check_lock(&entry, "writer").is_ok());
        assert!(matches!(
            check_lock(&entry, "reader"),
            Err(MemoryOsError::Locked { .. })
        ));
    }
}
