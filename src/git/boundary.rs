//! File boundaries and the in-process lock table.
//!
//! Boundaries declare which paths an agent may touch and with what access.
//! They load from a JSON descriptor (`agent_id -> [FileBoundary]`); when the
//! file is missing a default set is materialized and written back. The lock
//! table is process-local: a single master process owns all boundary
//! decisions, and one `RwLock` guards both maps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use agentflow_types::{
    generate_conflict_id, AccessType, Conflict, ConflictKind, ConflictSeverity, ConflictStatus,
    FileBoundary, FileLock, LockType,
};

use crate::error::{AgentFlowError, Result};

#[derive(Default)]
struct BoundaryState {
    boundaries: HashMap<String, Vec<FileBoundary>>,
    /// Active locks keyed by path. Released locks are removed outright.
    locks: HashMap<String, Vec<FileLock>>,
}

pub struct BoundaryManager {
    state: RwLock<BoundaryState>,
    descriptor_path: PathBuf,
}

impl BoundaryManager {
    /// Load boundaries from `descriptor_path`, materializing defaults when
    /// the file is absent or unreadable.
    pub fn new(descriptor_path: impl Into<PathBuf>) -> Self {
        let manager = Self {
            state: RwLock::new(BoundaryState::default()),
            descriptor_path: descriptor_path.into(),
        };
        manager.load_boundaries();
        manager
    }

    fn load_boundaries(&self) {
        match std::fs::read_to_string(&self.descriptor_path) {
            Ok(data) => match serde_json::from_str::<HashMap<String, Vec<FileBoundary>>>(&data) {
                Ok(boundaries) => {
                    self.state.write().unwrap().boundaries = boundaries;
                }
                Err(e) => {
                    tracing::error!(path = %self.descriptor_path.display(), "invalid boundary descriptor: {e}");
                    self.install_defaults();
                }
            },
            Err(e) => {
                tracing::warn!(path = %self.descriptor_path.display(), "no boundary descriptor ({e}), creating defaults");
                self.install_defaults();
            }
        }
    }

    fn install_defaults(&self) {
        let defaults = default_boundaries();
        self.state.write().unwrap().boundaries = defaults;
        if let Err(e) = self.save_boundaries() {
            tracing::error!("failed to save default boundaries: {e}");
        }
    }

    /// Persist the current boundary map back to the descriptor file.
    pub fn save_boundaries(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        let data = serde_json::to_string_pretty(&state.boundaries)?;
        if let Some(dir) = self.descriptor_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.descriptor_path, data)?;
        Ok(())
    }

    pub fn agent_boundaries(&self, agent_id: &str) -> Vec<FileBoundary> {
        self.state
            .read()
            .unwrap()
            .boundaries
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `agent_id` may perform `access` on `path`. No matching
    /// boundary denies; a readonly boundary denies writes.
    pub fn can_access(&self, agent_id: &str, path: &str, access: LockType) -> bool {
        let state = self.state.read().unwrap();
        let Some(boundaries) = state.boundaries.get(agent_id) else {
            return false;
        };

        boundaries.iter().any(|b| {
            if !matches_pattern(path, &b.path_pattern) {
                return false;
            }
            match b.access_type {
                AccessType::Exclusive | AccessType::Shared => true,
                AccessType::Readonly => access == LockType::Read,
            }
        })
    }

    /// Acquire a lock on `path`. Fails when any active lock on the path is
    /// incompatible with the request (two reads coexist; anything involving
    /// a write does not).
    pub fn acquire_lock(&self, agent_id: &str, path: &str, lock_type: LockType) -> bool {
        let mut state = self.state.write().unwrap();
        let held = state.locks.entry(path.to_string()).or_default();

        if held.iter().any(|l| !l.lock_type.compatible_with(lock_type)) {
            return false;
        }

        held.push(FileLock {
            path: path.to_string(),
            lock_type,
            agent_id: agent_id.to_string(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        });

        tracing::info!(agent_id, path, lock_type = lock_type.as_str(), "lock acquired");
        true
    }

    /// Release a lock iff held by the same agent with the same type.
    pub fn release_lock(&self, agent_id: &str, path: &str, lock_type: LockType) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(held) = state.locks.get_mut(path) else {
            return false;
        };

        let before = held.len();
        held.retain(|l| !(l.agent_id == agent_id && l.lock_type == lock_type));
        let released = held.len() < before;
        if held.is_empty() {
            state.locks.remove(path);
        }

        if released {
            tracing::info!(agent_id, path, lock_type = lock_type.as_str(), "lock released");
        }
        released
    }

    /// Drop every lock an agent still holds. Used when the agent's task
    /// reaches a terminal state.
    pub fn release_all_for_agent(&self, agent_id: &str) -> Vec<String> {
        let mut state = self.state.write().unwrap();
        let mut released = Vec::new();
        state.locks.retain(|path, held| {
            let before = held.len();
            held.retain(|l| l.agent_id != agent_id);
            if held.len() < before {
                released.push(path.clone());
            }
            !held.is_empty()
        });
        released
    }

    pub fn active_locks(&self, path: &str) -> Vec<FileLock> {
        self.state
            .read()
            .unwrap()
            .locks
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// For each requested path that carries a write lock held by another
    /// agent, produce a `file_locked` conflict of severity high. The caller
    /// decides whether to persist them.
    pub fn check_conflicts(&self, agent_id: &str, paths: &[String]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for path in paths {
            for lock in self.active_locks(path) {
                if lock.agent_id != agent_id && lock.lock_type == LockType::Write {
                    conflicts.push(Conflict {
                        id: generate_conflict_id(),
                        task_id: None,
                        agent_id: agent_id.to_string(),
                        kind: ConflictKind::FileLocked.as_str().to_string(),
                        file_paths: serde_json::to_string(&[path]).unwrap_or_default(),
                        description: format!("File {} is locked by {}", path, lock.agent_id),
                        severity: ConflictSeverity::High.as_str().to_string(),
                        status: ConflictStatus::Pending.as_str().to_string(),
                        created_at: chrono::Utc::now().to_rfc3339(),
                        resolved_at: None,
                    });
                }
            }
        }
        conflicts
    }

    /// `PermissionDenied` with a reason unless `agent_id` may perform
    /// `access` on `path`.
    pub fn verify_access(&self, agent_id: &str, path: &str, access: LockType) -> Result<()> {
        if self.can_access(agent_id, path, access) {
            Ok(())
        } else {
            Err(AgentFlowError::PermissionDenied(format!(
                "agent {} is not authorized to {} {}",
                agent_id,
                access.as_str(),
                path
            )))
        }
    }
}

/// `**` matches any subpath of the prefix before it; otherwise glob, and a
/// pattern without wildcards must match exactly.
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = clean(path);
    let pattern = clean(pattern);

    if let Some(prefix) = pattern.split("**").next().filter(|_| pattern.contains("**")) {
        return path.starts_with(prefix);
    }

    if pattern.contains('*') {
        return glob::Pattern::new(&pattern)
            .map(|p| p.matches(&path))
            .unwrap_or(false);
    }

    path == pattern
}

fn clean(path: &str) -> String {
    Path::new(path)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}

fn default_boundaries() -> HashMap<String, Vec<FileBoundary>> {
    let mut map = HashMap::new();
    map.insert(
        "frontend".to_string(),
        vec![
            FileBoundary {
                path_pattern: "src/frontend/**".to_string(),
                access_type: AccessType::Exclusive,
                description: "Frontend agent owns frontend sources".to_string(),
            },
            FileBoundary {
                path_pattern: "src/api/**".to_string(),
                access_type: AccessType::Readonly,
                description: "Frontend agent may read the API surface".to_string(),
            },
        ],
    );
    map.insert(
        "backend".to_string(),
        vec![
            FileBoundary {
                path_pattern: "src/backend/**".to_string(),
                access_type: AccessType::Exclusive,
                description: "Backend agent owns backend sources".to_string(),
            },
            FileBoundary {
                path_pattern: "src/api/**".to_string(),
                access_type: AccessType::Shared,
                description: "Backend agent shares the API surface".to_string(),
            },
        ],
    );
    map.insert(
        "database".to_string(),
        vec![FileBoundary {
            path_pattern: "src/database/**".to_string(),
            access_type: AccessType::Exclusive,
            description: "Database agent owns schema and migrations".to_string(),
        }],
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, BoundaryManager) {
        let dir = TempDir::new().unwrap();
        let manager = BoundaryManager::new(dir.path().join("boundaries.json"));
        (dir, manager)
    }

    #[test]
    fn missing_descriptor_materializes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("boundaries.json");

        let manager = BoundaryManager::new(&path);
        assert!(path.exists());
        assert!(!manager.agent_boundaries("frontend").is_empty());

        // A fresh manager reads the saved file rather than re-defaulting.
        let reloaded = BoundaryManager::new(&path);
        assert_eq!(
            reloaded.agent_boundaries("backend").len(),
            manager.agent_boundaries("backend").len()
        );
    }

    #[test]
    fn access_matrix() {
        let (_dir, manager) = manager();

        // exclusive: read and write
        assert!(manager.can_access("frontend", "src/frontend/app.ts", LockType::Read));
        assert!(manager.can_access("frontend", "src/frontend/app.ts", LockType::Write));

        // shared: read and write
        assert!(manager.can_access("backend", "src/api/routes.rs", LockType::Read));
        assert!(manager.can_access("backend", "src/api/routes.rs", LockType::Write));

        // readonly: read only
        assert!(manager.can_access("frontend", "src/api/routes.rs", LockType::Read));
        assert!(!manager.can_access("frontend", "src/api/routes.rs", LockType::Write));

        // no matching boundary: deny
        assert!(!manager.can_access("frontend", "src/backend/main.rs", LockType::Read));
        assert!(!manager.can_access("unknown-agent", "src/api/x.rs", LockType::Read));
    }

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("src/frontend/deep/file.ts", "src/frontend/**"));
        assert!(matches_pattern("src/frontend/a.ts", "src/frontend/**/*"));
        assert!(!matches_pattern("src/backend/a.rs", "src/frontend/**"));
        assert!(matches_pattern("src/lib.rs", "src/*.rs"));
        assert!(!matches_pattern("src/db/mod.rs", "src/*.rs"));
        assert!(matches_pattern("Cargo.toml", "Cargo.toml"));
        assert!(!matches_pattern("Cargo.lock", "Cargo.toml"));
    }

    #[test]
    fn lock_compatibility() {
        let (_dir, manager) = manager();

        assert!(manager.acquire_lock("a", "src/x.rs", LockType::Read));
        // Second read coexists.
        assert!(manager.acquire_lock("b", "src/x.rs", LockType::Read));
        // Write blocked by reads.
        assert!(!manager.acquire_lock("c", "src/x.rs", LockType::Write));

        assert!(manager.release_lock("a", "src/x.rs", LockType::Read));
        assert!(manager.release_lock("b", "src/x.rs", LockType::Read));

        assert!(manager.acquire_lock("c", "src/x.rs", LockType::Write));
        // Anything is blocked by a write.
        assert!(!manager.acquire_lock("a", "src/x.rs", LockType::Read));
        assert!(!manager.acquire_lock("a", "src/x.rs", LockType::Write));

        // Only the holder releases.
        assert!(!manager.release_lock("a", "src/x.rs", LockType::Write));
        assert!(manager.release_lock("c", "src/x.rs", LockType::Write));
        assert!(manager.active_locks("src/x.rs").is_empty());
    }

    #[test]
    fn conflicts_for_foreign_write_locks() {
        let (_dir, manager) = manager();

        manager.acquire_lock("backend", "src/api/shared.rs", LockType::Write);
        manager.acquire_lock("backend", "src/api/read.rs", LockType::Read);

        let conflicts = manager.check_conflicts(
            "frontend",
            &[
                "src/api/shared.rs".to_string(),
                "src/api/read.rs".to_string(),
                "src/api/free.rs".to_string(),
            ],
        );

        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.kind, "file_locked");
        assert_eq!(c.severity, "high");
        assert_eq!(c.file_paths_vec(), vec!["src/api/shared.rs"]);

        // The holder itself sees no conflict.
        assert!(manager
            .check_conflicts("backend", &["src/api/shared.rs".to_string()])
            .is_empty());
    }
}
