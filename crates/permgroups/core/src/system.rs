// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Engine facade wiring storage, registries, pipeline and audit together

use crate::audit::AuditLogger;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::groups::GroupManager;
use crate::pipeline::MutationPipeline;
use crate::storage::{JsonFileStorage, MemoryStorage, Storage};
use crate::subject::{Group, User};
use crate::users::UserManager;
use permgroups_common::{GroupError, GroupNode, GroupResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Entry point for hosts: one instance per storage backend
#[derive(Clone)]
pub struct PermissionSystem {
    config: EngineConfig,

    /// Backend every write is persisted to
    storage: Arc<dyn Storage>,

    users: Arc<UserManager>,

    groups: Arc<GroupManager>,

    /// Audit trail shared by every manager
    audit: Arc<AuditLogger>,
}

impl PermissionSystem {
    /// Build the engine on `storage` and load every persisted group
    pub async fn initialize(config: EngineConfig, storage: Arc<dyn Storage>) -> GroupResult<Self> {
        Self::initialize_with_clock(config, storage, Arc::new(SystemClock)).await
    }

    /// Same as [`PermissionSystem::initialize`] with an injected time source
    pub async fn initialize_with_clock(config: EngineConfig, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> GroupResult<Self> {
        let audit = Arc::new(AuditLogger::with_max_events(config.audit_max_events));
        let pipeline = Arc::new(MutationPipeline::new(config.storage_timeout, audit.clone()));
        let users = Arc::new(UserManager::new(storage.clone(), pipeline.clone()));
        let groups = Arc::new(GroupManager::new(storage.clone(), users.clone(), pipeline, clock));

        let loaded = groups.load_groups().await?;

        info!(groups = loaded, storage_timeout_ms = %config.storage_timeout.as_millis(), "Permission system initialized successfully");
        Ok(Self {
            config,
            storage,
            users,
            groups,
            audit,
        })
    }

    /// Engine backed by JSON files under `config.data_dir`
    pub async fn with_json_storage(config: EngineConfig) -> GroupResult<Self> {
        let storage = JsonFileStorage::open(&config.data_dir).await.map_err(|err| GroupError::storage("open", err.to_string()))?;
        Self::initialize(config, Arc::new(storage)).await
    }

    /// Engine backed by process memory with default configuration
    pub async fn in_memory() -> GroupResult<Self> {
        Self::initialize(EngineConfig::default(), Arc::new(MemoryStorage::new())).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn users(&self) -> &Arc<UserManager> {
        &self.users
    }

    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub async fn load_user(&self, name: &str) -> GroupResult<Option<Arc<User>>> {
        self.users.load_user(name).await
    }

    pub async fn create_user(&self, name: &str) -> GroupResult<Arc<User>> {
        self.users.create_user(name).await
    }

    pub fn get_group_node(&self, user: &User) -> GroupNode {
        self.groups.get_group_node(user)
    }

    pub fn get_group(&self, user: &User) -> Option<Arc<Group>> {
        self.groups.get_group(user)
    }

    /// Resolve the named user's group, loading the user if needed
    pub async fn resolve_group(&self, name: &str) -> GroupResult<GroupNode> {
        let user = self.users.load_user(name).await?.ok_or_else(|| GroupError::UserNotFound { name: name.to_string() })?;
        Ok(self.groups.get_group_node(&user))
    }

    /// Check a permission for the named user
    pub async fn check_permission(&self, name: &str, key: &str) -> GroupResult<bool> {
        let start_time = Instant::now();

        let user = self.users.load_user(name).await?.ok_or_else(|| GroupError::UserNotFound { name: name.to_string() })?;
        let allowed = self.groups.has_permission(&user, key);

        let duration = start_time.elapsed();
        if duration > Duration::from_millis(5) {
            warn!(user = %name, key = %key, duration_ms = %duration.as_millis(), "Slow permission check detected");
        }

        debug!(user = %name, key = %key, allowed = %allowed, "Permission check completed");
        Ok(allowed)
    }

    pub async fn effective_permissions(&self, name: &str) -> GroupResult<BTreeMap<String, bool>> {
        let user = self.users.load_user(name).await?.ok_or_else(|| GroupError::UserNotFound { name: name.to_string() })?;
        Ok(self.groups.effective_permissions(&user))
    }

    /// Drop every memoized resolution
    pub fn invalidate_all(&self) {
        self.users.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventType;
    use crate::clock::ManualClock;
    use crate::subject::SubjectRecord;
    use permgroups_common::Node;

    #[tokio::test]
    async fn test_in_memory_has_default_group() {
        let system = PermissionSystem::in_memory().await.unwrap();
        assert!(system.groups().contains("default"));
    }

    #[tokio::test]
    async fn test_initialize_loads_persisted_groups() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_group(SubjectRecord::with_nodes("vip", vec![Node::new("weight.20")]));
        storage.insert_user(SubjectRecord::with_nodes("steve", vec![Node::new("group.vip")]));

        let system = PermissionSystem::initialize_with_clock(EngineConfig::default(), storage.clone(), Arc::new(ManualClock::new(1_000))).await.unwrap();

        assert_eq!(system.groups().weight_of("vip"), 20);
        assert!(storage.group("default").is_some());
        assert_eq!(system.resolve_group("steve").await.unwrap().name(), "vip");
    }

    #[tokio::test]
    async fn test_check_permission_unknown_user() {
        let system = PermissionSystem::in_memory().await.unwrap();
        let err = system.check_permission("ghost", "fly").await.unwrap_err();
        assert!(matches!(err, GroupError::UserNotFound { .. }));
    }

    #[tokio::test]
    async fn test_audit_is_shared() {
        let system = PermissionSystem::in_memory().await.unwrap();
        system.groups().create_and_load("vip").await.unwrap();

        let created = system.audit().get_events_by_type(AuditEventType::GroupCreated, None);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].subject, "vip");
    }
}
