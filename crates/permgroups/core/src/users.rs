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

//! User registry and user-level permission writes

use crate::pipeline::MutationPipeline;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::subject::{Subject, User};
use permgroups_common::{GroupResult, Node};
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::MutexGuard;
use tracing::{debug, info};

/// Loads users on demand and routes their permission writes through the pipeline
///
/// Also owns the resolution generation: bumping it invalidates every loaded
/// user's memoized group in O(1).
pub struct UserManager {
    users: Registry<User>,
    storage: Arc<dyn Storage>,
    pipeline: Arc<MutationPipeline>,
    generation: AtomicU64,
}

impl UserManager {
    pub fn new(storage: Arc<dyn Storage>, pipeline: Arc<MutationPipeline>) -> Self {
        Self {
            users: Registry::lowercase(User::new),
            storage,
            pipeline,
            generation: AtomicU64::new(0),
        }
    }

    /// Current resolution generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate the derived state of every loaded user
    pub fn invalidate_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation = generation, "Invalidated all loaded users");
    }

    /// Already-loaded user, without touching storage
    pub fn get_user(&self, name: &str) -> Option<Arc<User>> {
        self.users.get(name)
    }

    pub fn loaded_users(&self) -> Vec<Arc<User>> {
        self.users.get_all()
    }

    /// Drop a user from memory; its persisted row is untouched
    pub fn unload_user(&self, name: &str) -> bool {
        self.users.remove(name).is_some()
    }

    /// Loaded user or, failing that, the persisted one; `None` if unknown
    pub async fn load_user(&self, name: &str) -> GroupResult<Option<Arc<User>>> {
        if let Some(user) = self.users.get(name) {
            return Ok(Some(user));
        }

        let key = self.users.normalize(name);
        let record = self.pipeline.storage_call("load_user", self.storage.load_user(&key)).await?;
        Ok(record.map(|record| {
            debug!(user = %key, nodes = record.nodes.len(), "Loaded user from storage");
            self.users.insert(&key, User::from_record(record))
        }))
    }

    /// Load the user, creating and persisting an empty one if unknown
    pub async fn create_user(&self, name: &str) -> GroupResult<Arc<User>> {
        if let Some(user) = self.load_user(name).await? {
            return Ok(user);
        }

        let user = self.users.get_or_create(name);
        if let Err(err) = self.pipeline.storage_call("save_user", self.storage.save_user(&user.to_record())).await {
            self.users.remove(name);
            return Err(err);
        }
        info!(user = %user.name(), "Created user");
        Ok(user)
    }

    /// Set a node on a user and persist it
    pub async fn set_permission(&self, user: &User, node: Node) -> GroupResult<()> {
        let guard = user.write_lock().lock().await;
        self.set_permission_locked(&guard, user, node).await
    }

    pub(crate) async fn set_permission_locked(&self, guard: &MutexGuard<'_, ()>, user: &User, node: Node) -> GroupResult<()> {
        let storage = self.storage.clone();
        let key = node.key().to_string();
        let value = node.value();

        self.pipeline
            .apply_locked(guard, "save_user", user, move |cache| cache.put(node), move |record| async move { storage.save_user(&record).await }, || user.clear_stored_group())
            .await?;

        self.pipeline.audit().log_permission_set(user.name(), &key, value);
        Ok(())
    }

    /// Remove a node from a user; true if it existed
    pub async fn remove_permission(&self, user: &User, key: &str) -> GroupResult<bool> {
        let storage = self.storage.clone();
        let removed = self
            .pipeline
            .apply("save_user", user, |cache| cache.remove(key), move |record| async move { storage.save_user(&record).await }, || user.clear_stored_group())
            .await?;

        if removed {
            self.pipeline.audit().log_permission_removed(user.name(), key);
        }
        Ok(removed)
    }

    /// Remove every node matching `pattern` while the caller holds the writer lock
    pub(crate) async fn remove_matching_locked(&self, guard: &MutexGuard<'_, ()>, user: &User, pattern: &Regex) -> GroupResult<Vec<Node>> {
        let storage = self.storage.clone();
        self.pipeline
            .apply_locked(guard, "save_user", user, |cache| cache.remove_matching(pattern), move |record| async move { storage.save_user(&record).await }, || user.clear_stored_group())
            .await
    }

    /// Drop `key` from every loaded user's cache after storage has already swept it
    pub(crate) async fn forget_node(&self, key: &str) -> usize {
        let mut touched = 0;
        for user in self.users.get_all() {
            let _guard = user.write_lock().lock().await;
            if user.cache().write().remove(key) {
                touched += 1;
            }
        }
        touched
    }
}
