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

//! Group lifecycle, group assignment and best-group resolution

use crate::clock::Clock;
use crate::pipeline::MutationPipeline;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::subject::{Group, Subject, User};
use crate::users::UserManager;
use metrics::counter;
use permgroups_common::{
    DEFAULT_GROUP_NAME, GROUP_KEY_PREFIX, GROUP_PATTERN, GroupError, GroupNode, GroupResult, Node, NodeKind, PREFIX_PATTERN, PrefixNode, WEIGHT_PATTERN, WeightNode,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::MutexGuard;
use tracing::{debug, error, info};

/// Pick the candidate whose group weighs the most
///
/// Ties keep the earliest candidate. Callers feed candidates in cache key
/// order, so ties resolve to the lexicographically smallest group name.
pub fn select_best_group<I, W>(candidates: I, weight_of: W) -> Option<GroupNode>
where
    I: IntoIterator<Item = GroupNode>,
    W: Fn(&str) -> i32,
{
    let mut best: Option<(i32, GroupNode)> = None;
    for candidate in candidates {
        let weight = weight_of(candidate.name());
        if best.as_ref().is_none_or(|(current, _)| weight > *current) {
            best = Some((weight, candidate));
        }
    }
    best.map(|(_, node)| node)
}

/// Group registry and every operation that reads or writes group state
pub struct GroupManager {
    groups: Registry<Group>,
    users: Arc<UserManager>,
    storage: Arc<dyn Storage>,
    pipeline: Arc<MutationPipeline>,
    clock: Arc<dyn Clock>,
    scans: AtomicU64,
}

impl GroupManager {
    /// Create a manager whose registry already holds the default group
    pub fn new(storage: Arc<dyn Storage>, users: Arc<UserManager>, pipeline: Arc<MutationPipeline>, clock: Arc<dyn Clock>) -> Self {
        let groups = Registry::lowercase(Group::new);
        groups.get_or_create(DEFAULT_GROUP_NAME);

        Self {
            groups,
            users,
            storage,
            pipeline,
            clock,
            scans: AtomicU64::new(0),
        }
    }

    pub fn users(&self) -> &Arc<UserManager> {
        &self.users
    }

    /// Number of resolutions that had to scan a user's cache
    pub fn resolution_scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name)
    }

    pub fn get_all(&self) -> Vec<Arc<Group>> {
        self.groups.get_all()
    }

    /// Groups ordered by weight, heaviest first, then by name
    pub fn groups_by_weight(&self) -> Vec<Arc<Group>> {
        let mut groups = self.groups.get_all();
        groups.sort_by(|a, b| b.weight().cmp(&a.weight()).then_with(|| a.name().cmp(b.name())));
        groups
    }

    /// Weight of a registered group, -1 when unknown
    pub fn weight_of(&self, name: &str) -> i32 {
        self.groups.get(name).map_or(-1, |group| group.weight())
    }

    pub fn prefix_of(&self, name: &str) -> String {
        self.groups.get(name).map(|group| group.prefix()).unwrap_or_default()
    }

    fn require(&self, name: &str) -> GroupResult<Arc<Group>> {
        self.groups.get(name).ok_or_else(|| GroupError::GroupNotFound { name: name.to_string() })
    }

    async fn require_user(&self, name: &str) -> GroupResult<Arc<User>> {
        self.users.load_user(name).await?.ok_or_else(|| GroupError::UserNotFound { name: name.to_string() })
    }

    /// Populate the registry from storage, recreating the default group if it is missing
    pub async fn load_groups(&self) -> GroupResult<usize> {
        let records = self.pipeline.storage_call("load_all_groups", self.storage.load_all_groups()).await?;
        let count = records.len();
        let mut has_default = false;

        for record in records {
            has_default |= record.name.eq_ignore_ascii_case(DEFAULT_GROUP_NAME);
            let name = record.name.clone();
            self.groups.replace(&name, Group::from_record(record));
        }

        if !has_default {
            self.recreate_default().await?;
        }

        info!(groups = count, "Loaded groups from storage");
        Ok(count)
    }

    async fn recreate_default(&self) -> GroupResult<Arc<Group>> {
        let record = self.pipeline.storage_call("create_and_load_group", self.storage.create_and_load_group(DEFAULT_GROUP_NAME)).await?;
        let group = self.groups.replace(DEFAULT_GROUP_NAME, Group::from_record(record));
        info!(group = %DEFAULT_GROUP_NAME, "Default group recreated");
        Ok(group)
    }

    /// Create a group through storage and register it
    pub async fn create_and_load(&self, name: &str) -> GroupResult<Arc<Group>> {
        let key = self.groups.normalize(name);
        if self.groups.contains(&key) {
            return Err(GroupError::AlreadyExists { name: key });
        }

        let record = self.pipeline.storage_call("create_and_load_group", self.storage.create_and_load_group(&key)).await?;
        let group = self.groups.insert(&key, Group::from_record(record));
        self.pipeline.audit().log_group_created(&key);
        Ok(group)
    }

    /// Resolve the group node that decides a user's group
    ///
    /// A memoized result is returned untouched while it is stamped with the
    /// current cache revision and generation, unexpired, and refers to a
    /// registered group. Otherwise the user's `group.` nodes are scanned and
    /// the heaviest live assignment wins, falling back to the default group.
    pub fn get_group_node(&self, user: &User) -> GroupNode {
        let now = self.clock.now_millis();
        let generation = self.users.generation();

        if let Some(stored) = user.stored_group(generation) {
            if self.groups.contains(stored.name()) && !stored.is_expired_at(now) {
                counter!("permgroups_resolution_memo_hits_total", 1);
                return stored;
            }
        }

        counter!("permgroups_resolution_scans_total", 1);
        self.scans.fetch_add(1, Ordering::Relaxed);
        let (revision, nodes) = {
            let cache = user.cache().read();
            (cache.revision(), cache.get_starting_with(GROUP_KEY_PREFIX))
        };

        let default = GroupNode::default_group();
        if nodes.is_empty() {
            user.set_stored_group(default.clone(), revision, generation);
            return default;
        }

        let candidates = nodes
            .iter()
            .filter(|node| node.value() && !node.is_expired_at(now))
            .filter_map(GroupNode::from_node)
            .filter(|group| self.groups.contains(group.name()));

        let best = select_best_group(candidates, |name| self.weight_of(name)).unwrap_or(default);
        debug!(user = %user.name(), group = %best.name(), "Resolved group");

        user.set_stored_group(best.clone(), revision, generation);
        best
    }

    /// The registered group a user resolves to
    pub fn get_group(&self, user: &User) -> Option<Arc<Group>> {
        self.groups.get(self.get_group_node(user).name())
    }

    /// Group of an already loaded user, without touching storage
    pub fn group_of_loaded(&self, user: &str) -> Option<Arc<Group>> {
        let user = self.users.get_user(user)?;
        self.get_group(&user)
    }

    /// Replace every group assignment of a user with a single new one
    pub async fn set_group(&self, subject: &str, group: &str, duration_millis: i64) -> GroupResult<()> {
        let group = self.require(group)?;
        let user = self.require_user(subject).await?;

        let guard = user.write_lock().lock().await;
        let cleared = self.users.remove_matching_locked(&guard, &user, &GROUP_PATTERN).await?;
        debug!(user = %user.name(), cleared = cleared.len(), "Cleared group assignments");

        self.assign_locked(&guard, &user, group.name(), duration_millis).await
    }

    /// Add a group assignment to a user loaded by name
    pub async fn add_group(&self, subject: &str, group: &str, duration_millis: i64) -> GroupResult<()> {
        let user = self.require_user(subject).await?;
        self.add_group_for(&user, group, duration_millis).await
    }

    /// Add a group assignment, expiring after `duration_millis` when positive
    pub async fn add_group_for(&self, user: &User, group: &str, duration_millis: i64) -> GroupResult<()> {
        let current = self.get_group_node(user);
        if !current.is_expired_at(self.clock.now_millis()) && current.refers_to(group) {
            return Err(GroupError::AlreadyHasGroup {
                user: user.name().to_string(),
                group: group.to_lowercase(),
            });
        }

        let group = self.require(group)?;
        let guard = user.write_lock().lock().await;
        self.assign_locked(&guard, user, group.name(), duration_millis).await
    }

    async fn assign_locked(&self, guard: &MutexGuard<'_, ()>, user: &User, group: &str, duration_millis: i64) -> GroupResult<()> {
        let node = GroupNode::new(group).with_duration(self.clock.now_millis(), duration_millis);
        let expires_at = node.expires_at();

        self.users.set_permission_locked(guard, user, node.to_node()).await?;

        self.pipeline.audit().log_group_assigned(user.name(), group, expires_at);
        info!(user = %user.name(), group = %group, expires_at = expires_at, "Group assigned");
        Ok(())
    }

    /// Remove one group assignment from a user; true if it was present
    pub async fn remove_group(&self, subject: &str, group: &str) -> GroupResult<bool> {
        let group = self.require(group)?;
        let user = self.require_user(subject).await?;

        let removed = self.users.remove_permission(&user, &GroupNode::key_for(group.name())).await?;
        if removed {
            self.pipeline.audit().log_group_removed(user.name(), group.name());
        }
        Ok(removed)
    }

    /// Set a node on a group, expiring at `expires_at` (epoch millis, `0` for never)
    pub async fn set_permission(&self, subject: &str, key: &str, value: bool, expires_at: i64) -> GroupResult<()> {
        let group = self.require(subject)?;
        self.set_group_permission(&group, Node::temporary(key, value, expires_at)).await
    }

    /// Set a node on a group, then invalidate every loaded user
    pub async fn set_group_permission(&self, group: &Group, node: Node) -> GroupResult<()> {
        let guard = group.write_lock().lock().await;
        self.set_group_permission_locked(&guard, group, node).await
    }

    async fn set_group_permission_locked(&self, guard: &MutexGuard<'_, ()>, group: &Group, node: Node) -> GroupResult<()> {
        let storage = self.storage.clone();
        let key = node.key().to_string();
        let value = node.value();

        self.pipeline
            .apply_locked(guard, "save_group", group, move |cache| cache.put(node), move |record| async move { storage.save_group(&record).await }, || self.users.invalidate_all())
            .await?;

        self.pipeline.audit().log_permission_set(group.name(), &key, value);
        Ok(())
    }

    /// Remove a node from a group; true if it existed
    pub async fn remove_permission(&self, subject: &str, key: &str) -> GroupResult<bool> {
        let group = self.require(subject)?;
        let storage = self.storage.clone();

        let removed = self
            .pipeline
            .apply("save_group", &*group, |cache| cache.remove(key), move |record| async move { storage.save_group(&record).await }, || {})
            .await?;

        if removed {
            self.pipeline.audit().log_permission_removed(group.name(), key);
        }
        Ok(removed)
    }

    async fn clear_matching_locked(&self, guard: &MutexGuard<'_, ()>, group: &Group, pattern: &Regex, invalidate_users: bool) -> GroupResult<Vec<Node>> {
        let storage = self.storage.clone();
        self.pipeline
            .apply_locked(
                guard,
                "save_group",
                group,
                |cache| {
                    let removed = cache.remove_matching(pattern);
                    cache.invalidate();
                    removed
                },
                move |record| async move { storage.save_group(&record).await },
                || {
                    if invalidate_users {
                        self.users.invalidate_all();
                    }
                },
            )
            .await
    }

    /// Delete a group everywhere
    ///
    /// The group leaves the registry immediately, its assignment key is swept
    /// from every persisted subject and from loaded users, then the group row
    /// is deleted. Deleting the default group recreates it afterwards.
    pub async fn delete_group(&self, name: &str) -> GroupResult<()> {
        let key = self.groups.normalize(name);
        let group = self.groups.remove(&key).ok_or_else(|| GroupError::GroupNotFound { name: name.to_string() })?;
        let node_key = GroupNode::key_for(&key);

        let result = async {
            self.pipeline.storage_call("remove_node_everywhere", self.storage.remove_node_everywhere(&node_key)).await?;
            let forgotten = self.users.forget_node(&node_key).await;
            self.users.invalidate_all();
            debug!(group = %key, loaded_users = forgotten, "Swept group assignments");

            self.pipeline.storage_call("delete_group", self.storage.delete_group(&key)).await
        }
        .await;

        if key == DEFAULT_GROUP_NAME {
            if let Err(err) = self.recreate_default().await {
                error!(error = %err, "Failed to recreate default group in storage, keeping in-memory replacement");
                self.groups.get_or_create(DEFAULT_GROUP_NAME);
            }
        } else if result.is_err() {
            self.groups.insert_shared(&key, group);
        }

        result?;
        self.pipeline.audit().log_group_deleted(&key);
        info!(group = %key, "Group deleted");
        Ok(())
    }

    /// Add a prefix alongside existing ones
    pub async fn add_prefix(&self, group: &str, text: &str, weight: i32) -> GroupResult<()> {
        let prefix = PrefixNode::new(weight, text)?;
        self.set_permission(group, &prefix.key(), true, 0).await
    }

    /// Replace every prefix of a group with one of weight 0
    pub async fn set_prefix(&self, group: &str, text: &str) -> GroupResult<()> {
        let prefix = PrefixNode::new(0, text)?;
        let group = self.require(group)?;

        let guard = group.write_lock().lock().await;
        self.clear_matching_locked(&guard, &group, &PREFIX_PATTERN, false).await?;
        self.set_group_permission_locked(&guard, &group, prefix.to_node()).await
    }

    /// Remove every prefix of a group; returns how many were removed
    pub async fn clear_prefix(&self, group: &str) -> GroupResult<usize> {
        let group = self.require(group)?;
        let guard = group.write_lock().lock().await;
        Ok(self.clear_matching_locked(&guard, &group, &PREFIX_PATTERN, false).await?.len())
    }

    /// Replace every weight of a group with a single one
    pub async fn set_weight(&self, group: &str, weight: i32) -> GroupResult<()> {
        let group = self.require(group)?;

        let guard = group.write_lock().lock().await;
        self.clear_matching_locked(&guard, &group, &WEIGHT_PATTERN, true).await?;
        self.set_group_permission_locked(&guard, &group, WeightNode::new(weight).to_node()).await
    }

    pub async fn clear_weight(&self, group: &str) -> GroupResult<usize> {
        let group = self.require(group)?;
        self.clear_weight_for(&group).await
    }

    pub async fn clear_weight_for(&self, group: &Group) -> GroupResult<usize> {
        let guard = group.write_lock().lock().await;
        Ok(self.clear_matching_locked(&guard, group, &WEIGHT_PATTERN, true).await?.len())
    }

    pub async fn add_weight(&self, group: &str, weight: i32) -> GroupResult<()> {
        let group = self.require(group)?;
        self.add_weight_for(&group, weight).await
    }

    pub async fn add_weight_for(&self, group: &Group, weight: i32) -> GroupResult<()> {
        self.set_group_permission(group, WeightNode::new(weight).to_node()).await
    }

    /// Live permissions of a user: its group's plain nodes overlaid by its own
    pub fn effective_permissions(&self, user: &User) -> BTreeMap<String, bool> {
        let now = self.clock.now_millis();
        let mut effective = BTreeMap::new();

        if let Some(group) = self.get_group(user) {
            for node in group.cache().read().active_nodes(now) {
                if matches!(node.kind(), NodeKind::Generic) {
                    effective.insert(node.key().to_string(), node.value());
                }
            }
        }

        for node in user.cache().read().active_nodes(now) {
            effective.insert(node.key().to_string(), node.value());
        }

        effective
    }

    /// Whether a user currently holds `key`; absent keys are denied
    pub fn has_permission(&self, user: &User, key: &str) -> bool {
        self.effective_permissions(user).get(key).copied().unwrap_or(false)
    }
}
