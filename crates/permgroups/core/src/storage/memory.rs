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

//! In-memory storage backend

use super::{Storage, StorageResult};
use crate::subject::SubjectRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Volatile backend keeping records in concurrent maps
#[derive(Debug, Default)]
pub struct MemoryStorage {
    groups: DashMap<String, SubjectRecord>,
    users: DashMap<String, SubjectRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user row directly, bypassing the engine
    pub fn insert_user(&self, record: SubjectRecord) {
        self.users.insert(record.name.to_lowercase(), record);
    }

    /// Seed a group row directly, bypassing the engine
    pub fn insert_group(&self, record: SubjectRecord) {
        self.groups.insert(record.name.to_lowercase(), record);
    }

    pub fn user(&self, name: &str) -> Option<SubjectRecord> {
        self.users.get(&name.to_lowercase()).map(|entry| entry.value().clone())
    }

    pub fn group(&self, name: &str) -> Option<SubjectRecord> {
        self.groups.get(&name.to_lowercase()).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_and_load_group(&self, name: &str) -> StorageResult<SubjectRecord> {
        let key = name.to_lowercase();
        let record = self.groups.entry(key.clone()).or_insert_with(|| SubjectRecord::new(key)).value().clone();
        Ok(record)
    }

    async fn load_all_groups(&self) -> StorageResult<Vec<SubjectRecord>> {
        Ok(self.groups.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn save_group(&self, record: &SubjectRecord) -> StorageResult<()> {
        self.groups.insert(record.name.to_lowercase(), record.clone());
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> StorageResult<()> {
        self.groups.remove(&name.to_lowercase());
        Ok(())
    }

    async fn load_user(&self, name: &str) -> StorageResult<Option<SubjectRecord>> {
        Ok(self.user(name))
    }

    async fn save_user(&self, record: &SubjectRecord) -> StorageResult<()> {
        self.users.insert(record.name.to_lowercase(), record.clone());
        Ok(())
    }

    async fn remove_node_everywhere(&self, key: &str) -> StorageResult<()> {
        let mut touched = 0usize;
        for mut entry in self.users.iter_mut().chain(self.groups.iter_mut()) {
            if entry.value_mut().remove_key(key) {
                touched += 1;
            }
        }
        debug!(key = %key, rows = touched, "Swept node from stored subjects");
        Ok(())
    }
}
