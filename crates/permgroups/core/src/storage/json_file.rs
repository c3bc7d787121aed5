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

//! JSON file storage backend
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/groups/<name>.json
//! <root>/users/<name>.json
//! ```
//!
//! Each file holds one serialized [`SubjectRecord`]. Writes go to a temporary
//! sibling first and are renamed into place.

use super::{Storage, StorageError, StorageResult};
use crate::subject::SubjectRecord;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const GROUPS_DIR: &str = "groups";
const USERS_DIR: &str = "users";

/// File-per-subject JSON backend
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Open (and create if needed) a storage root
    pub async fn open<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(GROUPS_DIR)).await?;
        fs::create_dir_all(root.join(USERS_DIR)).await?;
        debug!(root = %root.display(), "Opened JSON file storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, dir: &str, name: &str) -> StorageResult<PathBuf> {
        let name = name.to_lowercase();
        let valid = !name.is_empty() && !name.starts_with('.') && name.chars().all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::Backend {
                message: format!("Invalid subject name for file storage: '{}'", name),
            });
        }
        Ok(self.root.join(dir).join(format!("{}.json", name)))
    }

    async fn read_record(path: &Path) -> StorageResult<Option<SubjectRecord>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(path: &Path, record: &SubjectRecord) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn record_files(&self, dir: &str) -> StorageResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(self.root.join(dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn create_and_load_group(&self, name: &str) -> StorageResult<SubjectRecord> {
        let path = self.record_path(GROUPS_DIR, name)?;
        if let Some(record) = Self::read_record(&path).await? {
            return Ok(record);
        }

        let record = SubjectRecord::new(name.to_lowercase());
        Self::write_record(&path, &record).await?;
        debug!(group = %record.name, "Created group file");
        Ok(record)
    }

    async fn load_all_groups(&self) -> StorageResult<Vec<SubjectRecord>> {
        let mut records = Vec::new();
        for path in self.record_files(GROUPS_DIR).await? {
            match Self::read_record(&path).await? {
                Some(record) => records.push(record),
                None => warn!(path = %path.display(), "Group file vanished during load"),
            }
        }
        Ok(records)
    }

    async fn save_group(&self, record: &SubjectRecord) -> StorageResult<()> {
        let path = self.record_path(GROUPS_DIR, &record.name)?;
        Self::write_record(&path, record).await
    }

    async fn delete_group(&self, name: &str) -> StorageResult<()> {
        let path = self.record_path(GROUPS_DIR, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_user(&self, name: &str) -> StorageResult<Option<SubjectRecord>> {
        let path = self.record_path(USERS_DIR, name)?;
        Self::read_record(&path).await
    }

    async fn save_user(&self, record: &SubjectRecord) -> StorageResult<()> {
        let path = self.record_path(USERS_DIR, &record.name)?;
        Self::write_record(&path, record).await
    }

    async fn remove_node_everywhere(&self, key: &str) -> StorageResult<()> {
        let mut touched = 0usize;
        for dir in [USERS_DIR, GROUPS_DIR] {
            for path in self.record_files(dir).await? {
                let Some(mut record) = Self::read_record(&path).await? else {
                    continue;
                };
                if record.remove_key(key) {
                    Self::write_record(&path, &record).await?;
                    touched += 1;
                }
            }
        }
        debug!(key = %key, rows = touched, "Swept node from stored subjects");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permgroups_common::Node;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_user_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();

        let record = SubjectRecord::with_nodes("steve", vec![Node::new("fly"), Node::temporary("group.vip", true, 1_700_000_000_000)]);
        storage.save_user(&record).await.unwrap();

        assert_eq!(storage.load_user("Steve").await.unwrap(), Some(record));
        assert_eq!(storage.load_user("alex").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();

        let created = storage.create_and_load_group("VIP").await.unwrap();
        assert_eq!(created.name, "vip");

        storage.save_group(&SubjectRecord::with_nodes("vip", vec![Node::new("weight.10")])).await.unwrap();
        let reloaded = storage.create_and_load_group("vip").await.unwrap();
        assert_eq!(reloaded.nodes, vec![Node::new("weight.10")]);

        storage.delete_group("vip").await.unwrap();
        assert!(storage.load_all_groups().await.unwrap().is_empty());
        storage.delete_group("vip").await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_rewrites_files() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();

        storage.save_user(&SubjectRecord::with_nodes("steve", vec![Node::new("group.vip"), Node::new("fly")])).await.unwrap();
        storage.save_user(&SubjectRecord::with_nodes("alex", vec![Node::new("fly")])).await.unwrap();

        storage.remove_node_everywhere("group.vip").await.unwrap();

        let steve = storage.load_user("steve").await.unwrap().unwrap();
        assert_eq!(steve.nodes, vec![Node::new("fly")]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::open(dir.path()).await.unwrap();

        assert!(matches!(storage.load_user("../etc/passwd").await, Err(StorageError::Backend { .. })));
        assert!(storage.create_and_load_group("").await.is_err());
    }
}
