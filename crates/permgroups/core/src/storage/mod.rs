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

//! Persistence contract consumed by the engine
//!
//! The engine never sees storage layout; it exchanges [`SubjectRecord`]s with
//! an implementation of [`Storage`]. Two backends ship with the crate:
//! [`MemoryStorage`] and [`JsonFileStorage`].

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use crate::subject::SubjectRecord;
use async_trait::async_trait;
use permgroups_common::GroupError;
use std::time::Duration;
use thiserror::Error;

/// Storage layer failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Backend error: {message}")]
    Backend { message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for GroupError {
    fn from(err: StorageError) -> Self {
        GroupError::storage("storage", err.to_string())
    }
}

/// Asynchronous persistence for users and groups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the named group, creating an empty persisted row if absent
    async fn create_and_load_group(&self, name: &str) -> StorageResult<SubjectRecord>;

    /// Every persisted group
    async fn load_all_groups(&self) -> StorageResult<Vec<SubjectRecord>>;

    async fn save_group(&self, record: &SubjectRecord) -> StorageResult<()>;

    async fn delete_group(&self, name: &str) -> StorageResult<()>;

    async fn load_user(&self, name: &str) -> StorageResult<Option<SubjectRecord>>;

    async fn save_user(&self, record: &SubjectRecord) -> StorageResult<()>;

    /// Remove any node with exactly this key from every persisted user and group
    async fn remove_node_everywhere(&self, key: &str) -> StorageResult<()>;
}
