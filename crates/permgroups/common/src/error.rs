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

//! Error taxonomy for group and permission operations

use thiserror::Error;

/// Coarse error category, stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced group or subject does not exist
    NotFound,
    /// Group with the same normalized name is already registered
    AlreadyExists,
    /// Subject already holds the requested group
    AlreadyHasGroup,
    /// Prefix text outside the accepted length bounds
    InvalidPrefix,
    /// Persistence layer failed or timed out
    StorageFailure,
}

/// Errors produced by the resolution engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("Group not found: {name}")]
    GroupNotFound { name: String },

    #[error("User not found: {name}")]
    UserNotFound { name: String },

    #[error("Group already exists: {name}")]
    AlreadyExists { name: String },

    #[error("User '{user}' already has group '{group}'")]
    AlreadyHasGroup { user: String, group: String },

    #[error("Invalid prefix '{prefix}': length must be between {min} and {max} characters")]
    InvalidPrefix { prefix: String, min: usize, max: usize },

    #[error("Storage failure during {operation}: {message}")]
    StorageFailure { operation: String, message: String },
}

/// Result type for engine operations
pub type GroupResult<T> = Result<T, GroupError>;

impl GroupError {
    /// Get the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            GroupError::GroupNotFound { .. } | GroupError::UserNotFound { .. } => ErrorKind::NotFound,
            GroupError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            GroupError::AlreadyHasGroup { .. } => ErrorKind::AlreadyHasGroup,
            GroupError::InvalidPrefix { .. } => ErrorKind::InvalidPrefix,
            GroupError::StorageFailure { .. } => ErrorKind::StorageFailure,
        }
    }

    /// Localization key for presentation layers
    pub fn message_key(&self) -> &'static str {
        match self {
            GroupError::GroupNotFound { .. } => "group.does-not-exist",
            GroupError::UserNotFound { .. } => "user.not-exists",
            GroupError::AlreadyExists { .. } => "group.exist",
            GroupError::AlreadyHasGroup { .. } => "user.group.already-has",
            GroupError::InvalidPrefix { .. } => "group.prefix.invalid",
            GroupError::StorageFailure { .. } => "storage.failure",
        }
    }

    /// Whether the operation was rejected before touching storage
    pub fn is_validation(&self) -> bool {
        self.kind() != ErrorKind::StorageFailure
    }

    /// Create a storage failure for the given operation
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        GroupError::StorageFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
