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

//! Permission group resolution engine
//!
//! Users and groups carry flat sets of permission nodes. A user's group is
//! derived from its `group.<name>` nodes: the heaviest live assignment wins,
//! with the `default` group as fallback. Every write goes through the
//! [`pipeline::MutationPipeline`], which persists before it invalidates and
//! rolls the in-memory state back when storage fails.

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod groups;
pub mod pipeline;
pub mod registry;
pub mod storage;
pub mod subject;
pub mod system;
pub mod telemetry;
pub mod users;

pub use audit::{AuditEvent, AuditEventType, AuditLogger, AuditResult};
pub use cache::PermissionCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use groups::{GroupManager, select_best_group};
pub use permgroups_common::*;
pub use pipeline::MutationPipeline;
pub use registry::Registry;
pub use storage::{JsonFileStorage, MemoryStorage, Storage, StorageError, StorageResult};
pub use subject::{Group, Subject, SubjectRecord, User};
pub use system::PermissionSystem;
pub use telemetry::init_tracing;
pub use users::UserManager;
