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

//! Users and groups: the subjects that own a permission cache

use crate::cache::PermissionCache;
use parking_lot::RwLock;
use permgroups_common::{GroupNode, Node, NodeKind};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Persisted form of a user or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl SubjectRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self { name: name.into(), nodes }
    }

    /// Drop every node with the given key; true if anything changed
    pub fn remove_key(&mut self, key: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|node| node.key() != key);
        self.nodes.len() != before
    }
}

/// Common surface of anything that owns a permission cache
pub trait Subject: Send + Sync {
    fn name(&self) -> &str;

    fn cache(&self) -> &RwLock<PermissionCache>;

    /// Serializes writers of this subject across await points
    fn write_lock(&self) -> &Mutex<()>;

    fn to_record(&self) -> SubjectRecord {
        SubjectRecord::with_nodes(self.name(), self.cache().read().nodes().cloned().collect())
    }

    /// Drop memoized derived state
    fn invalidate(&self) {
        self.cache().write().invalidate();
    }
}

#[derive(Debug, Clone)]
struct GroupDisplay {
    revision: u64,
    weight: i32,
    prefix: String,
}

/// A named group: its nodes plus the weight and prefix derived from them
#[derive(Debug)]
pub struct Group {
    name: String,
    cache: RwLock<PermissionCache>,
    write_lock: Mutex<()>,
    display: RwLock<Option<GroupDisplay>>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self::from_record(SubjectRecord::new(name))
    }

    pub fn from_record(record: SubjectRecord) -> Self {
        Self {
            name: record.name.to_lowercase(),
            cache: RwLock::new(PermissionCache::from_nodes(record.nodes)),
            write_lock: Mutex::new(()),
            display: RwLock::new(None),
        }
    }

    /// Highest weight node value, or -1 without one
    pub fn weight(&self) -> i32 {
        self.display().weight
    }

    /// Text of the highest weight prefix node, or empty
    pub fn prefix(&self) -> String {
        self.display().prefix
    }

    fn display(&self) -> GroupDisplay {
        let cache = self.cache.read();
        if let Some(display) = self.display.read().as_ref() {
            if display.revision == cache.revision() {
                return display.clone();
            }
        }

        let mut weight: Option<i32> = None;
        let mut prefix: Option<(i32, String)> = None;
        for node in cache.nodes() {
            match node.kind() {
                NodeKind::Weight(w) => weight = Some(weight.map_or(w.weight(), |current| current.max(w.weight()))),
                NodeKind::Prefix(p) => {
                    if prefix.as_ref().is_none_or(|(current, _)| p.weight() > *current) {
                        prefix = Some((p.weight(), p.text().to_string()));
                    }
                }
                _ => {}
            }
        }

        let display = GroupDisplay {
            revision: cache.revision(),
            weight: weight.unwrap_or(-1),
            prefix: prefix.map(|(_, text)| text).unwrap_or_default(),
        };
        *self.display.write() = Some(display.clone());
        display
    }
}

impl Subject for Group {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache(&self) -> &RwLock<PermissionCache> {
        &self.cache
    }

    fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }
}

#[derive(Debug, Clone)]
struct StoredGroup {
    node: GroupNode,
    revision: u64,
    generation: u64,
}

/// A user and the memoized result of its best-group resolution
#[derive(Debug)]
pub struct User {
    name: String,
    cache: RwLock<PermissionCache>,
    write_lock: Mutex<()>,
    stored_group: RwLock<Option<StoredGroup>>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self::from_record(SubjectRecord::new(name))
    }

    pub fn from_record(record: SubjectRecord) -> Self {
        Self {
            name: record.name.to_lowercase(),
            cache: RwLock::new(PermissionCache::from_nodes(record.nodes)),
            write_lock: Mutex::new(()),
            stored_group: RwLock::new(None),
        }
    }

    /// Memoized group, if still stamped with the current cache revision and generation
    pub fn stored_group(&self, generation: u64) -> Option<GroupNode> {
        let revision = self.cache.read().revision();
        self.stored_group
            .read()
            .as_ref()
            .filter(|stored| stored.revision == revision && stored.generation == generation)
            .map(|stored| stored.node.clone())
    }

    /// Memoize a resolution computed from the cache at `revision`
    pub fn set_stored_group(&self, node: GroupNode, revision: u64, generation: u64) {
        *self.stored_group.write() = Some(StoredGroup { node, revision, generation });
    }

    pub fn clear_stored_group(&self) {
        *self.stored_group.write() = None;
    }
}

impl Subject for User {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache(&self) -> &RwLock<PermissionCache> {
        &self.cache
    }

    fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }
}
