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

//! Per-subject permission node cache

use permgroups_common::Node;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::trace;

/// Node set owned by a single user or group
///
/// Keys are unique (last write wins) and iterate in lexicographic order, so
/// every query below returns nodes in a stable order. Each mutation bumps
/// [`revision`](Self::revision); values derived from the node set are stamped
/// with the revision they were computed at and treated as stale once it moves.
#[derive(Debug, Clone, Default)]
pub struct PermissionCache {
    nodes: BTreeMap<String, Node>,
    revision: u64,
}

/// Copy of a cache's nodes, used to undo a mutation whose persistence failed
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    nodes: BTreeMap<String, Node>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from persisted nodes
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut cache = Self::new();
        for node in nodes {
            cache.nodes.insert(node.key().to_string(), node);
        }
        cache
    }

    /// Exact lookup
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// All nodes whose key matches the pattern
    pub fn get_matching(&self, pattern: &Regex) -> Vec<Node> {
        self.nodes.values().filter(|node| pattern.is_match(node.key())).cloned().collect()
    }

    /// All nodes whose key starts with the literal prefix
    pub fn get_starting_with(&self, prefix: &str) -> Vec<Node> {
        self.nodes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// Insert or overwrite by key, returning the previous node
    pub fn put(&mut self, node: Node) -> Option<Node> {
        self.revision += 1;
        trace!(key = %node.key(), revision = self.revision, "Node stored");
        self.nodes.insert(node.key().to_string(), node)
    }

    /// Remove a node; true if it existed
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.nodes.remove(key).is_some();
        if removed {
            self.revision += 1;
            trace!(key = %key, revision = self.revision, "Node removed");
        }
        removed
    }

    /// Remove every node matching the pattern, returning what was removed
    pub fn remove_matching(&mut self, pattern: &Regex) -> Vec<Node> {
        let matching = self.get_matching(pattern);
        for node in &matching {
            self.remove(node.key());
        }
        matching
    }

    /// Drop derived state computed from this cache; raw nodes are kept
    pub fn invalidate(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes that have not expired at `now`
    pub fn active_nodes(&self, now: i64) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |node| !node.is_expired_at(now))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot { nodes: self.nodes.clone() }
    }

    /// Replace the node set with a snapshot; counts as a mutation
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.nodes = snapshot.nodes;
        self.revision += 1;
    }
}
