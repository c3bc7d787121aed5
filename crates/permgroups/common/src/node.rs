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

//! Permission nodes and their specialized key encodings
//!
//! A [`Node`] is a single boolean assertion on a dotted permission key with an
//! optional expiration (epoch milliseconds, `0` meaning permanent). Three key
//! shapes carry extra data and are decoded once through [`Node::kind`]:
//!
//! - `group.<name>` assigns a group ([`GroupNode`])
//! - `prefix.<weight>.<text>` sets a display prefix ([`PrefixNode`])
//! - `weight.<integer>` ranks a group ([`WeightNode`])

use crate::error::{GroupError, GroupResult};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Name of the fallback group every subject resolves to
pub const DEFAULT_GROUP_NAME: &str = "default";

/// Shortest accepted prefix text
pub const PREFIX_MIN_LEN: usize = 1;

/// Longest accepted prefix text
pub const PREFIX_MAX_LEN: usize = 16;

/// Literal start of every group assignment key
pub const GROUP_KEY_PREFIX: &str = "group.";

/// Matches group assignment keys
pub static GROUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^group\.(.+)$").expect("group pattern is valid"));

/// Matches prefix keys
pub static PREFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^prefix\.(-?\d+)\.(.+)$").expect("prefix pattern is valid"));

/// Matches weight keys
pub static WEIGHT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^weight\.(-?\d+)$").expect("weight pattern is valid"));

/// Current wall clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single permission assertion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    key: String,
    value: bool,
    #[serde(default)]
    expires_at: i64,
}

impl Node {
    /// Create a permanent node granting `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_value(key, true)
    }

    /// Create a permanent node with an explicit value
    pub fn with_value(key: impl Into<String>, value: bool) -> Self {
        Self::temporary(key, value, 0)
    }

    /// Create a node expiring at `expires_at` (epoch millis, `0` for never)
    pub fn temporary(key: impl Into<String>, value: bool, expires_at: i64) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at,
        }
    }

    /// Expire `duration_millis` after `now`; non-positive durations keep the node permanent
    pub fn with_duration(mut self, now: i64, duration_millis: i64) -> Self {
        if duration_millis > 0 {
            self.expires_at = now.saturating_add(duration_millis);
        }
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn set_value(&mut self, value: bool) {
        self.value = value;
    }

    pub fn set_expires_at(&mut self, expires_at: i64) {
        self.expires_at = expires_at;
    }

    /// Whether the node never expires
    pub fn is_permanent(&self) -> bool {
        self.expires_at == 0
    }

    /// Check expiration against the given instant
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at < now
    }

    /// Check expiration against the wall clock
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Milliseconds left before expiry; `0` for permanent nodes, negative once expired
    pub fn time_remaining_at(&self, now: i64) -> i64 {
        if self.expires_at == 0 { 0 } else { self.expires_at - now }
    }

    pub fn time_remaining(&self) -> i64 {
        self.time_remaining_at(now_millis())
    }

    /// Decode the key into its typed variant
    pub fn kind(&self) -> NodeKind {
        if let Some(group) = GroupNode::from_node(self) {
            return NodeKind::GroupAssignment(group);
        }
        if let Some(prefix) = PrefixNode::from_key(&self.key) {
            return NodeKind::Prefix(prefix);
        }
        if let Some(weight) = WeightNode::from_key(&self.key) {
            return NodeKind::Weight(weight);
        }
        NodeKind::Generic
    }
}

/// Typed view of a node key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    GroupAssignment(GroupNode),
    Prefix(PrefixNode),
    Weight(WeightNode),
    Generic,
}

/// Group membership encoded as `group.<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupNode {
    name: String,
    expires_at: i64,
}

impl GroupNode {
    /// Create a permanent assignment; the name is lower-cased
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            expires_at: 0,
        }
    }

    /// The always-present fallback assignment
    pub fn default_group() -> Self {
        Self::new(DEFAULT_GROUP_NAME)
    }

    /// Decode from a node; `None` when the key is not a group assignment
    pub fn from_node(node: &Node) -> Option<Self> {
        let captures = GROUP_PATTERN.captures(node.key())?;
        Some(Self {
            name: captures[1].to_lowercase(),
            expires_at: node.expires_at(),
        })
    }

    /// Expire `duration_millis` after `now`; non-positive durations keep it permanent
    pub fn with_duration(mut self, now: i64, duration_millis: i64) -> Self {
        if duration_millis > 0 {
            self.expires_at = now.saturating_add(duration_millis);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.name)
    }

    /// Assignment key for a group name
    pub fn key_for(name: &str) -> String {
        format!("{}{}", GROUP_KEY_PREFIX, name.to_lowercase())
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_GROUP_NAME
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at < now
    }

    /// Case-insensitive group name comparison, folded the same way names are stored
    pub fn refers_to(&self, group: &str) -> bool {
        self.name == group.to_lowercase()
    }

    pub fn to_node(&self) -> Node {
        Node::temporary(self.key(), true, self.expires_at)
    }
}

/// Display prefix encoded as `prefix.<weight>.<text>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixNode {
    weight: i32,
    text: String,
}

impl PrefixNode {
    /// Create a prefix after validating its length
    pub fn new(weight: i32, text: &str) -> GroupResult<Self> {
        Self::validate_text(text)?;
        Ok(Self {
            weight,
            text: text.to_string(),
        })
    }

    /// Reject text outside `PREFIX_MIN_LEN..=PREFIX_MAX_LEN` characters
    pub fn validate_text(text: &str) -> GroupResult<()> {
        let length = text.chars().count();
        if !(PREFIX_MIN_LEN..=PREFIX_MAX_LEN).contains(&length) {
            return Err(GroupError::InvalidPrefix {
                prefix: text.to_string(),
                min: PREFIX_MIN_LEN,
                max: PREFIX_MAX_LEN,
            });
        }
        Ok(())
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let captures = PREFIX_PATTERN.captures(key)?;
        let weight = captures[1].parse().ok()?;
        Some(Self {
            weight,
            text: captures[2].to_string(),
        })
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> String {
        format!("prefix.{}.{}", self.weight, self.text)
    }

    pub fn to_node(&self) -> Node {
        Node::new(self.key())
    }
}

/// Group ranking encoded as `weight.<integer>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightNode {
    weight: i32,
}

impl WeightNode {
    pub fn new(weight: i32) -> Self {
        Self { weight }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let captures = WEIGHT_PATTERN.captures(key)?;
        Some(Self { weight: captures[1].parse().ok()? })
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn key(&self) -> String {
        format!("weight.{}", self.weight)
    }

    pub fn to_node(&self) -> Node {
        Node::new(self.key())
    }
}
