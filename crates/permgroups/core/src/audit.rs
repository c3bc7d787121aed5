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

//! Audit logging for group and permission mutations

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    GroupCreated,
    GroupDeleted,
    /// Group assigned to a user
    GroupAssigned,
    /// Group assignment removed from a user
    GroupRemoved,
    PermissionSet,
    PermissionRemoved,
    /// Storage rejected a mutation and the in-memory change was rolled back
    PersistenceFailed,
}

/// Audit event result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditResult {
    Success,
    Failure,
}

/// Audit event entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,

    pub event_type: AuditEventType,

    pub timestamp: DateTime<Utc>,

    /// User or group the event applies to
    pub subject: String,

    pub result: AuditResult,

    /// Additional event details
    pub details: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, subject: impl Into<String>, result: AuditResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            subject: subject.into(),
            result,
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Bounded in-memory audit trail, mirrored to tracing
#[derive(Debug)]
pub struct AuditLogger {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_max_events(10_000)
    }

    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events,
        }
    }

    pub fn log_event(&self, event: AuditEvent) {
        match event.result {
            AuditResult::Success => {
                info!(
                    event_type = ?event.event_type,
                    subject = %event.subject,
                    details = ?event.details,
                    "Audit event: {:?}", event.event_type
                );
            }
            AuditResult::Failure => {
                warn!(
                    event_type = ?event.event_type,
                    subject = %event.subject,
                    details = ?event.details,
                    "Audit event: {:?} failed", event.event_type
                );
            }
        }

        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_group_created(&self, group: &str) {
        self.log_event(AuditEvent::new(AuditEventType::GroupCreated, group, AuditResult::Success));
    }

    pub fn log_group_deleted(&self, group: &str) {
        self.log_event(AuditEvent::new(AuditEventType::GroupDeleted, group, AuditResult::Success));
    }

    pub fn log_group_assigned(&self, user: &str, group: &str, expires_at: i64) {
        let event = AuditEvent::new(AuditEventType::GroupAssigned, user, AuditResult::Success)
            .with_detail("group", group)
            .with_detail("expires_at", expires_at.to_string());
        self.log_event(event);
    }

    pub fn log_group_removed(&self, user: &str, group: &str) {
        self.log_event(AuditEvent::new(AuditEventType::GroupRemoved, user, AuditResult::Success).with_detail("group", group));
    }

    pub fn log_permission_set(&self, subject: &str, key: &str, value: bool) {
        let event = AuditEvent::new(AuditEventType::PermissionSet, subject, AuditResult::Success)
            .with_detail("key", key)
            .with_detail("value", value.to_string());
        self.log_event(event);
    }

    pub fn log_permission_removed(&self, subject: &str, key: &str) {
        self.log_event(AuditEvent::new(AuditEventType::PermissionRemoved, subject, AuditResult::Success).with_detail("key", key));
    }

    pub fn log_persistence_failed(&self, subject: &str, operation: &str, reason: &str) {
        let event = AuditEvent::new(AuditEventType::PersistenceFailed, subject, AuditResult::Failure)
            .with_detail("operation", operation)
            .with_detail("reason", reason);
        self.log_event(event);
    }

    /// Most recent events first
    pub fn get_events(&self, limit: Option<usize>) -> Vec<AuditEvent> {
        let events = self.events.read();
        events.iter().rev().take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }

    pub fn get_subject_events(&self, subject: &str, limit: Option<usize>) -> Vec<AuditEvent> {
        let events = self.events.read();
        events.iter().rev().filter(|event| event.subject == subject).take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }

    pub fn get_events_by_type(&self, event_type: AuditEventType, limit: Option<usize>) -> Vec<AuditEvent> {
        let events = self.events.read();
        events.iter().rev().filter(|event| event.event_type == event_type).take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.write().clear();
        info!("Audit log cleared");
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
