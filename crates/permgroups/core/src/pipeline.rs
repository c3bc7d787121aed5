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

//! Mutation pipeline shared by every write
//!
//! A write runs as: take the subject's writer lock, snapshot and mutate the
//! permission cache, persist the resulting record, then invalidate dependent
//! caches. Invalidation only happens after persistence has completed. When
//! persistence fails or times out the cache is restored from the snapshot
//! and the failure is returned to the caller.

use crate::audit::AuditLogger;
use crate::cache::PermissionCache;
use crate::storage::{StorageError, StorageResult};
use crate::subject::{Subject, SubjectRecord};
use metrics::counter;
use permgroups_common::{GroupError, GroupResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

/// Ordered mutate, persist, invalidate executor
#[derive(Debug, Clone)]
pub struct MutationPipeline {
    storage_timeout: Duration,
    audit: Arc<AuditLogger>,
}

impl MutationPipeline {
    pub fn new(storage_timeout: Duration, audit: Arc<AuditLogger>) -> Self {
        Self { storage_timeout, audit }
    }

    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Await a storage call under the configured timeout
    pub async fn storage_call<T, F>(&self, operation: &str, call: F) -> GroupResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match tokio::time::timeout(self.storage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(GroupError::storage(operation, err.to_string())),
            Err(_) => {
                let err = StorageError::Timeout { after: self.storage_timeout };
                warn!(operation = %operation, timeout_ms = %self.storage_timeout.as_millis(), "Storage call timed out");
                Err(GroupError::storage(operation, err.to_string()))
            }
        }
    }

    /// Run one write under the subject's writer lock
    pub async fn apply<S, R, M, P, Fut, I>(&self, operation: &str, subject: &S, mutate: M, persist: P, invalidate: I) -> GroupResult<R>
    where
        S: Subject + ?Sized,
        M: FnOnce(&mut PermissionCache) -> R,
        P: FnOnce(SubjectRecord) -> Fut,
        Fut: Future<Output = StorageResult<()>>,
        I: FnOnce(),
    {
        let guard = subject.write_lock().lock().await;
        self.apply_locked(&guard, operation, subject, mutate, persist, invalidate).await
    }

    /// Run one write while the caller already holds the subject's writer lock
    ///
    /// Composite operations (clear then add) take the lock once and chain
    /// several steps through here so no other writer can interleave.
    pub async fn apply_locked<S, R, M, P, Fut, I>(&self, _guard: &MutexGuard<'_, ()>, operation: &str, subject: &S, mutate: M, persist: P, invalidate: I) -> GroupResult<R>
    where
        S: Subject + ?Sized,
        M: FnOnce(&mut PermissionCache) -> R,
        P: FnOnce(SubjectRecord) -> Fut,
        Fut: Future<Output = StorageResult<()>>,
        I: FnOnce(),
    {
        let (snapshot, outcome, record) = {
            let mut cache = subject.cache().write();
            let snapshot = cache.snapshot();
            let outcome = mutate(&mut *cache);
            let record = SubjectRecord::with_nodes(subject.name(), cache.nodes().cloned().collect());
            (snapshot, outcome, record)
        };

        match self.storage_call(operation, persist(record)).await {
            Ok(()) => {
                invalidate();
                debug!(operation = %operation, subject = %subject.name(), "Mutation persisted");
                Ok(outcome)
            }
            Err(err) => {
                subject.cache().write().restore(snapshot);
                counter!("permgroups_persistence_rollbacks_total", 1);
                warn!(operation = %operation, subject = %subject.name(), error = %err, "Persistence failed, mutation rolled back");
                self.audit.log_persistence_failed(subject.name(), operation, &err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{Group, User};
    use permgroups_common::{ErrorKind, Node};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pipeline(timeout: Duration) -> MutationPipeline {
        MutationPipeline::new(timeout, Arc::new(AuditLogger::new()))
    }

    #[tokio::test]
    async fn test_persists_then_invalidates() {
        let pipeline = pipeline(Duration::from_secs(1));
        let user = User::new("steve");
        let persisted = Arc::new(AtomicBool::new(false));
        let invalidated_after_persist = AtomicBool::new(false);

        let seen = persisted.clone();
        pipeline
            .apply(
                "set_permission",
                &user,
                |cache| cache.put(Node::new("fly")),
                move |record| async move {
                    assert_eq!(record.nodes, vec![Node::new("fly")]);
                    seen.store(true, Ordering::SeqCst);
                    Ok(())
                },
                || invalidated_after_persist.store(persisted.load(Ordering::SeqCst), Ordering::SeqCst),
            )
            .await
            .unwrap();

        assert!(invalidated_after_persist.load(Ordering::SeqCst));
        assert!(user.cache().read().contains("fly"));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_skips_invalidation() {
        let pipeline = pipeline(Duration::from_secs(1));
        let group = Group::new("vip");
        group.cache().write().put(Node::new("weight.5"));
        let invalidated = AtomicBool::new(false);

        let err = pipeline
            .apply(
                "save_group",
                &group,
                |cache| cache.put(Node::new("weight.9")),
                |_| async { Err(StorageError::Backend { message: "disk full".to_string() }) },
                || invalidated.store(true, Ordering::SeqCst),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(!invalidated.load(Ordering::SeqCst));
        assert_eq!(group.weight(), 5);
        assert!(!group.cache().read().contains("weight.9"));
        assert_eq!(pipeline.audit().get_events(None).len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_storage_failure() {
        let pipeline = pipeline(Duration::from_millis(20));
        let user = User::new("steve");

        let err = pipeline
            .apply(
                "save_user",
                &user,
                |cache| cache.put(Node::new("fly")),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                || {},
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(user.cache().read().is_empty());
    }
}
