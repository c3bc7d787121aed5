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

//! Process-wide keyed entity registry

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

type Factory<E> = Box<dyn Fn(&str) -> E + Send + Sync>;

/// Concurrent map from normalized key to loaded entity
///
/// Reads are lock-free across shards; `get_or_create` goes through the
/// entry API so concurrent callers for the same key share one instance.
pub struct Registry<E> {
    entries: DashMap<String, Arc<E>>,
    normalize: fn(&str) -> String,
    factory: Factory<E>,
}

/// Lower-case normalization used for group and user names
pub fn lowercase(key: &str) -> String {
    key.to_lowercase()
}

impl<E> Registry<E> {
    /// Create a registry with a key normalizer and an entity factory
    pub fn new(normalize: fn(&str) -> String, factory: impl Fn(&str) -> E + Send + Sync + 'static) -> Self {
        Self {
            entries: DashMap::new(),
            normalize,
            factory: Box::new(factory),
        }
    }

    /// Registry whose keys are lower-cased
    pub fn lowercase(factory: impl Fn(&str) -> E + Send + Sync + 'static) -> Self {
        Self::new(lowercase, factory)
    }

    pub fn normalize(&self, key: &str) -> String {
        (self.normalize)(key)
    }

    /// Return the cached entity, constructing it in memory if absent
    pub fn get_or_create(&self, key: &str) -> Arc<E> {
        let key = self.normalize(key);
        let entry = self.entries.entry(key.clone()).or_insert_with(|| Arc::new((self.factory)(&key)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &str) -> Option<Arc<E>> {
        self.entries.get(&self.normalize(key)).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&self.normalize(key))
    }

    /// Store an entity unless one is already present; returns the stored instance
    pub fn insert(&self, key: &str, entity: E) -> Arc<E> {
        let entry = self.entries.entry(self.normalize(key)).or_insert_with(|| Arc::new(entity));
        Arc::clone(entry.value())
    }

    /// Store an already shared entity unless one is present; returns the stored instance
    pub fn insert_shared(&self, key: &str, entity: Arc<E>) -> Arc<E> {
        let entry = self.entries.entry(self.normalize(key)).or_insert(entity);
        Arc::clone(entry.value())
    }

    /// Store an entity, replacing any existing one
    pub fn replace(&self, key: &str, entity: E) -> Arc<E> {
        let entity = Arc::new(entity);
        self.entries.insert(self.normalize(key), Arc::clone(&entity));
        entity
    }

    /// Evict from memory only
    pub fn remove(&self, key: &str) -> Option<Arc<E>> {
        self.entries.remove(&self.normalize(key)).map(|(_, entity)| entity)
    }

    /// All entities, in no particular order
    pub fn get_all(&self) -> Vec<Arc<E>> {
        self.entries.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Entity {
        name: String,
    }

    fn registry() -> Registry<Entity> {
        Registry::lowercase(|key| Entity { name: key.to_string() })
    }

    #[test]
    fn test_get_or_create_normalizes() {
        let registry = registry();
        let first = registry.get_or_create("VIP");
        let second = registry.get_or_create("vip");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name, "vip");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = registry();
        assert!(registry.get("vip").is_none());
        assert!(!registry.contains("vip"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_evicts() {
        let registry = registry();
        registry.get_or_create("vip");
        assert!(registry.remove("Vip").is_some());
        assert!(!registry.contains("vip"));
        assert!(registry.remove("vip").is_none());
    }

    #[test]
    fn test_insert_keeps_existing() {
        let registry = registry();
        let existing = registry.get_or_create("vip");
        let stored = registry.insert("vip", Entity { name: "other".to_string() });

        assert!(Arc::ptr_eq(&existing, &stored));
        assert_eq!(stored.name, "vip");
    }

    #[test]
    fn test_replace_swaps_instance() {
        let registry = registry();
        let original = registry.get_or_create("vip");
        let replaced = registry.replace("VIP", Entity { name: "loaded".to_string() });

        assert!(!Arc::ptr_eq(&original, &replaced));
        assert_eq!(registry.get("vip").unwrap().name, "loaded");
    }

    #[test]
    fn test_concurrent_get_or_create_builds_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let registry = Arc::new(Registry::lowercase(move |key: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Entity { name: key.to_string() }
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("shared"))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get_all().len(), 1);
    }
}
