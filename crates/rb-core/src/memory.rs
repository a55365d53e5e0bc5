//! # In-memory store
//!
//! Default backend, also the fallback when no networked store is reachable.
//! `DashMap` entry guards lock a shard for the duration of a read-modify-write,
//! which is what makes `increment` and `set_ordered` atomic per key.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::traits::{KeyValueStore, OrderedStore};

#[derive(Debug, Clone)]
struct Member {
    value: String,
    score: i64,
    /// Write sequence, breaks score ties in favour of the latest write.
    seq: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
    ordered: DashMap<String, Vec<Member>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plain keys held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| AppError::key_not_found(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());

        let current: i64 = entry
            .parse()
            .map_err(|_| AppError::storage(format!("value at '{key}' is not an integer")))?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| AppError::storage(format!("value at '{key}' overflowed")))?;

        *entry = next.to_string();
        Ok(next)
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn set_ordered(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut members = self.ordered.entry(key.to_string()).or_default();
        let seq = self.writes.fetch_add(1, Ordering::Relaxed);

        match members.iter().position(|m| m.value == member) {
            Some(i) => {
                members[i].score = score;
                members[i].seq = seq;
            }
            None => members.push(Member {
                value: member.to_string(),
                score,
                seq,
            }),
        }
        Ok(())
    }

    async fn get_all_ordered_by_score(&self, key: &str) -> Result<Vec<String>> {
        let mut members = match self.ordered.get(key) {
            Some(members) => members.value().clone(),
            None => return Ok(Vec::new()),
        };

        members.sort_by(|a, b| b.score.cmp(&a.score).then(b.seq.cmp(&a.seq)));
        Ok(members.into_iter().map(|m| m.value).collect())
    }

    async fn remove_ordered(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut members) = self.ordered.get_mut(key) {
            members.retain(|m| m.value != member);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let db = MemoryStore::new();
        let err = db.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn set_get_remove() {
        let db = MemoryStore::new();
        db.set("k", "v").await.unwrap();
        assert_eq!(db.get("k").await.unwrap(), "v");
        db.set("k", "w").await.unwrap();
        assert_eq!(db.get("k").await.unwrap(), "w");
        db.remove("k").await.unwrap();
        assert!(db.get("k").await.is_err());
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn set_if_absent_keeps_existing_value() {
        let db = MemoryStore::new();
        assert!(db.set_if_absent("c", "0").await.unwrap());
        db.increment("c").await.unwrap();
        assert!(!db.set_if_absent("c", "0").await.unwrap());
        assert_eq!(db.get("c").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn increment_counts_from_stored_value() {
        let db = MemoryStore::new();
        db.set("c", "41").await.unwrap();
        assert_eq!(db.increment("c").await.unwrap(), 42);
        assert_eq!(db.get("c").await.unwrap(), "42");
        assert_eq!(db.increment("fresh").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_rejects_non_integers() {
        let db = MemoryStore::new();
        db.set("c", "abc").await.unwrap();
        let err = db.increment("c").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(db.get("c").await.unwrap(), "abc");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn increment_is_atomic_under_contention() {
        let db = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..200 {
            let db = db.clone();
            handles.push(tokio::spawn(async move { db.increment("c").await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen, (1..=200).collect::<HashSet<i64>>());
    }

    #[tokio::test]
    async fn ordered_descending_by_score() {
        let db = MemoryStore::new();
        db.set_ordered("board", "a", 99).await.unwrap();
        db.set_ordered("board", "b", 0).await.unwrap();
        db.set_ordered("board", "c", 101).await.unwrap();

        assert_eq!(
            db.get_all_ordered_by_score("board").await.unwrap(),
            vec!["c", "a", "b"]
        );
    }

    #[tokio::test]
    async fn ordered_ties_favour_latest_write() {
        let db = MemoryStore::new();
        db.set_ordered("board", "1", 5).await.unwrap();
        db.set_ordered("board", "2", 5).await.unwrap();
        assert_eq!(db.get_all_ordered_by_score("board").await.unwrap(), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn ordered_update_moves_member() {
        let db = MemoryStore::new();
        db.set_ordered("board", "1", 1).await.unwrap();
        db.set_ordered("board", "2", 2).await.unwrap();
        db.set_ordered("board", "1", 3).await.unwrap();

        assert_eq!(db.get_all_ordered_by_score("board").await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn ordered_remove_and_missing_key() {
        let db = MemoryStore::new();
        assert!(db.get_all_ordered_by_score("none").await.unwrap().is_empty());

        db.set_ordered("board", "1", 1).await.unwrap();
        db.set_ordered("board", "2", 2).await.unwrap();
        db.remove_ordered("board", "2").await.unwrap();
        assert_eq!(db.get_all_ordered_by_score("board").await.unwrap(), vec!["1"]);
    }
}
