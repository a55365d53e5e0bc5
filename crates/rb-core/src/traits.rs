//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// String-keyed document storage with an atomic counter primitive.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn ping(&self) -> bool;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Stores `value` only if `key` is absent, atomically. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Fails with `AppError::NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<String>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Increments the base-10 integer stored at `key` and returns the new value.
    /// Atomic with respect to concurrent callers on the same key. An absent key
    /// counts as `0`; a value that is not an integer is an error.
    async fn increment(&self, key: &str) -> Result<i64>;
}

/// Sorted sets: a key maps to members ordered by a numeric score.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Inserts `member`, or moves it to `score` if already present.
    async fn set_ordered(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// All members at `key`, highest score first. Empty when the key is absent.
    async fn get_all_ordered_by_score(&self, key: &str) -> Result<Vec<String>>;

    async fn remove_ordered(&self, key: &str, member: &str) -> Result<()>;
}

/// A backend that provides both documents and sorted sets.
pub trait Store: KeyValueStore + OrderedStore {}

impl<T: KeyValueStore + OrderedStore> Store for T {}

/// Media storage contract for uploaded images.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Saves raw bytes under `group`/`name` and returns the URI to reference them by.
    async fn store(&self, data: Bytes, group: &str, name: &str) -> anyhow::Result<String>;

    /// Time-based unique name that keeps the extension of `filename`.
    fn generate_unique_name(&self, filename: &str) -> String;
}

/// Account and session contract.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registers a user and returns a session token.
    async fn register(&self, email: &str, username: &str, password: &str) -> Result<String>;

    /// Registers a user under a generated name. Returns `(username, token)`.
    async fn anonymous_register(&self) -> Result<(String, String)>;

    /// Checks credentials and returns a fresh session token.
    async fn login(&self, username: &str, password: &str) -> Result<String>;

    /// Returns the username a token was issued to.
    fn verify(&self, token: &str) -> Result<String>;
}
