pub mod database;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::api::{AccountId, Credentials};
use crate::core::StorageError;

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use models::{AlertPreferences, BlacklistEntry, ItemSnapshot};

pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value persistence over the four collections the engine needs.
///
/// Implementations are shared between the polling worker and the delivery side,
/// so every method takes `&self` and must be safe under concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    async fn all_credentials(&self) -> StorageResult<HashMap<AccountId, Credentials>>;
    async fn credentials(&self, account: &AccountId) -> StorageResult<Option<Credentials>>;
    async fn upsert_credentials(&self, entries: &[(AccountId, Credentials)]) -> StorageResult<()>;

    async fn all_preferences(&self) -> StorageResult<HashMap<AccountId, AlertPreferences>>;
    async fn preferences(&self, account: &AccountId) -> StorageResult<Option<AlertPreferences>>;
    async fn upsert_preferences(
        &self,
        entries: &[(AccountId, AlertPreferences)],
    ) -> StorageResult<()>;

    async fn all_snapshots(&self) -> StorageResult<HashMap<String, ItemSnapshot>>;
    async fn snapshot(&self, item_id: &str) -> StorageResult<Option<ItemSnapshot>>;
    async fn upsert_snapshots(&self, snapshots: &[ItemSnapshot]) -> StorageResult<()>;

    async fn all_blacklist(&self) -> StorageResult<Vec<BlacklistEntry>>;
    async fn blacklist(&self, account: &AccountId) -> StorageResult<Vec<BlacklistEntry>>;
    async fn is_blacklisted(&self, account: &AccountId, store_id: &str) -> StorageResult<bool>;
    async fn upsert_blacklist(&self, entries: &[BlacklistEntry]) -> StorageResult<()>;
    async fn remove_blacklist(&self, account: &AccountId, store_id: &str) -> StorageResult<bool>;

    async fn close(&self);
}

/// Blacklisted store ids grouped per account.
pub fn blacklist_index(entries: &[BlacklistEntry]) -> HashMap<AccountId, HashSet<String>> {
    let mut index: HashMap<AccountId, HashSet<String>> = HashMap::new();
    for entry in entries {
        index
            .entry(entry.account.clone())
            .or_default()
            .insert(entry.store_id.clone());
    }
    index
}
