use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{AlertPreferences, BlacklistEntry, ItemSnapshot, StorageResult, Store};
use crate::api::{AccountId, Credentials};

#[derive(Default)]
struct Collections {
    credentials: HashMap<AccountId, Credentials>,
    preferences: HashMap<AccountId, AlertPreferences>,
    snapshots: HashMap<String, ItemSnapshot>,
    blacklist: BTreeMap<(AccountId, String), BlacklistEntry>,
}

/// Process-local store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn all_credentials(&self) -> StorageResult<HashMap<AccountId, Credentials>> {
        Ok(self.inner.read().await.credentials.clone())
    }

    async fn credentials(&self, account: &AccountId) -> StorageResult<Option<Credentials>> {
        Ok(self.inner.read().await.credentials.get(account).cloned())
    }

    async fn upsert_credentials(&self, entries: &[(AccountId, Credentials)]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for (account, credentials) in entries {
            inner.credentials.insert(account.clone(), credentials.clone());
        }
        Ok(())
    }

    async fn all_preferences(&self) -> StorageResult<HashMap<AccountId, AlertPreferences>> {
        Ok(self.inner.read().await.preferences.clone())
    }

    async fn preferences(&self, account: &AccountId) -> StorageResult<Option<AlertPreferences>> {
        Ok(self.inner.read().await.preferences.get(account).copied())
    }

    async fn upsert_preferences(
        &self,
        entries: &[(AccountId, AlertPreferences)],
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for (account, prefs) in entries {
            inner.preferences.insert(account.clone(), *prefs);
        }
        Ok(())
    }

    async fn all_snapshots(&self) -> StorageResult<HashMap<String, ItemSnapshot>> {
        Ok(self.inner.read().await.snapshots.clone())
    }

    async fn snapshot(&self, item_id: &str) -> StorageResult<Option<ItemSnapshot>> {
        Ok(self.inner.read().await.snapshots.get(item_id).cloned())
    }

    async fn upsert_snapshots(&self, snapshots: &[ItemSnapshot]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for snapshot in snapshots {
            inner
                .snapshots
                .insert(snapshot.item_id.clone(), snapshot.clone());
        }
        Ok(())
    }

    async fn all_blacklist(&self) -> StorageResult<Vec<BlacklistEntry>> {
        Ok(self.inner.read().await.blacklist.values().cloned().collect())
    }

    async fn blacklist(&self, account: &AccountId) -> StorageResult<Vec<BlacklistEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .blacklist
            .values()
            .filter(|entry| &entry.account == account)
            .cloned()
            .collect())
    }

    async fn is_blacklisted(&self, account: &AccountId, store_id: &str) -> StorageResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .blacklist
            .contains_key(&(account.clone(), store_id.to_string())))
    }

    async fn upsert_blacklist(&self, entries: &[BlacklistEntry]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for entry in entries {
            inner.blacklist.insert(
                (entry.account.clone(), entry.store_id.clone()),
                entry.clone(),
            );
        }
        Ok(())
    }

    async fn remove_blacklist(&self, account: &AccountId, store_id: &str) -> StorageResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .blacklist
            .remove(&(account.clone(), store_id.to_string()))
            .is_some())
    }

    async fn close(&self) {}
}
