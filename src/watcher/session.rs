use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{AccountId, MarketplaceApi, Session};
use crate::core::{WatchError, WatchResult};
use crate::storage::Store;

/// Owns the live session of every account the polling worker has touched.
///
/// Only the polling worker holds a `SessionManager`, so the cache needs no lock.
pub struct SessionManager {
    api: Arc<dyn MarketplaceApi>,
    store: Arc<dyn Store>,
    sessions: HashMap<AccountId, Session>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn MarketplaceApi>, store: Arc<dyn Store>) -> Self {
        Self {
            api,
            store,
            sessions: HashMap::new(),
        }
    }

    /// Cached session for `account`, or a fresh one built from stored credentials.
    pub async fn acquire(&mut self, account: &AccountId) -> WatchResult<Session> {
        if let Some(session) = self.sessions.get(account) {
            return Ok(session.clone());
        }

        let credentials = self
            .store
            .credentials(account)
            .await?
            .ok_or_else(|| WatchError::UnknownAccount(account.clone()))?;

        let session = self
            .api
            .obtain_session(account, &credentials)
            .await
            .map_err(|e| WatchError::Auth {
                account: account.clone(),
                message: e.to_string(),
            })?;

        tracing::info!("🔑 Session established for account {}", account);
        self.sessions.insert(account.clone(), session.clone());
        Ok(session)
    }

    /// Exchanges the account's credentials for new ones. The new credential blob is
    /// persisted before the cache is updated; a failed refresh evicts the session.
    pub async fn refresh(&mut self, account: &AccountId) -> WatchResult<Session> {
        let current = match self.sessions.get(account) {
            Some(session) => session.clone(),
            None => self.acquire(account).await?,
        };

        let refreshed = match self.api.refresh_session(&current).await {
            Ok(session) => session,
            Err(e) => {
                self.evict(account);
                tracing::warn!("🔒 Session refresh failed for account {}: {}", account, e);
                return Err(WatchError::Auth {
                    account: account.clone(),
                    message: e.to_string(),
                });
            }
        };

        if let Err(e) = self
            .store
            .upsert_credentials(&[(account.clone(), refreshed.credentials.clone())])
            .await
        {
            tracing::error!(
                "❌ Failed to persist refreshed credentials for account {}: {}",
                account,
                e
            );
        }

        tracing::info!("🔄 Session refreshed for account {}", account);
        self.sessions.insert(account.clone(), refreshed.clone());
        Ok(refreshed)
    }

    pub fn evict(&mut self, account: &AccountId) -> bool {
        self.sessions.remove(account).is_some()
    }

    pub fn is_cached(&self, account: &AccountId) -> bool {
        self.sessions.contains_key(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tgtg::MockMarketplaceApi;
    use crate::api::Credentials;
    use crate::core::ApiError;
    use crate::storage::MemoryStore;

    fn credentials(token: &str) -> Credentials {
        Credentials {
            access_token: token.into(),
            refresh_token: format!("{}-refresh", token),
            cookie: String::new(),
        }
    }

    async fn seeded_store(account: &AccountId) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_credentials(&[(account.clone(), credentials("old"))])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_acquire_caches_session() {
        let account = AccountId::from("alice");
        let store = seeded_store(&account).await;

        let mut api = MockMarketplaceApi::new();
        api.expect_obtain_session()
            .times(1)
            .returning(|account, creds| Ok(Session::new(account.clone(), creds.clone())));

        let mut sessions = SessionManager::new(Arc::new(api), store);
        let first = sessions.acquire(&account).await.unwrap();
        let second = sessions.acquire(&account).await.unwrap();

        assert_eq!(first, second);
        assert!(sessions.is_cached(&account));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let api = MockMarketplaceApi::new();
        let mut sessions = SessionManager::new(Arc::new(api), Arc::new(MemoryStore::new()));

        let err = sessions.acquire(&AccountId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, WatchError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn test_refresh_persists_before_caching() {
        let account = AccountId::from("alice");
        let store = seeded_store(&account).await;

        let mut api = MockMarketplaceApi::new();
        api.expect_obtain_session()
            .returning(|account, creds| Ok(Session::new(account.clone(), creds.clone())));
        api.expect_refresh_session()
            .times(1)
            .returning(|session| Ok(Session::new(session.account.clone(), credentials("new"))));

        let mut sessions = SessionManager::new(Arc::new(api), store.clone());
        sessions.acquire(&account).await.unwrap();
        let refreshed = sessions.refresh(&account).await.unwrap();

        assert_eq!(refreshed.credentials.access_token, "new");
        let stored = store.credentials(&account).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new");
        assert_eq!(
            sessions.acquire(&account).await.unwrap().credentials.access_token,
            "new"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_evicts() {
        let account = AccountId::from("alice");
        let store = seeded_store(&account).await;

        let mut api = MockMarketplaceApi::new();
        api.expect_obtain_session()
            .returning(|account, creds| Ok(Session::new(account.clone(), creds.clone())));
        api.expect_refresh_session()
            .returning(|_| Err(ApiError::Unauthorized("refresh token revoked".into())));

        let mut sessions = SessionManager::new(Arc::new(api), store.clone());
        sessions.acquire(&account).await.unwrap();

        let err = sessions.refresh(&account).await.unwrap_err();
        assert!(matches!(err, WatchError::Auth { .. }));
        assert!(!sessions.is_cached(&account));

        // Stored credentials are untouched so the next cycle can try again.
        let stored = store.credentials(&account).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "old");
    }
}
