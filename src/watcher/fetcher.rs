use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::retry::{RetryFailure, RetryPolicy};
use super::session::SessionManager;
use crate::api::{AccountId, MarketplaceApi, RawItem, Session};
use crate::core::{ApiError, WatchError, WatchResult};

/// Fetches an account's favorites with rate-limit aware retry and request pacing.
pub struct ItemFetcher {
    api: Arc<dyn MarketplaceApi>,
    retry: RetryPolicy,
    pacing: (Duration, Duration),
    backoff_waits: AtomicU64,
}

impl ItemFetcher {
    pub fn new(api: Arc<dyn MarketplaceApi>, retry: RetryPolicy, pacing: (Duration, Duration)) -> Self {
        Self {
            api,
            retry,
            pacing,
            backoff_waits: AtomicU64::new(0),
        }
    }

    /// One listing fetch. Only rate-limit responses are retried.
    pub async fn fetch(&self, session: &Session) -> WatchResult<Vec<RawItem>> {
        let api = &self.api;
        let result = self
            .retry
            .run(
                "get_favorite_items",
                move || api.get_favorite_items(session),
                ApiError::is_rate_limited,
                |_, _| {
                    self.backoff_waits.fetch_add(1, Ordering::Relaxed);
                },
            )
            .await;

        match result {
            Ok(items) => Ok(items),
            Err(RetryFailure::Exhausted { attempts, last }) => Err(WatchError::RateLimited {
                attempts,
                message: last.to_string(),
            }),
            Err(RetryFailure::Permanent(e)) if e.is_auth() => Err(WatchError::Auth {
                account: session.account.clone(),
                message: e.to_string(),
            }),
            Err(RetryFailure::Permanent(e)) => Err(WatchError::Fetch(e.to_string())),
        }
    }

    /// Fetches for `account`, refreshing its session once if the marketplace rejects it.
    pub async fn fetch_account(
        &self,
        sessions: &mut SessionManager,
        account: &AccountId,
    ) -> WatchResult<Vec<RawItem>> {
        let session = sessions.acquire(account).await?;

        match self.fetch(&session).await {
            Err(WatchError::Auth { message, .. }) => {
                tracing::warn!(
                    "🔒 Session rejected for account {} ({}), refreshing",
                    account,
                    message
                );
                let refreshed = sessions.refresh(account).await?;
                match self.fetch(&refreshed).await {
                    Err(err @ WatchError::Auth { .. }) => {
                        sessions.evict(account);
                        Err(err)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Random delay to wait before an account's fetch.
    pub fn pacing_delay(&self) -> Duration {
        let (min, max) = self.pacing;
        if min >= max {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    pub fn backoff_waits(&self) -> u64 {
        self.backoff_waits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tgtg::MockMarketplaceApi;
    use crate::api::Credentials;
    use crate::storage::{MemoryStore, Store};
    use std::sync::atomic::AtomicU32;

    fn session(account: &str) -> Session {
        Session::new(
            AccountId::from(account),
            Credentials {
                access_token: "token".into(),
                refresh_token: "refresh".into(),
                cookie: String::new(),
            },
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut api = MockMarketplaceApi::new();
        api.expect_get_favorite_items().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::RateLimited("captcha".into()))
            } else {
                Ok(Vec::new())
            }
        });

        let fetcher = ItemFetcher::new(Arc::new(api), fast_retry(), (Duration::ZERO, Duration::ZERO));
        let items = fetcher.fetch(&session("a")).await.unwrap();

        assert!(items.is_empty());
        assert_eq!(fetcher.backoff_waits(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit_surfaces() {
        let mut api = MockMarketplaceApi::new();
        api.expect_get_favorite_items()
            .times(3)
            .returning(|_| Err(ApiError::RateLimited("captcha".into())));

        let fetcher = ItemFetcher::new(Arc::new(api), fast_retry(), (Duration::ZERO, Duration::ZERO));
        let err = fetcher.fetch(&session("a")).await.unwrap_err();

        assert!(matches!(err, WatchError::RateLimited { attempts: 3, .. }));
        assert_eq!(fetcher.backoff_waits(), 2);
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let mut api = MockMarketplaceApi::new();
        api.expect_get_favorite_items()
            .times(1)
            .returning(|_| Err(ApiError::Http("502 Bad Gateway".into())));

        let fetcher = ItemFetcher::new(Arc::new(api), fast_retry(), (Duration::ZERO, Duration::ZERO));
        let err = fetcher.fetch(&session("a")).await.unwrap_err();

        assert!(matches!(err, WatchError::Fetch(_)));
        assert_eq!(fetcher.backoff_waits(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once() {
        let account = AccountId::from("alice");
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_credentials(&[(account.clone(), session("alice").credentials)])
            .await
            .unwrap();

        let mut api = MockMarketplaceApi::new();
        api.expect_obtain_session()
            .returning(|account, creds| Ok(Session::new(account.clone(), creds.clone())));
        api.expect_refresh_session().times(1).returning(|s| {
            let mut creds = s.credentials.clone();
            creds.access_token = "fresh".into();
            Ok(Session::new(s.account.clone(), creds))
        });
        api.expect_get_favorite_items().times(2).returning(|s| {
            if s.credentials.access_token == "fresh" {
                Ok(Vec::new())
            } else {
                Err(ApiError::Unauthorized("expired".into()))
            }
        });

        let api: Arc<dyn MarketplaceApi> = Arc::new(api);
        let mut sessions = SessionManager::new(api.clone(), store);
        let fetcher = ItemFetcher::new(api, fast_retry(), (Duration::ZERO, Duration::ZERO));

        let items = fetcher.fetch_account(&mut sessions, &account).await.unwrap();
        assert!(items.is_empty());
        assert!(sessions.is_cached(&account));
    }

    #[test]
    fn test_pacing_delay_in_range() {
        let api = MockMarketplaceApi::new();
        let fetcher = ItemFetcher::new(
            Arc::new(api),
            fast_retry(),
            (Duration::from_secs(20), Duration::from_secs(40)),
        );
        for _ in 0..50 {
            let delay = fetcher.pacing_delay();
            assert!(delay >= Duration::from_secs(20) && delay <= Duration::from_secs(40));
        }
    }
}
