use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::*;
use crate::core::config::MarketplaceConfig;
use crate::core::ApiError;

const ITEMS_ENDPOINT: &str = "item/v8/";
const REFRESH_ENDPOINT: &str = "auth/v5/token/refresh";

/// Remote listing source for watched accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Builds a session from a stored credential blob.
    async fn obtain_session(
        &self,
        account: &AccountId,
        credentials: &Credentials,
    ) -> Result<Session, ApiError>;

    /// Exchanges the session's refresh token for a new credential blob.
    async fn refresh_session(&self, session: &Session) -> Result<Session, ApiError>;

    /// All favorited listings visible to the session, sold out or not.
    async fn get_favorite_items(&self, session: &Session) -> Result<Vec<RawItem>, ApiError>;
}

pub struct TgtgClient {
    client: Client,
    config: MarketplaceConfig,
}

impl TgtgClient {
    pub fn new(config: MarketplaceConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Ok(language) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, language);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        session: Option<&Session>,
        body: serde_json::Value,
    ) -> Result<(T, Option<String>), ApiError> {
        let mut request = self.client.post(self.url(endpoint)).json(&body);

        if let Some(session) = session {
            request = request.header(
                AUTHORIZATION,
                format!("Bearer {}", session.credentials.access_token),
            );
            if !session.credentials.cookie.is_empty() {
                request = request.header(COOKIE, session.credentials.cookie.clone());
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let cookie = (!cookie.is_empty()).then(|| cookie.join("; "));

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("TGTG API error on {}: {} - {}", endpoint, status, error_text);
            return Err(classify_failure(status, &error_text));
        }

        let parsed = response.json::<T>().await?;
        Ok((parsed, cookie))
    }
}

/// CAPTCHA challenges arrive as 403s, so the body decides between auth and anti-automation.
fn classify_failure(status: StatusCode, body: &str) -> ApiError {
    let message = format!("{} - {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(message),
        StatusCode::FORBIDDEN if body.to_lowercase().contains("captcha") => {
            ApiError::RateLimited(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
        _ => ApiError::Http(message),
    }
}

#[async_trait]
impl MarketplaceApi for TgtgClient {
    async fn obtain_session(
        &self,
        account: &AccountId,
        credentials: &Credentials,
    ) -> Result<Session, ApiError> {
        if credentials.access_token.is_empty() || credentials.refresh_token.is_empty() {
            return Err(ApiError::Unauthorized(format!(
                "incomplete credentials for account {}",
                account
            )));
        }
        Ok(Session::new(account.clone(), credentials.clone()))
    }

    async fn refresh_session(&self, session: &Session) -> Result<Session, ApiError> {
        let body = serde_json::json!({ "refresh_token": session.credentials.refresh_token });
        let (tokens, cookie): (TokenRefreshResponse, _) =
            self.request(REFRESH_ENDPOINT, Some(session), body).await?;

        tracing::info!("🔑 Refreshed marketplace token for account {}", session.account);

        Ok(Session::new(
            session.account.clone(),
            Credentials {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                cookie: cookie.unwrap_or_else(|| session.credentials.cookie.clone()),
            },
        ))
    }

    async fn get_favorite_items(&self, session: &Session) -> Result<Vec<RawItem>, ApiError> {
        let page_size = self.config.page_size.max(1);
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let body = serde_json::json!({
                "origin": { "latitude": 0.0, "longitude": 0.0 },
                "radius": 21,
                "page_size": page_size,
                "page": page,
                "discover": false,
                "favorites_only": true,
                "item_categories": [],
                "diet_categories": [],
                "with_stock_only": false,
                "hidden_only": false,
                "we_care_only": false,
            });

            let (response, _): (ItemsResponse, _) =
                self.request(ITEMS_ENDPOINT, Some(session), body).await?;
            let received = response.items.len();
            items.extend(response.items);

            if received < page_size as usize {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            "📦 Fetched {} favorites for account {} ({} pages)",
            items.len(),
            session.account,
            page
        );

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captcha_is_rate_limited() {
        let err = classify_failure(StatusCode::FORBIDDEN, r#"{"url":"https://geo.captcha-delivery.com/"}"#);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_plain_forbidden_is_auth() {
        let err = classify_failure(StatusCode::FORBIDDEN, "token expired");
        assert!(err.is_auth());
        assert!(classify_failure(StatusCode::UNAUTHORIZED, "").is_auth());
    }

    #[test]
    fn test_server_errors_are_not_retryable() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, "upstream");
        assert!(!err.is_rate_limited());
        assert!(!err.is_auth());
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "").is_rate_limited());
    }

    #[tokio::test]
    async fn test_obtain_session_rejects_empty_tokens() {
        let client = TgtgClient::new(MarketplaceConfig {
            base_url: "http://localhost/".into(),
            user_agent: "test".into(),
            accept_language: "en-GB".into(),
            request_timeout_secs: 1,
            page_size: 10,
        })
        .unwrap();

        let result = client
            .obtain_session(
                &AccountId::from("1"),
                &Credentials {
                    access_token: String::new(),
                    refresh_token: "r".into(),
                    cookie: String::new(),
                },
            )
            .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
