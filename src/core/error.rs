use thiserror::Error;

use crate::api::AccountId;

/// Failures reported by the marketplace API client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("response parse error: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// Rate limits and CAPTCHA/anti-automation challenges are the only retryable class.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

/// Failures of the persistence collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the chat delivery client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("message rejected: {description}")]
    Rejected { description: String },
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Http(err.to_string())
    }
}

/// Engine-level error taxonomy.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("authentication failed for account {account}: {message}")]
    Auth { account: AccountId, message: String },

    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("no credentials registered for account {0}")]
    UnknownAccount(AccountId),

    #[error("'{0}' is not an alert kind")]
    NotAnAlert(String),
}

impl WatchError {
    /// Whether this failure feeds the scheduler's consecutive-error counter.
    ///
    /// Credential problems are local to one account and are handled by skipping it,
    /// so they never push the whole engine into a cool-down.
    pub fn counts_toward_error_budget(&self) -> bool {
        match self {
            WatchError::Auth { .. } | WatchError::UnknownAccount(_) | WatchError::NotAnAlert(_) => {
                false
            }
            WatchError::RateLimited { .. }
            | WatchError::Fetch(_)
            | WatchError::Persistence(_)
            | WatchError::Delivery(_) => true,
        }
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
