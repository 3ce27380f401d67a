use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::{AccountId, ButtonAction, LinkButton};
use crate::core::config::TelegramConfig;
use crate::core::DeliveryError;

/// Outbound chat channel consumed by the delivery loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatDelivery: Send + Sync {
    async fn send_message(
        &self,
        account: &AccountId,
        text: &str,
        buttons: &[LinkButton],
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

pub struct TelegramClient {
    client: Client,
    send_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            send_url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }
}

fn build_request<'a>(
    account: &'a AccountId,
    text: &'a str,
    buttons: &'a [LinkButton],
) -> SendMessageRequest<'a> {
    let reply_markup = (!buttons.is_empty()).then(|| InlineKeyboardMarkup {
        inline_keyboard: vec![buttons
            .iter()
            .map(|button| match &button.action {
                ButtonAction::Url(url) => InlineKeyboardButton {
                    text: &button.text,
                    url: Some(url),
                    callback_data: None,
                },
                ButtonAction::Callback(data) => InlineKeyboardButton {
                    text: &button.text,
                    url: None,
                    callback_data: Some(data),
                },
            })
            .collect()],
    });

    SendMessageRequest {
        chat_id: account.as_str(),
        text,
        parse_mode: "Markdown",
        reply_markup,
    }
}

#[async_trait]
impl ChatDelivery for TelegramClient {
    async fn send_message(
        &self,
        account: &AccountId,
        text: &str,
        buttons: &[LinkButton],
    ) -> Result<(), DeliveryError> {
        let request = build_request(account, text, buttons);
        let response = self.client.post(&self.send_url).json(&request).send().await?;
        let status = response.status();

        let body: BotApiResponse = response.json().await.unwrap_or(BotApiResponse {
            ok: status.is_success(),
            description: Some(status.to_string()),
            parameters: None,
        });

        if status.as_u16() == 429 {
            let retry_after_secs = body
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(5);
            return Err(DeliveryError::RateLimited { retry_after_secs });
        }

        if !status.is_success() || !body.ok {
            return Err(DeliveryError::Rejected {
                description: body.description.unwrap_or_else(|| status.to_string()),
            });
        }

        Ok(())
    }
}
