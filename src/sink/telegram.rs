use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LinkButton, MessageTemplate, NotificationSink};
use crate::{
    error::DeliveryError,
    types::{PriceQuote, TradeEvent},
};

const API_URL: &str = "https://api.telegram.org";

/// Delivers notifications to a Telegram chat via Bot API `sendMessage`.
#[derive(Clone, derive_more::Debug)]
pub struct TelegramSink {
    client: reqwest::Client,
    #[debug(skip)]
    endpoint: String,
    chat_id: String,
    template: MessageTemplate,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    reply_markup: InlineKeyboard<'a>,
}

#[derive(Serialize)]
struct InlineKeyboard<'a> {
    inline_keyboard: &'a [Vec<LinkButton>],
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl TelegramSink {
    pub fn new(
        client: reqwest::Client,
        bot_token: &str,
        chat_id: &str,
        template: MessageTemplate,
    ) -> Self {
        Self::with_api_url(client, API_URL, bot_token, chat_id, template)
    }

    /// Same as [`Self::new`] with custom Bot API server.
    pub fn with_api_url(
        client: reqwest::Client,
        api_url: &str,
        bot_token: &str,
        chat_id: &str,
        template: MessageTemplate,
    ) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                bot_token
            ),
            chat_id: chat_id.to_string(),
            template,
        }
    }
}

impl NotificationSink for TelegramSink {
    async fn deliver(&self, event: &TradeEvent, quote: &PriceQuote) -> Result<(), DeliveryError> {
        let message = self.template.render(event, quote);
        let request = SendMessage {
            chat_id: &self.chat_id,
            text: &message.text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
            reply_markup: InlineKeyboard {
                inline_keyboard: &message.buttons,
            },
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status().as_u16();
        // Error bodies are informative only, status decides
        let body = response.json::<ApiResponse>().await.unwrap_or_default();
        debug!(status, ok = body.ok, "telegram response");
        classify(status, body)
    }
}

fn classify(status: u16, body: ApiResponse) -> Result<(), DeliveryError> {
    if status == 429 {
        return Err(DeliveryError::RateLimited {
            retry_after: body.parameters.and_then(|p| p.retry_after),
        });
    }
    if !(200..300).contains(&status) || !body.ok {
        return Err(DeliveryError::Rejected {
            status,
            description: body.description.unwrap_or_default(),
        });
    }
    Ok(())
}
