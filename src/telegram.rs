//! Telegram Bot API: long-poll updates in, messages and acks out.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    bot::Bot,
    conf::ConfTelegram,
    transport::{Event, Reply, Transport},
    types::Profile,
};

const RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Sender {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

impl Update {
    /// Any message, command or not, counts as a start.
    pub fn into_event(self) -> Option<Event> {
        if let Some(query) = self.callback_query {
            let chat = query.message?.chat.id;
            return Some(Event::Action {
                chat,
                token: query.data?,
                ack: Some(query.id),
            });
        }
        let message = self.message?;
        let from = message.from;
        Some(Event::Start {
            profile: Profile {
                chat_id: message.chat.id,
                username: from.as_ref().and_then(|f| f.username.clone()),
                first_name: from.as_ref().and_then(|f| f.first_name.clone()),
                last_name: from.and_then(|f| f.last_name),
            },
        })
    }
}

fn reply_markup(reply: &Reply) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = reply
        .keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| {
                    serde_json::json!({
                        "text": b.label,
                        "callback_data": b.action,
                    })
                })
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

pub struct Telegram {
    client: Client,
    base_url: String,
    poll_timeout: u64,
}

impl Telegram {
    pub fn new(conf: &ConfTelegram) -> anyhow::Result<Self> {
        if conf.token.is_empty() {
            bail!("Telegram token is not configured");
        }
        let client = Client::builder()
            // Long polls hold the request open for poll_timeout.
            .timeout(Duration::from_secs(conf.poll_timeout + 10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        let address = conf.address.trim_end_matches('/');
        let base_url = if address.starts_with("http") {
            format!("{address}/bot{}", conf.token)
        } else {
            format!("https://{address}/bot{}", conf.token)
        };
        Ok(Self {
            client,
            base_url,
            poll_timeout: conf.poll_timeout,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<T> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context(format!("Telegram {method} request failed"))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: ApiResponse<T> = serde_json::from_str(&text)
            .with_context(|| {
                let snippet: String = text.chars().take(200).collect();
                format!("Failed to parse {method} ({status}): {snippet}")
            })?;
        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => {
                bail!("Telegram {method} failed ({status}): {description:?}")
            }
        }
    }

    pub async fn updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// Feeds updates to `bot` one at a time, forever.
    pub async fn run(&self, bot: &Bot) -> anyhow::Result<()> {
        tracing::info!("Polling Telegram for updates.");
        let mut offset = 0;
        loop {
            let updates = match self.updates(offset).await {
                Ok(updates) => updates,
                Err(error) => {
                    tracing::error!(?error, "Failed to get updates.");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let update_id = update.update_id;
                match update.into_event() {
                    Some(event) => bot.handle(event).await,
                    None => tracing::debug!(update_id, "Skipping update."),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for Telegram {
    async fn send(&self, chat: i64, reply: &Reply) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat,
            "text": reply.text,
            "disable_web_page_preview": true,
        });
        if !reply.keyboard.is_empty() {
            body["reply_markup"] = reply_markup(reply);
        }
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn acknowledge(&self, ack: &str) -> anyhow::Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &serde_json::json!({ "callback_query_id": ack }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_message_is_a_start() {
        let event = update(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "chat": {"id": 42, "type": "private"},
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "username": "ana"},
                "text": "hola"
            }
        }))
        .into_event();
        assert_eq!(
            event,
            Some(Event::Start {
                profile: Profile {
                    chat_id: 42,
                    username: Some("ana".to_string()),
                    first_name: Some("Ana".to_string()),
                    last_name: None,
                }
            })
        );
    }

    #[test]
    fn callback_is_an_action() {
        let event = update(serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb-9",
                "from": {"id": 42, "is_bot": false, "first_name": "Ana"},
                "message": {"message_id": 3, "chat": {"id": 42}},
                "data": "league:matches:39"
            }
        }))
        .into_event();
        assert_eq!(
            event,
            Some(Event::Action {
                chat: 42,
                token: "league:matches:39".to_string(),
                ack: Some("cb-9".to_string()),
            })
        );
    }

    #[test]
    fn other_updates_are_skipped() {
        let event = update(serde_json::json!({
            "update_id": 12,
            "edited_message": {"message_id": 3, "chat": {"id": 42}}
        }))
        .into_event();
        assert_eq!(event, None);
    }

    #[test]
    fn keyboard_markup() {
        let reply = Reply::text("menu").button("Help", "help").back();
        assert_eq!(
            reply_markup(&reply),
            serde_json::json!({
                "inline_keyboard": [
                    [{"text": "Help", "callback_data": "help"}],
                    [{"text": "🔙 Back", "callback_data": "back"}]
                ]
            })
        );
    }

    #[test]
    fn api_errors_are_surfaced() {
        let parsed: ApiResponse<bool> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot was blocked by the user"
        }))
        .unwrap();
        assert!(!parsed.ok);
        assert!(parsed.result.is_none());
        assert_eq!(
            parsed.description.as_deref(),
            Some("Forbidden: bot was blocked by the user")
        );
    }

    #[test]
    fn empty_token_is_refused() {
        assert!(Telegram::new(&ConfTelegram::default()).is_err());
    }
}
