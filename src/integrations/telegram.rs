//! Telegram Bot API 集成
//!
//! 通过 getUpdates 长轮询接收消息；update 按发送者分道，同一用户串行、不同用户并发。
//! 回调查询在分发前先 answerCallbackQuery，图片在分发前下载好（取最大尺寸）。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::bot::Bot;
use crate::integrations::dispatch::{UserLanes, DEFAULT_LANE_IDLE};
use crate::integrations::{Affordance, ChatId, InboundEvent, Sender, Transport};

/// API 响应外层
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: TgChat,
    pub text: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<TgMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

/// update 的分类结果（尚未下载图片、尚未应答回调）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Text {
        from: Sender,
        chat: ChatId,
        text: String,
    },
    Photo {
        from: Sender,
        chat: ChatId,
        file_id: String,
    },
    Callback {
        from: Sender,
        chat: ChatId,
        query_id: String,
        data: String,
    },
}

impl UpdateKind {
    pub fn sender(&self) -> &Sender {
        match self {
            UpdateKind::Text { from, .. }
            | UpdateKind::Photo { from, .. }
            | UpdateKind::Callback { from, .. } => from,
        }
    }
}

impl From<&TgUser> for Sender {
    fn from(u: &TgUser) -> Self {
        Sender {
            id: u.id,
            first_name: u.first_name.clone(),
        }
    }
}

/// 把 update 归类；不关心的类型返回 None
pub fn classify_update(update: &Update) -> Option<UpdateKind> {
    if let Some(query) = &update.callback_query {
        let chat = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        return Some(UpdateKind::Callback {
            from: Sender::from(&query.from),
            chat,
            query_id: query.id.clone(),
            data: query.data.clone().unwrap_or_default(),
        });
    }

    let msg = update.message.as_ref()?;
    let from = Sender::from(msg.from.as_ref()?);

    if let Some(photos) = &msg.photo {
        let largest = photos
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        return Some(UpdateKind::Photo {
            from,
            chat: msg.chat.id,
            file_id: largest.file_id.clone(),
        });
    }

    msg.text.as_ref().map(|text| UpdateKind::Text {
        from,
        chat: msg.chat.id,
        text: text.clone(),
    })
}

/// Affordance → reply_markup JSON
pub fn reply_markup(affordance: &Affordance) -> Value {
    match affordance {
        Affordance::Inline(rows) => json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        }),
        Affordance::Keyboard(rows) => json!({
            "keyboard": rows
                .iter()
                .map(|row| row.iter().map(|t| json!({ "text": t })).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "resize_keyboard": true
        }),
    }
}

/// Telegram Bot API 客户端
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    file_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, poll_timeout_secs: u64) -> anyhow::Result<Self> {
        let base = api_base.trim_end_matches('/');
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: format!("{}/bot{}", base, token),
            file_url: format!("{}/file/bot{}", base, token),
            poll_timeout_secs,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> anyhow::Result<T> {
        let url = format!("{}/{}", self.api_url, method);
        let resp: ApiResponse<T> = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?
            .json()
            .await
            .with_context(|| format!("Telegram {} returned invalid JSON", method))?;
        unwrap_response(method, resp)
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> anyhow::Result<Vec<Update>> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", &body).await
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_markup: Option<Value>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "chat_id": chat, "text": text });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        self.call::<Value>("sendMessage", &body).await?;
        Ok(())
    }

    pub async fn answer_callback(&self, query_id: &str) -> anyhow::Result<()> {
        self.call::<Value>("answerCallbackQuery", &json!({ "callback_query_id": query_id }))
            .await?;
        Ok(())
    }

    /// getFile + 下载
    pub async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let file: TgFile = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = file
            .file_path
            .ok_or_else(|| anyhow::anyhow!("Telegram getFile returned no file_path"))?;
        let bytes = self
            .http
            .get(format!("{}/{}", self.file_url, path))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// 归类并补全为入站事件：应答回调、下载图片
    pub async fn to_inbound(&self, update: &Update) -> anyhow::Result<Option<InboundEvent>> {
        let Some(kind) = classify_update(update) else {
            return Ok(None);
        };
        let event = match kind {
            UpdateKind::Text { from, chat, text } => InboundEvent::Text { from, chat, text },
            UpdateKind::Photo { from, chat, file_id } => {
                let bytes = self.download_file(&file_id).await?;
                InboundEvent::Image { from, chat, bytes }
            }
            UpdateKind::Callback {
                from,
                chat,
                query_id,
                data,
            } => {
                if let Err(e) = self.answer_callback(&query_id).await {
                    tracing::warn!("Failed to answer callback {}: {:#}", query_id, e);
                }
                InboundEvent::Callback { from, chat, data }
            }
        };
        Ok(Some(event))
    }
}

fn unwrap_response<T>(method: &str, resp: ApiResponse<T>) -> anyhow::Result<T> {
    match (resp.ok, resp.result) {
        (true, Some(result)) => Ok(result),
        _ => anyhow::bail!(
            "Telegram {} error {}: {}",
            method,
            resp.error_code.unwrap_or_default(),
            resp.description.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        affordance: Option<&Affordance>,
    ) -> anyhow::Result<()> {
        self.send_message(chat, text, affordance.map(reply_markup))
            .await
    }

    async fn send_document(&self, chat: ChatId, bytes: Vec<u8>, filename: &str) -> anyhow::Result<()> {
        let form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .part(
                "document",
                multipart::Part::bytes(bytes).file_name(filename.to_string()),
            );
        let resp: ApiResponse<Value> = self
            .http
            .post(format!("{}/sendDocument", self.api_url))
            .multipart(form)
            .send()
            .await
            .context("Telegram sendDocument request failed")?
            .json()
            .await
            .context("Telegram sendDocument returned invalid JSON")?;
        unwrap_response("sendDocument", resp)?;
        Ok(())
    }
}

/// 每个用户一条通道：在通道内补全事件并交给 Bot，保证同一用户按接收顺序处理
fn update_lanes(client: Arc<TelegramClient>, bot: Arc<Bot>) -> UserLanes<Update> {
    UserLanes::new(DEFAULT_LANE_IDLE, move |update: Update| {
        let client = Arc::clone(&client);
        let bot = Arc::clone(&bot);
        async move {
            match client.to_inbound(&update).await {
                Ok(Some(event)) => bot.handle(event).await,
                Ok(None) => tracing::debug!("Update {} ignored", update.update_id),
                Err(e) => {
                    tracing::warn!("Failed to prepare update {}: {:#}", update.update_id, e)
                }
            }
        }
    })
}

/// 长轮询主循环，直到 shutdown 被取消
pub async fn run_polling(client: Arc<TelegramClient>, bot: Arc<Bot>, shutdown: CancellationToken) {
    let lanes = update_lanes(Arc::clone(&client), bot);
    let mut offset: Option<i64> = None;
    tracing::info!("Telegram long polling started");

    loop {
        let updates = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = client.get_updates(offset) => r,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    match classify_update(&update) {
                        Some(kind) => {
                            let user_id = kind.sender().id;
                            lanes.dispatch(user_id, update);
                        }
                        None => tracing::debug!("Update {} ignored", update.update_id),
                    }
                }
            }
            Err(e) => {
                tracing::warn!("getUpdates failed: {:#}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(3)) => {}
                }
            }
        }
    }

    tracing::info!("Telegram long polling stopped ({} lanes open)", lanes.active());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChatEngine, EngineSettings};
    use crate::integrations::Button;
    use crate::llm::{MockLlmClient, ProviderId, ProviderProfile, ProviderRouter};
    use crate::prompts::{PromptCatalog, PromptDefinition};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(v: Value) -> Update {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_classify_text() {
        let update = parse(json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": { "id": 42, "first_name": "Ann" },
                "chat": { "id": 42 },
                "text": "hello"
            }
        }));
        assert_eq!(
            classify_update(&update),
            Some(UpdateKind::Text {
                from: Sender { id: 42, first_name: "Ann".into() },
                chat: 42,
                text: "hello".into()
            })
        );
    }

    #[test]
    fn test_classify_photo_picks_largest() {
        let update = parse(json!({
            "update_id": 11,
            "message": {
                "message_id": 2,
                "from": { "id": 42, "first_name": "Ann" },
                "chat": { "id": 42 },
                "photo": [
                    { "file_id": "small", "width": 90, "height": 90 },
                    { "file_id": "big", "width": 1280, "height": 960 },
                    { "file_id": "mid", "width": 320, "height": 240 }
                ]
            }
        }));
        assert!(matches!(
            classify_update(&update),
            Some(UpdateKind::Photo { file_id, .. }) if file_id == "big"
        ));
    }

    #[test]
    fn test_classify_callback_uses_message_chat() {
        let update = parse(json!({
            "update_id": 12,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 42, "first_name": "Ann" },
                "message": { "message_id": 3, "chat": { "id": -100 } },
                "data": "set_prompt:p1"
            }
        }));
        assert_eq!(
            classify_update(&update),
            Some(UpdateKind::Callback {
                from: Sender { id: 42, first_name: "Ann".into() },
                chat: -100,
                query_id: "cb1".into(),
                data: "set_prompt:p1".into()
            })
        );
    }

    #[test]
    fn test_classify_ignores_other_updates() {
        let update = parse(json!({ "update_id": 13 }));
        assert!(classify_update(&update).is_none());
    }

    #[test]
    fn test_reply_markup_shapes() {
        let inline = reply_markup(&Affordance::Inline(vec![vec![Button::new("Save", "save_answer")]]));
        assert_eq!(inline["inline_keyboard"][0][0]["callback_data"], "save_answer");

        let keyboard = reply_markup(&Affordance::Keyboard(vec![vec!["A".into(), "B".into()]]));
        assert_eq!(keyboard["keyboard"][0][1]["text"], "B");
        assert_eq!(keyboard["resize_keyboard"], true);
    }

    #[tokio::test]
    async fn test_send_text_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({ "chat_id": 7, "text": "hi" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": { "message_id": 1 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::new(&server.uri(), "TOKEN", 1).unwrap();
        client.send_text(7, "hi", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::new(&server.uri(), "TOKEN", 1).unwrap();
        let err = client.send_text(7, "hi", None).await.unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn test_get_updates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .and(body_partial_json(json!({ "offset": 5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{
                    "update_id": 5,
                    "message": {
                        "message_id": 1,
                        "from": { "id": 1, "first_name": "A" },
                        "chat": { "id": 1 },
                        "text": "/start"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::new(&server.uri(), "TOKEN", 1).unwrap();
        let updates = client.get_updates(Some(5)).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/start"));
    }

    fn text_update(update_id: i64, user: i64, text: &str) -> Value {
        json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "from": { "id": user, "first_name": "U" },
                "chat": { "id": user },
                "text": text
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_polling_keeps_per_user_order_within_a_batch() {
        const USERS: i64 = 50;
        let server = MockServer::start().await;

        // 一个批次里每个用户连发两条
        let mut batch = Vec::new();
        for user in 1..=USERS {
            batch.push(text_update(user * 2, user, "first"));
            batch.push(text_update(user * 2 + 1, user, "second"));
        }
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": batch })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": [] }))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": { "message_id": 1 } })),
            )
            .mount(&server)
            .await;

        let mut router = ProviderRouter::new(
            ProviderProfile::new(ProviderId::Primary, "gpt"),
            ProviderProfile::new(ProviderId::Secondary, "deepseek-chat"),
        );
        router.register(
            ProviderId::Primary,
            Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(20))),
        );
        let engine = Arc::new(ChatEngine::new(
            EngineSettings::default(),
            PromptCatalog::new(None, PromptDefinition::fallback("You are helpful.")),
            router,
        ));
        let client = Arc::new(TelegramClient::new(&server.uri(), "TOKEN", 1).unwrap());
        let bot = Arc::new(Bot::new(engine.clone(), client.clone(), Vec::new()));

        let shutdown = CancellationToken::new();
        let polling = tokio::spawn(run_polling(client, bot, shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                let mut done = true;
                for user in 1..=USERS {
                    if engine.context(user).await.len() < 4 {
                        done = false;
                        break;
                    }
                }
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
        polling.await.unwrap();

        for user in 1..=USERS {
            let ctx: Vec<String> = engine.context(user).await.into_iter().map(|m| m.content).collect();
            assert_eq!(
                ctx,
                vec!["first", "[gpt] first", "second", "[gpt] second"],
                "user {} saw turns out of order",
                user
            );
        }
    }

    #[test]
    fn test_update_kind_sender() {
        let update = parse(text_update(1, 42, "hi"));
        assert_eq!(classify_update(&update).unwrap().sender().id, 42);
    }
}
