//! 命令与回调处理
//!
//! 入站事件 → 引擎操作 → 出站回复。管理员名单在启动时固定。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bot::report;
use crate::core::{ChatEngine, ChatError};
use crate::integrations::{Affordance, Button, ChatId, InboundEvent, Sender, Transport};
use crate::llm::ProviderId;
use crate::memory::UserId;
use crate::prompts::{CatalogOrigin, PromptDefinition};

pub const BTN_ASK: &str = "💬 提问";
pub const BTN_PROMPT: &str = "🧠 选择提示词";
pub const BTN_STATS: &str = "📊 统计";
pub const BTN_RESET: &str = "🧹 重置上下文";
pub const BTN_AI: &str = "🤖 选择 AI";
pub const BTN_MY_REPORT: &str = "📄 我的报表";

pub const CB_SET_PROMPT: &str = "set_prompt:";
pub const CB_SET_AI: &str = "set_ai:";
pub const CB_SAVE_ANSWER: &str = "save_answer";
pub const CB_VIEW_STATS: &str = "view_stats";
pub const CB_BROADCAST: &str = "broadcast";
pub const CB_CANCEL: &str = "cancel";

const ACCESS_DENIED: &str = "⛔ 无权访问。";

pub fn main_keyboard() -> Affordance {
    Affordance::Keyboard(vec![
        vec![BTN_ASK.to_string(), BTN_PROMPT.to_string()],
        vec![BTN_STATS.to_string(), BTN_RESET.to_string()],
        vec![BTN_AI.to_string(), BTN_MY_REPORT.to_string()],
    ])
}

fn save_answer_button() -> Affordance {
    Affordance::Inline(vec![vec![Button::new("💾 保存回答", CB_SAVE_ANSWER)]])
}

fn admin_panel() -> Affordance {
    Affordance::Inline(vec![
        vec![Button::new("📊 统计", CB_VIEW_STATS)],
        vec![Button::new("📢 广播", CB_BROADCAST)],
        vec![Button::new("退出", CB_CANCEL)],
    ])
}

/// 解析 `/command@botname args`，返回 (command, args)
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let command = head.split('@').next().unwrap_or(head);
    if command.is_empty() {
        return None;
    }
    Some((command, args))
}

const HELP_TEXT: &str = "可用命令：\n\
/start - 开始使用\n\
/menu - 主菜单\n\
/prompt - 选择提示词\n\
/ai - 选择 AI 提供方\n\
/reset - 清空对话上下文\n\
/myreport - 我的报表\n\
/help - 帮助\n\n\
直接发送文字即可提问，发送图片可进行图片分析。";

pub struct Bot {
    engine: Arc<ChatEngine>,
    transport: Arc<dyn Transport>,
    admins: HashSet<UserId>,
    /// 下一条文本将作为广播内容的管理员
    awaiting_broadcast: Mutex<HashSet<UserId>>,
}

impl Bot {
    pub fn new(
        engine: Arc<ChatEngine>,
        transport: Arc<dyn Transport>,
        admins: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            engine,
            transport,
            admins: admins.into_iter().collect(),
            awaiting_broadcast: Mutex::new(HashSet::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ChatEngine> {
        &self.engine
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    /// 处理一个入站事件；错误只记录日志
    pub async fn handle(&self, event: InboundEvent) {
        let chat = event.chat();
        let user_id = event.sender().id;
        let result = match event {
            InboundEvent::Text { from, text, .. } => self.on_text(&from, chat, &text).await,
            InboundEvent::Image { from, bytes, .. } => self.on_image(from.id, chat, &bytes).await,
            InboundEvent::Callback { from, data, .. } => self.on_callback(from.id, chat, &data).await,
        };
        if let Err(e) = result {
            tracing::error!("Failed to handle event from {}: {:#}", user_id, e);
        }
    }

    async fn reply(&self, chat: ChatId, text: &str) -> anyhow::Result<()> {
        self.transport.send_text(chat, text, None).await
    }

    async fn on_text(&self, from: &Sender, chat: ChatId, text: &str) -> anyhow::Result<()> {
        if let Some((command, _args)) = parse_command(text) {
            return self.on_command(from, chat, command).await;
        }

        let armed = self.awaiting_broadcast.lock().remove(&from.id);
        if armed {
            return self.run_broadcast(chat, text).await;
        }

        match text.trim() {
            BTN_ASK => self.reply(chat, "请在下方直接输入你的问题。").await,
            BTN_PROMPT => self.prompt_menu(from.id, chat).await,
            BTN_AI => self.ai_menu(from.id, chat).await,
            BTN_STATS => {
                let stats = self.engine.stats_snapshot();
                self.reply(chat, &report::stats_text(&stats, false)).await
            }
            BTN_RESET => self.reset(from.id, chat).await,
            BTN_MY_REPORT => self.my_report(from.id, chat).await,
            _ => self.ask(from.id, chat, text).await,
        }
    }

    async fn on_command(&self, from: &Sender, chat: ChatId, command: &str) -> anyhow::Result<()> {
        tracing::debug!("Command /{} from {}", command, from.id);
        match command {
            "start" => {
                let name = if from.first_name.is_empty() {
                    "你好".to_string()
                } else {
                    format!("你好，{}", from.first_name)
                };
                let greeting = format!(
                    "{}！我是多模型 AI 助手。\n直接发送问题即可开始对话，发送图片可进行分析。\n使用下方菜单选择提示词或 AI 提供方。",
                    name
                );
                self.transport
                    .send_text(chat, &greeting, Some(&main_keyboard()))
                    .await
            }
            "menu" => {
                self.transport
                    .send_text(chat, "主菜单：", Some(&main_keyboard()))
                    .await
            }
            "help" => self.reply(chat, HELP_TEXT).await,
            "reset" => self.reset(from.id, chat).await,
            "prompt" => self.prompt_menu(from.id, chat).await,
            "ai" => self.ai_menu(from.id, chat).await,
            "myreport" => self.my_report(from.id, chat).await,
            "report" => {
                if !self.is_admin(from.id) {
                    return self.reply(chat, ACCESS_DENIED).await;
                }
                let body = report::admin_report(
                    &self.engine.stats_snapshot(),
                    self.engine.router().token_usage(),
                );
                self.transport
                    .send_document(chat, body.into_bytes(), report::ADMIN_REPORT_FILENAME)
                    .await
            }
            "reload_prompts" => {
                if !self.is_admin(from.id) {
                    return self.reply(chat, ACCESS_DENIED).await;
                }
                let (origin, count) = self.engine.reload_prompts();
                let mut text = format!("提示词已重新加载，共 {} 个。", count);
                if origin == CatalogOrigin::Default {
                    text.push_str("\n（提示词文件不可用，已使用默认提示词）");
                }
                self.reply(chat, &text).await
            }
            "admin" => {
                if !self.is_admin(from.id) {
                    return self.reply(chat, ACCESS_DENIED).await;
                }
                self.transport
                    .send_text(chat, "管理面板：", Some(&admin_panel()))
                    .await
            }
            "cancel" => {
                self.awaiting_broadcast.lock().remove(&from.id);
                self.reply(chat, "已取消。").await
            }
            _ => self.reply(chat, "未知命令，发送 /help 查看可用命令。").await,
        }
    }

    async fn ask(&self, user_id: UserId, chat: ChatId, text: &str) -> anyhow::Result<()> {
        match self.engine.handle_text(user_id, text).await {
            Ok(chunks) => {
                let save = save_answer_button();
                for (i, chunk) in chunks.iter().enumerate() {
                    let affordance = (i == 0).then_some(&save);
                    self.transport.send_text(chat, chunk, affordance).await?;
                }
                Ok(())
            }
            Err(e) => self.reply_error(chat, &e).await,
        }
    }

    async fn on_image(&self, user_id: UserId, chat: ChatId, bytes: &[u8]) -> anyhow::Result<()> {
        if bytes.is_empty() {
            return self.reply(chat, "未找到图片。").await;
        }
        match self.engine.handle_image(user_id, bytes).await {
            Ok(chunks) => {
                for chunk in &chunks {
                    self.reply(chat, chunk).await?;
                }
                Ok(())
            }
            Err(e) => self.reply_error(chat, &e).await,
        }
    }

    async fn reply_error(&self, chat: ChatId, err: &ChatError) -> anyhow::Result<()> {
        tracing::warn!("Request in chat {} failed: {}", chat, err);
        self.reply(chat, &err.user_message()).await
    }

    async fn reset(&self, user_id: UserId, chat: ChatId) -> anyhow::Result<()> {
        self.engine.reset(user_id).await;
        self.reply(chat, "对话上下文已清空。").await
    }

    async fn my_report(&self, user_id: UserId, chat: ChatId) -> anyhow::Result<()> {
        let stats = self.engine.stats_snapshot();
        let context = self.engine.context(user_id).await;
        let body = report::user_report(user_id, &stats, &context);
        self.transport
            .send_document(chat, body.into_bytes(), &report::user_report_filename(user_id))
            .await
    }

    async fn prompt_menu(&self, user_id: UserId, chat: ChatId) -> anyhow::Result<()> {
        let current = self
            .engine
            .selected_prompt(user_id)
            .await
            .unwrap_or_else(|| PromptDefinition::DEFAULT_ID.to_string());
        let set = self.engine.catalog().snapshot();
        let rows = set
            .prompts()
            .iter()
            .map(|p| {
                let mark = if p.id == current { "✅ " } else { "" };
                vec![Button::new(
                    format!("{}{}", mark, p.title),
                    format!("{}{}", CB_SET_PROMPT, p.id),
                )]
            })
            .collect();
        self.transport
            .send_text(chat, "请选择提示词：", Some(&Affordance::Inline(rows)))
            .await
    }

    async fn ai_menu(&self, user_id: UserId, chat: ChatId) -> anyhow::Result<()> {
        let current = self.engine.current_provider(user_id).await;
        let rows: Vec<Vec<Button>> = self
            .engine
            .router()
            .profiles()
            .filter(|p| p.available)
            .map(|p| {
                let mark = if p.id == current { "✅ " } else { "" };
                vec![Button::new(
                    format!("{}{}", mark, p.id.display_name()),
                    format!("{}{}", CB_SET_AI, p.id.as_str()),
                )]
            })
            .collect();
        if rows.is_empty() {
            return self.reply(chat, "当前没有可用的 AI 提供方。").await;
        }
        self.transport
            .send_text(chat, "请选择 AI 提供方：", Some(&Affordance::Inline(rows)))
            .await
    }

    async fn on_callback(&self, user_id: UserId, chat: ChatId, data: &str) -> anyhow::Result<()> {
        if let Some(prompt_id) = data.strip_prefix(CB_SET_PROMPT) {
            return match self.engine.set_prompt(user_id, prompt_id).await {
                Ok(prompt) => {
                    self.reply(chat, &format!("✅ 已选择提示词：{}", prompt.title))
                        .await
                }
                Err(e) => self.reply_error(chat, &e).await,
            };
        }

        if let Some(provider) = data.strip_prefix(CB_SET_AI) {
            return match self.engine.set_provider(user_id, provider).await {
                Ok(effective) => {
                    let requested = provider.parse::<ProviderId>().ok();
                    let text = match requested {
                        Some(id) if id != effective => format!(
                            "{} 未配置，已回退到 {}。",
                            id.display_name(),
                            effective.display_name()
                        ),
                        _ => format!("✅ 当前 AI 提供方：{}", effective.display_name()),
                    };
                    self.reply(chat, &text).await
                }
                Err(e) => self.reply_error(chat, &e).await,
            };
        }

        match data {
            CB_SAVE_ANSWER => match self.engine.last_answer(user_id).await {
                Some(answer) => {
                    self.transport
                        .send_document(chat, answer.into_bytes(), &report::answer_filename(user_id))
                        .await
                }
                None => self.reply(chat, "暂无可保存的回答。").await,
            },
            CB_VIEW_STATS => {
                if !self.is_admin(user_id) {
                    return self.reply(chat, ACCESS_DENIED).await;
                }
                let stats = self.engine.stats_snapshot();
                self.reply(chat, &report::stats_text(&stats, true)).await
            }
            CB_BROADCAST => {
                if !self.is_admin(user_id) {
                    return self.reply(chat, ACCESS_DENIED).await;
                }
                self.awaiting_broadcast.lock().insert(user_id);
                self.reply(chat, "请输入要广播的消息：").await
            }
            CB_CANCEL => {
                self.awaiting_broadcast.lock().remove(&user_id);
                self.reply(chat, "管理面板已关闭。").await
            }
            other => {
                tracing::warn!("Unknown callback data from {}: {}", user_id, other);
                Ok(())
            }
        }
    }

    async fn run_broadcast(&self, chat: ChatId, message: &str) -> anyhow::Result<()> {
        let report = self
            .engine
            .broadcast(self.transport.as_ref(), message)
            .await;
        let mut text = format!("广播已发送给 {} 位用户。", report.attempted);
        if !report.failed.is_empty() {
            text.push_str(&format!("其中 {} 位发送失败。", report.failed.len()));
        }
        self.reply(chat, &text).await
    }
}
