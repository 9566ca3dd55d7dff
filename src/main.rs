//! Chatgate - 多模型对话网关
//!
//! 入口：初始化日志、加载配置与凭据、构建引擎，并以 Telegram 长轮询运行直到 Ctrl+C。

use std::sync::Arc;

use anyhow::Context;
use chatgate::bot::Bot;
use chatgate::config::{load_config, Secrets};
use chatgate::core::ChatEngine;
use chatgate::integrations::{run_polling, TelegramClient, Transport};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatgate::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let secrets = Secrets::load(&cfg.app.secrets_dir);

    let token = secrets
        .telegram_token
        .clone()
        .context("Telegram bot token not found (telegram_token file or TELEGRAM_BOT_TOKEN)")?;

    let engine = Arc::new(ChatEngine::from_config(&cfg, &secrets));
    if !engine.router().any_available() {
        anyhow::bail!("No LLM provider configured: set OPENAI_API_KEY or DEEPSEEK_API_KEY");
    }
    for profile in engine.router().profiles() {
        tracing::info!(
            "Provider {} ({}): {}",
            profile.id,
            profile.chat_model,
            if profile.available { "available" } else { "not configured" }
        );
    }

    let client = Arc::new(
        TelegramClient::new(&cfg.telegram.api_base, &token, cfg.telegram.poll_timeout_secs)
            .context("Failed to create Telegram client")?,
    );
    let transport: Arc<dyn Transport> = client.clone();
    let bot = Arc::new(Bot::new(engine, transport, cfg.app.admin_ids.iter().copied()));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl+C received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    tracing::info!("{} started", cfg.app.name.as_deref().unwrap_or("chatgate"));
    run_polling(client, bot, shutdown).await;
    Ok(())
}
