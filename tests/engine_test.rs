//! 对话引擎与机器人集成测试（Mock 提供方 + 记录型传输）

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chatgate::bot::Bot;
    use chatgate::core::{ChatEngine, ChatError, EngineSettings};
    use chatgate::integrations::{
        Affordance, ChatId, InboundEvent, Sender, Transport, UserLanes,
    };
    use chatgate::llm::{MockLlmClient, ProviderId, ProviderProfile, ProviderRouter};
    use chatgate::memory::Message;
    use chatgate::prompts::{CatalogOrigin, PromptCatalog, PromptDefinition};
    use parking_lot::Mutex;

    /// 记录所有出站消息；可指定发送失败的会话
    #[derive(Default)]
    struct RecordingTransport {
        texts: Mutex<Vec<(ChatId, String)>>,
        failing: HashSet<ChatId>,
    }

    impl RecordingTransport {
        fn failing(chats: impl IntoIterator<Item = ChatId>) -> Self {
            Self {
                failing: chats.into_iter().collect(),
                ..Self::default()
            }
        }

        fn texts_for(&self, chat: ChatId) -> Vec<String> {
            self.texts
                .lock()
                .iter()
                .filter(|(c, _)| *c == chat)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(
            &self,
            chat: ChatId,
            text: &str,
            _affordance: Option<&Affordance>,
        ) -> anyhow::Result<()> {
            if self.failing.contains(&chat) {
                anyhow::bail!("Forbidden: bot was blocked by the user");
            }
            self.texts.lock().push((chat, text.to_string()));
            Ok(())
        }

        async fn send_document(&self, _chat: ChatId, _bytes: Vec<u8>, _filename: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn router_with(primary: Option<Arc<MockLlmClient>>, secondary: Option<Arc<MockLlmClient>>) -> ProviderRouter {
        let mut router = ProviderRouter::new(
            ProviderProfile::new(ProviderId::Primary, "gpt-4-turbo").with_vision("gpt-4-vision-preview"),
            ProviderProfile::new(ProviderId::Secondary, "deepseek-chat"),
        );
        if let Some(client) = primary {
            router.register(ProviderId::Primary, client);
        }
        if let Some(client) = secondary {
            router.register(ProviderId::Secondary, client);
        }
        router
    }

    fn engine(router: ProviderRouter) -> ChatEngine {
        ChatEngine::new(
            EngineSettings::default(),
            PromptCatalog::new(None, PromptDefinition::fallback("You are helpful.")),
            router,
        )
    }

    fn text(user: i64, body: &str) -> InboundEvent {
        InboundEvent::Text {
            from: Sender {
                id: user,
                first_name: format!("user{}", user),
            },
            chat: user,
            text: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_requests_share_one_call() {
        let mock = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(mock.clone()), None));

        let a = engine.handle_text(1, "What is Rust?").await.unwrap();
        let b = engine.handle_text(2, "What is Rust?").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(mock.calls(), 1);
        assert_eq!(engine.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_different_context_is_a_cache_miss() {
        let mock = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(mock.clone()), None));

        engine.handle_text(1, "hello").await.unwrap();
        engine.handle_text(1, "hello").await.unwrap();
        assert_eq!(mock.calls(), 2);
        assert_eq!(engine.context(1).await.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_user_turns_stay_ordered() {
        let mock = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(20)));
        let engine = Arc::new(engine(router_with(Some(mock), None)));
        let transport = Arc::new(RecordingTransport::default());
        let bot = Arc::new(Bot::new(engine.clone(), transport.clone(), Vec::new()));

        let lanes = {
            let bot = Arc::clone(&bot);
            UserLanes::new(Duration::from_secs(5), move |event: InboundEvent| {
                let bot = Arc::clone(&bot);
                async move { bot.handle(event).await }
            })
        };

        // 同一批次内连发，中间不留间隔
        for user in 1..=50 {
            lanes.dispatch(user, text(user, "u1"));
            lanes.dispatch(user, text(user, "u2"));
        }

        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                let mut done = true;
                for user in 1..=50 {
                    if transport.texts_for(user).len() < 2 {
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

        for user in 1..=50 {
            let ctx: Vec<String> = engine.context(user).await.into_iter().map(|m| m.content).collect();
            assert_eq!(
                ctx,
                vec!["u1", "[gpt-4-turbo] u1", "u2", "[gpt-4-turbo] u2"],
                "user {} saw turns out of order",
                user
            );
            assert_eq!(transport.texts_for(user), vec!["[gpt-4-turbo] u1", "[gpt-4-turbo] u2"]);
        }
    }

    #[tokio::test]
    async fn test_window_keeps_last_turns() {
        let mock = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(mock), None));

        for i in 0..4 {
            engine.handle_text(1, &format!("q{}", i)).await.unwrap();
        }
        let ctx = engine.context(1).await;
        assert_eq!(ctx.len(), engine.settings().history_length);
        assert_eq!(ctx.last(), Some(&Message::assistant("[gpt-4-turbo] q3")));
    }

    #[tokio::test]
    async fn test_unavailable_selection_falls_back_to_primary() {
        let primary = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(primary.clone()), None));

        let effective = engine.set_provider(1, "SECONDARY").await.unwrap();
        assert_eq!(effective, ProviderId::Primary);

        let chunks = engine.handle_text(1, "hi").await.unwrap();
        assert_eq!(chunks, vec!["[gpt-4-turbo] hi"]);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_secondary_provider_is_used_when_selected() {
        let primary = Arc::new(MockLlmClient::new());
        let secondary = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(primary.clone()), Some(secondary.clone())));

        engine.set_provider(1, "deep_seek").await.unwrap();
        let chunks = engine.handle_text(1, "hi").await.unwrap();
        assert_eq!(chunks, vec!["[deepseek-chat] hi"]);
        assert_eq!(primary.calls(), 0);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_vision_requires_capable_provider() {
        let primary = Arc::new(MockLlmClient::new());
        let secondary = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(primary.clone()), Some(secondary.clone())));

        let chunks = engine.handle_image(1, &[1, 2, 3]).await.unwrap();
        assert!(chunks[0].starts_with("[gpt-4-vision-preview +3b]"));
        // 图片回答不进入窗口，也不缓存
        assert!(engine.context(1).await.is_empty());
        assert!(engine.cache().is_empty());

        engine.set_provider(1, "SECONDARY").await.unwrap();
        let err = engine.handle_image(1, &[1, 2, 3]).await.unwrap_err();
        assert_eq!(
            err,
            ChatError::CapabilityUnsupported {
                provider: ProviderId::Secondary,
                capability: "image"
            }
        );
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_region_block_is_classified() {
        let mock = Arc::new(MockLlmClient::failing(
            "Error code: 403 - {'error': {'code': 'unsupported_country_region_territory'}}",
        ));
        let engine = engine(router_with(Some(mock), None));

        let err = engine.handle_text(1, "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::RegionBlocked(_)));
    }

    #[tokio::test]
    async fn test_admin_broadcast_isolates_failures() {
        let mock = Arc::new(MockLlmClient::new());
        let engine = Arc::new(engine(router_with(Some(mock), None)));
        for user in [1, 2, 3] {
            engine.handle_text(user, "hi").await.unwrap();
        }

        let transport = Arc::new(RecordingTransport::failing([2]));
        let bot = Bot::new(engine.clone(), transport.clone(), [1]);

        bot.handle(InboundEvent::Callback {
            from: Sender {
                id: 1,
                first_name: "admin".into(),
            },
            chat: 1,
            data: "broadcast".into(),
        })
        .await;
        bot.handle(text(1, "maintenance tonight")).await;

        let broadcast = format!("{}maintenance tonight", engine.settings().broadcast_prefix);
        assert!(transport.texts_for(1).contains(&broadcast));
        assert!(transport.texts_for(3).contains(&broadcast));
        assert!(transport.texts_for(2).is_empty());
        assert_eq!(
            transport.texts_for(1).last().map(String::as_str),
            Some("广播已发送给 3 位用户。其中 1 位发送失败。")
        );
    }

    #[tokio::test]
    async fn test_broadcast_report_counts_attempts() {
        let mock = Arc::new(MockLlmClient::new());
        let engine = engine(router_with(Some(mock), None));
        for user in [1, 2, 3] {
            engine.handle_text(user, "hi").await.unwrap();
        }

        let transport = RecordingTransport::failing([2]);
        let report = engine.broadcast(&transport, "hello").await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, vec![2]);
        assert_eq!(report.delivered(), 2);
    }

    #[tokio::test]
    async fn test_malformed_prompt_reload_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"Linux": "You are a Linux expert.", "Poet": "Write verse."}"#).unwrap();

        let catalog = PromptCatalog::new(Some(path.clone()), PromptDefinition::fallback("default"));
        let engine = ChatEngine::new(
            EngineSettings::default(),
            catalog,
            router_with(Some(Arc::new(MockLlmClient::new())), None),
        );
        assert_eq!(engine.catalog().snapshot().len(), 2);
        engine.set_prompt(1, "p1").await.unwrap();

        std::fs::write(&path, "{ this is not json").unwrap();
        let (origin, count) = engine.reload_prompts();
        assert_eq!(origin, CatalogOrigin::Default);
        assert_eq!(count, 1);

        // 旧选择失效后回退到默认提示词
        assert!(matches!(
            engine.set_prompt(1, "p1").await,
            Err(ChatError::PromptNotFound(_))
        ));
        engine.handle_text(1, "still works").await.unwrap();
    }
}
