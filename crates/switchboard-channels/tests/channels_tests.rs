#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use switchboard_channels::*;
    use switchboard_core::{GatewayEvent, Result, SwitchboardError};

    /// Adapter double: answers `send` from a script, records every attempt.
    struct FakeAdapter {
        id: String,
        kind: String,
        script: Mutex<VecDeque<Result<()>>>,
        fallback: fn(&str) -> Result<()>,
        sent: Mutex<Vec<(String, String)>>,
        cap: Option<u32>,
        delay: Duration,
    }

    impl FakeAdapter {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                kind: "webchat".into(),
                script: Mutex::new(VecDeque::new()),
                fallback: |_| Ok(()),
                sent: Mutex::new(Vec::new()),
                cap: None,
                delay: Duration::ZERO,
            }
        }

        fn then(self, result: Result<()>) -> Self {
            self.script.lock().push_back(result);
            self
        }

        fn always(mut self, f: fn(&str) -> Result<()>) -> Self {
            self.fallback = f;
            self
        }

        fn with_cap(mut self, cap: u32) -> Self {
            self.cap = Some(cap);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn attempts(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ChannelAdapter for FakeAdapter {
        fn id(&self) -> &str {
            &self.id
        }
        fn channel_type(&self) -> &str {
            &self.kind
        }
        async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.sent.lock().push((chat_id.to_string(), text.to_string()));
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| (self.fallback)(&self.id))
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn max_delivery_attempts(&self) -> Option<u32> {
            self.cap
        }
    }

    fn transient(id: &str) -> SwitchboardError {
        SwitchboardError::channel(id, "HTTP 502: bad gateway")
    }

    fn fast_settings() -> OutboundSettings {
        OutboundSettings {
            capacity: 100,
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            workers: 2,
        }
    }

    fn adapter_set(adapters: &[Arc<FakeAdapter>]) -> AdapterSet {
        let set: AdapterSet = Default::default();
        for a in adapters {
            let adapter: Arc<dyn ChannelAdapter> = a.clone();
            set.write().insert(a.id().to_string(), adapter);
        }
        set
    }

    async fn idle(queue: &OutboundQueue) {
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("queue never drained");
    }

    // ── Outbound queue ─────────────────────────────────────────

    mod queue {
        use super::*;

        #[tokio::test]
        async fn test_full_queue_evicts_oldest() {
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let settings = OutboundSettings {
                capacity: 2,
                ..fast_settings()
            };
            let queue = OutboundQueue::new(settings, adapter_set(&[]), Arc::new(tx));

            assert!(queue.enqueue("web", "1", "first"));
            assert!(queue.enqueue("web", "1", "second"));
            assert!(!queue.enqueue("web", "1", "third"));

            let stats = queue.stats();
            assert_eq!(queue.len(), 2);
            assert_eq!(stats.enqueued, 3);
            assert_eq!(stats.evicted, 1);
            assert_eq!(stats.pending, 2);
        }

        #[tokio::test]
        async fn test_transient_failures_are_retried_until_success() {
            let adapter = Arc::new(
                FakeAdapter::new("web")
                    .then(Err(transient("web")))
                    .then(Err(transient("web")))
                    .then(Ok(())),
            );
            let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let queue = OutboundQueue::new(
                fast_settings(),
                adapter_set(&[adapter.clone()]),
                Arc::new(tx),
            );
            queue.start();
            queue.enqueue("web", "chat-1", "hello");
            idle(&queue).await;

            assert_eq!(adapter.attempts().len(), 3);
            let stats = queue.stats();
            assert_eq!(stats.delivered, 1);
            assert_eq!(stats.retried, 2);
            assert_eq!(stats.dropped, 0);
            assert!(rx.try_recv().is_err());
            queue.shutdown().await;
        }

        #[tokio::test]
        async fn test_permanent_failure_drops_and_broadcasts() {
            let adapter = Arc::new(FakeAdapter::new("web").always(|id| {
                Err(SwitchboardError::DeliveryRejected {
                    channel: id.to_string(),
                    reason: "chat not found".into(),
                })
            }));
            let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let queue = OutboundQueue::new(
                fast_settings(),
                adapter_set(&[adapter.clone()]),
                Arc::new(tx),
            );
            queue.start();
            queue.enqueue("web", "chat-9", "hello");
            idle(&queue).await;

            assert_eq!(adapter.attempts().len(), 1);
            assert_eq!(queue.stats().dropped, 1);
            match rx.recv().await.unwrap() {
                GatewayEvent::ChannelError {
                    channel_id,
                    chat_id,
                    error,
                } => {
                    assert_eq!(channel_id, "web");
                    assert_eq!(chat_id, "chat-9");
                    assert!(error.contains("chat not found"));
                }
                other => panic!("unexpected event: {other:?}"),
            }
            queue.shutdown().await;
        }

        #[tokio::test]
        async fn test_adapter_attempt_cap_is_honoured() {
            let adapter = Arc::new(
                FakeAdapter::new("web")
                    .always(|id| Err(SwitchboardError::channel(id, "timeout")))
                    .with_cap(3),
            );
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let queue = OutboundQueue::new(
                fast_settings(),
                adapter_set(&[adapter.clone()]),
                Arc::new(tx),
            );
            queue.start();
            queue.enqueue("web", "1", "never arrives");
            idle(&queue).await;

            assert_eq!(adapter.attempts().len(), 3);
            let stats = queue.stats();
            assert_eq!(stats.retried, 2);
            assert_eq!(stats.dropped, 1);
            queue.shutdown().await;
        }

        #[tokio::test]
        async fn test_unknown_channel_is_dropped() {
            let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let queue = OutboundQueue::new(fast_settings(), adapter_set(&[]), Arc::new(tx));
            queue.start();
            queue.enqueue("nowhere", "1", "hi");
            idle(&queue).await;

            assert_eq!(queue.stats().dropped, 1);
            assert!(matches!(
                rx.recv().await,
                Some(GatewayEvent::ChannelError { .. })
            ));
            queue.shutdown().await;
        }

        #[tokio::test]
        async fn test_chunks_for_one_chat_stay_in_order() {
            let adapter = Arc::new(
                FakeAdapter::new("web")
                    .then(Err(transient("web")))
                    .with_delay(Duration::from_millis(5)),
            );
            let other = Arc::new(FakeAdapter::new("other"));
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let settings = OutboundSettings {
                workers: 4,
                ..fast_settings()
            };
            let queue = OutboundQueue::new(
                settings,
                adapter_set(&[adapter.clone(), other.clone()]),
                Arc::new(tx),
            );
            queue.start();
            for part in ["a1", "a2", "a3"] {
                queue.enqueue("web", "a", part);
            }
            queue.enqueue("other", "b", "b1");
            idle(&queue).await;

            let delivered_a: Vec<_> = adapter
                .attempts()
                .into_iter()
                .filter(|(chat, _)| chat == "a")
                .map(|(_, text)| text)
                .collect();
            assert_eq!(other.attempts().len(), 1);
            // First attempt of a1 failed and was retried before a2 went out.
            assert_eq!(delivered_a, vec!["a1", "a1", "a2", "a3"]);
            assert_eq!(queue.stats().delivered, 4);
            queue.shutdown().await;
        }
    }

    // ── Channel manager ────────────────────────────────────────

    mod manager {
        use super::*;
        use switchboard_channels::webchat::{WebChatAdapter, WebChatReply};
        use switchboard_dispatch::mock::ScriptedExecutor;
        use switchboard_dispatch::{DispatchEvent, Dispatcher};

        fn message(sender: &str, text: &str) -> ChannelMessage {
            ChannelMessage {
                source: "web".into(),
                sender_id: sender.into(),
                sender_name: "Ada".into(),
                chat_id: format!("chat-{sender}"),
                text: text.into(),
            }
        }

        async fn setup(
            executor: ScriptedExecutor,
        ) -> (
            Arc<ChannelManager>,
            Arc<WebChatAdapter>,
            mpsc::UnboundedReceiver<GatewayEvent>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let manager = Arc::new(ChannelManager::new(
                Dispatcher::new(Arc::new(executor)),
                fast_settings(),
                Arc::new(tx),
            ));
            let web = Arc::new(WebChatAdapter::new("web"));
            manager.register(web.clone(), true);
            manager.start().await;
            (manager, web, rx)
        }

        async fn next_reply(replies: &mut tokio::sync::broadcast::Receiver<WebChatReply>) -> WebChatReply {
            tokio::time::timeout(Duration::from_secs(5), replies.recv())
                .await
                .expect("no reply")
                .unwrap()
        }

        #[tokio::test]
        async fn test_sender_keeps_its_session() {
            let executor = ScriptedExecutor::new()
                .with_reply("s-1", "hi there")
                .with_resumed_reply("welcome back");
            let (manager, web, mut events) = setup(executor.clone()).await;
            let mut replies = web.subscribe();

            manager.handle_inbound(message("u1", "hello")).await;
            manager.handle_inbound(message("u1", "again")).await;

            let requests = executor.requests();
            assert_eq!(requests[0].session_id, None);
            assert_eq!(requests[1].session_id.as_deref(), Some("s-1"));
            assert_eq!(requests[1].context.as_ref().unwrap().chat_id, "chat-u1");
            assert_eq!(manager.session_for("web:u1").as_deref(), Some("s-1"));

            let first = next_reply(&mut replies).await;
            assert_eq!(first.chat_id, "chat-u1");
            assert_eq!(first.text, "hi there");
            assert_eq!(next_reply(&mut replies).await.text, "welcome back");

            assert!(matches!(events.recv().await, Some(GatewayEvent::TaskCreated { source, .. }) if source == "web"));
            assert_eq!(
                events.recv().await,
                Some(GatewayEvent::SessionSwitched {
                    channel_key: "web:u1".into(),
                    session_id: "s-1".into(),
                })
            );
            // Resuming the same session does not announce a switch.
            assert!(matches!(events.recv().await, Some(GatewayEvent::TaskCreated { .. })));
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_idle_session_locks_are_dropped() {
            let (manager, _web, _events) = setup(ScriptedExecutor::new()).await;

            for i in 0..20 {
                manager.handle_inbound(message(&format!("u{i}"), "hello")).await;
            }
            assert_eq!(manager.session_lock_count().await, 0);
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_inbound_via_adapter_is_dispatched() {
            let executor = ScriptedExecutor::new().with_reply("s-9", "pong");
            let (manager, web, _events) = setup(executor.clone()).await;
            let mut replies = web.subscribe();

            web.inject(message("u2", "ping")).await.unwrap();

            let reply = next_reply(&mut replies).await;
            assert_eq!(reply.text, "pong");
            assert_eq!(executor.requests()[0].text, "ping");
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_dispatch_failure_replies_with_error() {
            let executor = ScriptedExecutor::new().with_failure("executor offline");
            let (manager, web, _events) = setup(executor).await;
            let mut replies = web.subscribe();

            manager.handle_inbound(message("u1", "hello")).await;

            let reply = next_reply(&mut replies).await;
            assert!(reply.text.contains("something went wrong"));
            assert!(reply.text.contains("executor offline"));
            assert!(manager.session_for("web:u1").is_none());
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_failed_resume_forgets_session() {
            let executor = ScriptedExecutor::new()
                .with_reply("s-1", "hi")
                .with_events(vec![DispatchEvent::Error {
                    message: "unknown session s-1".into(),
                }])
                .with_reply("s-2", "fresh start");
            let (manager, _web, _events) = setup(executor.clone()).await;

            manager.handle_inbound(message("u1", "one")).await;
            assert_eq!(manager.session_for("web:u1").as_deref(), Some("s-1"));

            manager.handle_inbound(message("u1", "two")).await;
            assert!(manager.session_for("web:u1").is_none());

            manager.handle_inbound(message("u1", "three")).await;
            assert_eq!(executor.requests()[2].session_id, None);
            assert_eq!(manager.session_for("web:u1").as_deref(), Some("s-2"));
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_new_command_resets_session() {
            let executor = ScriptedExecutor::new().with_reply("s-1", "hi");
            let (manager, web, _events) = setup(executor.clone()).await;
            let mut replies = web.subscribe();

            manager.handle_inbound(message("u1", "hello")).await;
            manager.handle_inbound(message("u1", "/new")).await;

            assert!(manager.session_for("web:u1").is_none());
            assert_eq!(executor.request_count(), 1);
            next_reply(&mut replies).await;
            assert_eq!(next_reply(&mut replies).await.text, "New session started.");
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_blank_message_is_ignored() {
            let executor = ScriptedExecutor::new();
            let (manager, _web, _events) = setup(executor.clone()).await;
            manager.handle_inbound(message("u1", "   ")).await;
            assert_eq!(executor.request_count(), 0);
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_send_to_unknown_channel_fails() {
            let (manager, _web, _events) = setup(ScriptedExecutor::new()).await;
            let err = manager.send("nope", "1", "hello").unwrap_err();
            assert!(matches!(err, SwitchboardError::UnknownChannel(_)));
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_send_splits_long_telegram_replies() {
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let manager = ChannelManager::new(
                Dispatcher::new(Arc::new(ScriptedExecutor::new())),
                fast_settings(),
                Arc::new(tx),
            );
            let tg = switchboard_channels::telegram::TelegramAdapter::new("tg", "TOKEN");
            manager.register(Arc::new(tg), true);

            let queued = manager.send("tg", "42", &"word ".repeat(1500)).unwrap();
            assert_eq!(queued, 2);
            assert_eq!(manager.queue().len(), 2);
            assert_eq!(manager.send("tg", "42", "   ").unwrap(), 1);
        }

        #[tokio::test]
        async fn test_status_lists_every_channel() {
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let manager = Arc::new(ChannelManager::new(
                Dispatcher::new(Arc::new(ScriptedExecutor::new())),
                fast_settings(),
                Arc::new(tx),
            ));
            manager.register(Arc::new(WebChatAdapter::new("web")), true);
            manager.register(
                Arc::new(switchboard_channels::push::PushAdapter::new(
                    "alerts",
                    "http://127.0.0.1:1",
                    "me",
                )),
                false,
            );
            manager.start().await;

            let status = manager.status();
            let ids: Vec<_> = status.iter().map(|s| s.id.as_str()).collect();
            assert_eq!(ids, vec!["alerts", "web"]);
            assert!(!status[0].enabled);
            assert!(!status[0].connected);
            assert!(!status[0].inbound);
            assert!(status[1].enabled && status[1].connected && status[1].inbound);
            manager.stop().await;
        }

        #[tokio::test]
        async fn test_from_config_skips_broken_channels() {
            let config: switchboard_config::SwitchboardConfig = toml::from_str(
                r#"
                [channels.web]
                type = "webchat"

                [channels.tg]
                type = "telegram"

                [channels.alerts]
                type = "push"
                url = "https://ntfy.example.com"
                enabled = false
                "#,
            )
            .unwrap();
            let (tx, _rx) = mpsc::unbounded_channel::<GatewayEvent>();
            let manager = ChannelManager::from_config(
                &config,
                Dispatcher::new(Arc::new(ScriptedExecutor::new())),
                Arc::new(tx),
            );
            let ids: Vec<_> = manager.status().into_iter().map(|s| s.id).collect();
            assert_eq!(ids, vec!["alerts", "web"]);
        }
    }

    // ── Adapters ───────────────────────────────────────────────

    mod adapters {
        use super::*;
        use axum::extract::{Path, Query, State};
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use std::collections::HashMap;
        use switchboard_channels::push::PushAdapter;
        use switchboard_channels::telegram::TelegramAdapter;
        use switchboard_channels::webchat::WebChatAdapter;

        async fn serve(app: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}")
        }

        #[derive(Clone, Default)]
        struct Bot {
            sent: Arc<Mutex<Vec<serde_json::Value>>>,
        }

        async fn get_updates(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            let offset: i64 = q.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
            let result = if offset <= 500 {
                serde_json::json!([{
                    "update_id": 500,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 7, "first_name": "Ada"},
                        "chat": {"id": 7},
                        "text": "missed while offline"
                    }
                }])
            } else {
                // Keep the poll loop from spinning.
                tokio::time::sleep(Duration::from_millis(50)).await;
                serde_json::json!([])
            };
            Json(serde_json::json!({"ok": true, "result": result}))
        }

        async fn send_message(
            State(bot): State<Bot>,
            Json(body): Json<serde_json::Value>,
        ) -> (StatusCode, Json<serde_json::Value>) {
            bot.sent.lock().push(body.clone());
            match body["chat_id"].as_str() {
                Some("blocked") => (
                    StatusCode::FORBIDDEN,
                    Json(serde_json::json!({"ok": false, "description": "Forbidden: bot was blocked by the user"})),
                ),
                Some("busy") => (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({"ok": false, "description": "Too Many Requests: retry after 1"})),
                ),
                _ => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
            }
        }

        async fn telegram_server(bot: Bot) -> String {
            let app = Router::new()
                .route("/botTEST/getUpdates", get(get_updates))
                .route("/botTEST/sendMessage", post(send_message))
                .with_state(bot);
            serve(app).await
        }

        #[tokio::test]
        async fn test_telegram_polls_and_replays_once() {
            let base = telegram_server(Bot::default()).await;
            let adapter = TelegramAdapter::new("telegram", "TEST")
                .with_api_base(&base)
                .with_poll_timeout(0);

            let err = adapter.replay().await.unwrap_err();
            assert!(matches!(err, SwitchboardError::ChannelNotConnected(_)));

            let mut events = adapter.start().await.unwrap();
            let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            match first {
                ChannelEvent::Message(msg) => {
                    assert_eq!(msg.text, "missed while offline");
                    assert_eq!(msg.channel_key(), "telegram:7");
                }
                other => panic!("unexpected event: {other:?}"),
            }

            // Offset already advanced; nothing is delivered twice.
            assert_eq!(adapter.replay().await.unwrap(), 0);
            assert!(adapter.is_connected());
            adapter.stop().await.unwrap();
            assert!(!adapter.is_connected());
        }

        #[tokio::test]
        async fn test_telegram_send_classifies_errors() {
            let bot = Bot::default();
            let base = telegram_server(bot.clone()).await;
            let adapter = TelegramAdapter::new("telegram", "TEST").with_api_base(&base);

            adapter.send("42", "hello").await.unwrap();
            assert_eq!(bot.sent.lock()[0]["text"], "hello");

            let blocked = adapter.send("blocked", "hello").await.unwrap_err();
            assert!(!blocked.is_transient());
            assert!(blocked.to_string().contains("blocked by the user"));

            let busy = adapter.send("busy", "hello").await.unwrap_err();
            assert!(busy.is_transient());
        }

        #[tokio::test]
        async fn test_push_posts_to_topic() {
            type Seen = Arc<Mutex<Vec<(String, Option<String>, String)>>>;
            async fn publish(
                State(seen): State<Seen>,
                Path(topic): Path<String>,
                headers: HeaderMap,
                body: String,
            ) -> StatusCode {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                seen.lock().push((topic.clone(), auth, body));
                if topic == "gone" {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::OK
                }
            }
            let seen: Seen = Default::default();
            let base = serve(Router::new().route("/{topic}", post(publish)).with_state(seen.clone())).await;
            let adapter = PushAdapter::new("alerts", &base, "default-topic").with_token("secret");

            adapter.send("", "disk almost full").await.unwrap();
            adapter.send("ops", "backup done").await.unwrap();
            let err = adapter.send("gone", "x").await.unwrap_err();
            assert!(!err.is_transient());

            let seen = seen.lock().clone();
            assert_eq!(seen[0].0, "default-topic");
            assert_eq!(seen[0].1.as_deref(), Some("Bearer secret"));
            assert_eq!(seen[0].2, "disk almost full");
            assert_eq!(seen[1].0, "ops");
            assert!(!adapter.receives());
        }

        #[tokio::test]
        async fn test_push_unreachable_is_transient() {
            let adapter = PushAdapter::new("alerts", "http://127.0.0.1:1", "t");
            let err = adapter.send("", "hi").await.unwrap_err();
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn test_webchat_inject_and_subscribe() {
            let web = WebChatAdapter::new("web");
            let msg = ChannelMessage {
                source: "web".into(),
                sender_id: "u1".into(),
                sender_name: "Ada".into(),
                chat_id: "c1".into(),
                text: "hi".into(),
            };
            assert!(web.inject(msg.clone()).await.is_err());
            assert!(web.send("c1", "nobody listening").await.is_err());

            let mut inbound = web.start().await.unwrap();
            web.inject(msg.clone()).await.unwrap();
            match inbound.recv().await.unwrap() {
                ChannelEvent::Message(m) => assert_eq!(m, msg),
                other => panic!("unexpected event: {other:?}"),
            }

            let mut replies = web.subscribe();
            web.send("c1", "hello back").await.unwrap();
            let reply = replies.recv().await.unwrap();
            assert_eq!(reply.chat_id, "c1");
            assert_eq!(reply.text, "hello back");
        }
    }
}
