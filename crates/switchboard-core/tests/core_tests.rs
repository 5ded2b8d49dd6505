#[cfg(test)]
mod tests {
    // ── Errors ─────────────────────────────────────────────────

    mod error {
        use switchboard_core::SwitchboardError;

        #[test]
        fn test_transient_classification() {
            assert!(SwitchboardError::channel("telegram", "502 bad gateway").is_transient());
            assert!(SwitchboardError::ChannelNotConnected("push".into()).is_transient());
            assert!(SwitchboardError::Timeout(100).is_transient());
            assert!(
                SwitchboardError::Io(std::io::Error::other("connection reset")).is_transient()
            );
        }

        #[test]
        fn test_permanent_classification() {
            let rejected = SwitchboardError::DeliveryRejected {
                channel: "telegram".into(),
                reason: "chat not found".into(),
            };
            assert!(!rejected.is_transient());
            assert!(!SwitchboardError::UnknownChannel("irc".into()).is_transient());
            assert!(!SwitchboardError::InvalidRequest("empty".into()).is_transient());
        }

        #[test]
        fn test_display_messages() {
            let err = SwitchboardError::Health {
                module: "notes".into(),
                reason: "HTTP 500".into(),
            };
            assert_eq!(err.to_string(), "health check failed: notes: HTTP 500");
            assert_eq!(
                SwitchboardError::Timeout(250).to_string(),
                "operation timed out after 250ms"
            );
        }
    }

    // ── Types ──────────────────────────────────────────────────

    mod types {
        use switchboard_core::{ChannelContext, channel_key};

        #[test]
        fn test_channel_key_format() {
            assert_eq!(channel_key("telegram", "42"), "telegram:42");
            let ctx = ChannelContext {
                channel: "telegram".into(),
                sender_id: "42".into(),
                sender_name: "Ada".into(),
                chat_id: "-100".into(),
            };
            assert_eq!(ctx.channel_key(), "telegram:42");
        }

        #[test]
        fn test_context_serializes_camel_case() {
            let ctx = ChannelContext {
                channel: "push".into(),
                sender_id: "u1".into(),
                sender_name: "Bo".into(),
                chat_id: "c1".into(),
            };
            let json = serde_json::to_value(&ctx).unwrap();
            assert_eq!(json["senderId"], "u1");
            assert_eq!(json["chatId"], "c1");
        }
    }

    // ── Event bus ──────────────────────────────────────────────

    mod event {
        use switchboard_core::{EventBus, EventSink, GatewayEvent};

        #[test]
        fn test_event_tags() {
            let ev = GatewayEvent::ApprovalRequest {
                id: "a1".into(),
                tool_name: "shell".into(),
                args: serde_json::json!({"cmd": "ls"}),
                timeout: 5000,
            };
            let json = serde_json::to_value(&ev).unwrap();
            assert_eq!(json["type"], "approval:request");
            assert_eq!(json["toolName"], "shell");
            assert_eq!(json["timeout"], 5000);

            let ev = GatewayEvent::SessionSwitched {
                channel_key: "telegram:1".into(),
                session_id: "s1".into(),
            };
            let json = serde_json::to_value(&ev).unwrap();
            assert_eq!(json["type"], "session:switched");
            assert_eq!(json["channelKey"], "telegram:1");
        }

        #[tokio::test]
        async fn test_bus_fans_out_to_all_subscribers() {
            let bus = EventBus::new(16);
            let mut a = bus.subscribe();
            let mut b = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 2);

            bus.emit(GatewayEvent::Notice {
                message: "hello".into(),
            });

            for rx in [&mut a, &mut b] {
                match rx.recv().await.unwrap() {
                    GatewayEvent::Notice { message } => assert_eq!(message, "hello"),
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }

        #[test]
        fn test_publish_without_subscribers_is_silent() {
            let bus = EventBus::default();
            bus.publish(GatewayEvent::ModuleRecovered {
                module: "notes".into(),
            });
        }

        #[tokio::test]
        async fn test_unbounded_sender_is_a_sink() {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            tx.emit(GatewayEvent::Notice {
                message: "direct".into(),
            });
            assert!(matches!(rx.recv().await, Some(GatewayEvent::Notice { .. })));
        }
    }
}
