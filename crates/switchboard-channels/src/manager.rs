use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchboard_config::SwitchboardConfig;
use switchboard_core::{EventSink, GatewayEvent, Result, SessionId, SwitchboardError};
use switchboard_dispatch::{DispatchRequest, Dispatcher, SessionLocks};

use crate::adapter::*;
use crate::format::format_reply;
use crate::queue::{OutboundQueue, OutboundSettings, QueueStats};

/// Sent when a turn produced no text at all.
const EMPTY_REPLY: &str = "(no response)";

/// Owns the channel adapters and bridges their conversations to the dispatcher.
///
/// Each sender gets one executor session, tracked under
/// `"<channel>:<senderId>"`. Turns for the same sender are serialised;
/// different senders run concurrently.
pub struct ChannelManager {
    adapters: AdapterSet,
    enabled: Mutex<HashMap<String, bool>>,
    dispatcher: Dispatcher,
    queue: OutboundQueue,
    sessions: Mutex<HashMap<String, SessionId>>,
    locks: SessionLocks,
    sink: Arc<dyn EventSink>,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

impl ChannelManager {
    pub fn new(dispatcher: Dispatcher, settings: OutboundSettings, sink: Arc<dyn EventSink>) -> Self {
        let adapters: AdapterSet = Default::default();
        let queue = OutboundQueue::new(settings, Arc::clone(&adapters), Arc::clone(&sink));
        Self {
            adapters,
            enabled: Mutex::new(HashMap::new()),
            dispatcher,
            queue,
            sessions: Mutex::new(HashMap::new()),
            locks: SessionLocks::new(),
            sink,
            tasks: Mutex::new(JoinSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Build every `[channels.*]` adapter. A broken channel section is
    /// logged and skipped; the rest still load.
    pub fn from_config(
        config: &SwitchboardConfig,
        dispatcher: Dispatcher,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let manager = Self::new(
            dispatcher,
            OutboundSettings::from_config(&config.outbound),
            sink,
        );
        for (id, section) in &config.channels {
            match build_adapter(id, section) {
                Ok(adapter) => manager.register(adapter, section.enabled),
                Err(e) => error!(channel = %id, error = %e, "skipping channel"),
            }
        }
        manager
    }

    /// Add an adapter. Disabled adapters are listed in `status()` but never started.
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>, enabled: bool) {
        let id = adapter.id().to_string();
        self.enabled.lock().insert(id.clone(), enabled);
        self.adapters.write().insert(id, adapter);
    }

    pub fn adapter(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().get(id).cloned()
    }

    fn is_enabled(&self, id: &str) -> bool {
        self.enabled.lock().get(id).copied().unwrap_or(false)
    }

    /// Start every enabled adapter and the delivery workers, then give each
    /// adapter one chance to replay what it missed.
    pub async fn start(self: &Arc<Self>) {
        let adapters: Vec<_> = self.adapters.read().values().cloned().collect();
        let mut started = Vec::new();

        for adapter in adapters {
            let id = adapter.id().to_string();
            if !self.is_enabled(&id) {
                debug!(channel = %id, "channel disabled, not starting");
                continue;
            }
            match adapter.start().await {
                Ok(events) => {
                    info!(channel = %id, kind = adapter.channel_type(), "channel started");
                    self.spawn_pump(id, events);
                    started.push(adapter);
                }
                Err(e) => error!(channel = %id, error = %e, "failed to start channel"),
            }
        }

        self.queue.start();

        // Only after every adapter is up; replay failures never block startup.
        for adapter in started {
            let id = adapter.id().to_string();
            self.tasks.lock().spawn(async move {
                match adapter.replay().await {
                    Ok(0) => {}
                    Ok(n) => info!(channel = %id, recovered = n, "replay finished"),
                    Err(e) => warn!(channel = %id, error = %e, "replay failed"),
                }
            });
        }
    }

    fn spawn_pump(self: &Arc<Self>, id: String, mut events: mpsc::Receiver<ChannelEvent>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        self.tasks.lock().spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(ChannelEvent::Message(message)) => {
                        let manager = Arc::clone(&manager);
                        tokio::spawn(async move { manager.handle_inbound(message).await });
                    }
                    Some(ChannelEvent::Connected) => info!(channel = %id, "channel connected"),
                    Some(ChannelEvent::Disconnected(reason)) => {
                        warn!(channel = %id, reason = reason.as_deref().unwrap_or("-"), "channel disconnected")
                    }
                    None => break,
                }
            }
            debug!(channel = %id, "inbound pump stopped");
        });
    }

    /// Run one inbound message through the dispatcher and queue the reply.
    pub async fn handle_inbound(&self, message: ChannelMessage) {
        let text = message.text.trim();
        if text.is_empty() {
            return;
        }
        let key = message.channel_key();
        let turn = self.locks.acquire(&key).await;
        self.run_turn(&message, key, text).await;
        drop(turn);
        self.locks.prune().await;
    }

    /// Number of per-conversation locks currently held in the table.
    pub async fn session_lock_count(&self) -> usize {
        self.locks.len().await
    }

    async fn run_turn(&self, message: &ChannelMessage, key: String, text: &str) {
        if text == "/new" || text.starts_with("/new@") {
            self.sessions.lock().remove(&key);
            info!(%key, "session reset by sender");
            self.reply(message, "New session started.");
            return;
        }

        let resumed = self.sessions.lock().get(&key).cloned();
        self.sink.emit(GatewayEvent::TaskCreated {
            source: message.source.clone(),
            summary: summarize(text),
        });
        debug!(%key, session = resumed.as_deref().unwrap_or("new"), "dispatching channel message");

        let request = DispatchRequest::new(text)
            .with_session(resumed.clone())
            .with_context(message.context());

        match self.dispatcher.dispatch(request, |_| {}).await {
            Ok(outcome) => {
                if let Some(session_id) = outcome.session_id
                    && resumed.as_ref() != Some(&session_id)
                {
                    self.sessions.lock().insert(key.clone(), session_id.clone());
                    self.sink.emit(GatewayEvent::SessionSwitched {
                        channel_key: key.clone(),
                        session_id,
                    });
                }
                self.reply(message, &outcome.text);
            }
            Err(e) => {
                warn!(%key, error = %e, "dispatch failed for channel message");
                if resumed.is_some() {
                    // The stored session may be gone on the executor side.
                    self.sessions.lock().remove(&key);
                }
                self.reply(message, &format!("Sorry, something went wrong: {e}"));
            }
        }
    }

    fn reply(&self, message: &ChannelMessage, text: &str) {
        if let Err(e) = self.send(&message.source, &message.chat_id, text) {
            warn!(channel = %message.source, error = %e, "could not queue reply");
        }
    }

    /// Format `text` for the channel and queue every chunk.
    /// Returns the number of chunks queued.
    pub fn send(&self, channel_id: &str, chat_id: &str, text: &str) -> Result<usize> {
        let adapter = self
            .adapter(channel_id)
            .ok_or_else(|| SwitchboardError::UnknownChannel(channel_id.to_string()))?;

        let mut chunks = format_reply(adapter.channel_type(), text);
        if chunks.is_empty() {
            chunks.push(EMPTY_REPLY.to_string());
        }
        for chunk in &chunks {
            self.queue.enqueue(channel_id, chat_id, chunk);
        }
        Ok(chunks.len())
    }

    /// Per-channel snapshot, sorted by id.
    pub fn status(&self) -> Vec<ChannelStatus> {
        let adapters = self.adapters.read();
        let mut out: Vec<_> = adapters
            .values()
            .map(|a| ChannelStatus {
                id: a.id().to_string(),
                channel_type: a.channel_type().to_string(),
                enabled: self.is_enabled(a.id()),
                connected: a.is_connected(),
                inbound: a.receives(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn session_for(&self, channel_key: &str) -> Option<SessionId> {
        self.sessions.lock().get(channel_key).cloned()
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stop adapters, pumps and delivery workers.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let adapters: Vec<_> = self.adapters.read().values().cloned().collect();
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                warn!(channel = %adapter.id(), error = %e, "error stopping channel");
            }
        }
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.queue.shutdown().await;
        info!("channel manager stopped");
    }
}

fn summarize(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}…")
    }
}
