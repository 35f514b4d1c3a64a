//! Push channel: server-sent full-history payloads
//!
//! A [`PushSubscription`] is owned by whoever subscribed. Dropping it tears
//! the underlying connection down; nothing outlives its consumer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::store::CredentialStore;

const SUBSCRIPTION_BUFFER: usize = 16;

/// Owned handle on a stream of raw JSON payloads for one event name
#[derive(Debug)]
pub struct PushSubscription {
    receiver: mpsc::Receiver<String>,
    _teardown: Option<DropGuard>,
}

impl PushSubscription {
    /// Wrap a receiver; `teardown` is cancelled when the subscription drops
    pub fn new(receiver: mpsc::Receiver<String>, teardown: CancellationToken) -> Self {
        Self {
            receiver,
            _teardown: Some(teardown.drop_guard()),
        }
    }

    pub fn from_receiver(receiver: mpsc::Receiver<String>) -> Self {
        Self {
            receiver,
            _teardown: None,
        }
    }

    /// Next payload, or `None` once the channel has closed
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Source of push messages
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Start receiving payloads published under `event`
    async fn subscribe(&self, event: &str) -> crate::Result<PushSubscription>;
}

/// In-process channel. Publishers push straight to live subscribers.
#[derive(Debug, Default)]
pub struct LocalPushChannel {
    subscribers: Mutex<Vec<(String, mpsc::Sender<String>)>>,
}

impl LocalPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(String, mpsc::Sender<String>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver a payload to every live subscriber of `event`.
    ///
    /// Returns how many subscribers accepted it.
    pub async fn publish(&self, event: &str, payload: &str) -> usize {
        let targets: Vec<mpsc::Sender<String>> = {
            let mut subscribers = self.subscribers();
            subscribers.retain(|(_, tx)| !tx.is_closed());
            subscribers
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(payload.to_string()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Live subscribers of `event`
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers()
            .iter()
            .filter(|(name, tx)| name == event && !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    async fn subscribe(&self, event: &str) -> crate::Result<PushSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers().push((event.to_string(), tx));
        Ok(PushSubscription::from_receiver(rx))
    }
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Accepts arbitrary chunk boundaries; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.strip_suffix('\r').unwrap_or(line.as_ref());
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Push channel over a bearer-authenticated `text/event-stream` endpoint.
///
/// Reconnects after `reconnect_delay` whenever the stream ends, for as long
/// as the subscription is held.
pub struct SsePushChannel {
    client: reqwest::Client,
    url: String,
    store: Arc<dyn CredentialStore>,
    reconnect_delay: Duration,
}

impl std::fmt::Debug for SsePushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsePushChannel")
            .field("url", &self.url)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl SsePushChannel {
    pub fn new(
        url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        connect_timeout: Duration,
        reconnect_delay: Duration,
    ) -> crate::Result<Self> {
        // No overall timeout: the body is an endless stream
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| crate::GatewatchError::Http(format!("Building push client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            store,
            reconnect_delay,
        })
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn subscribe(&self, event: &str) -> crate::Result<PushSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let teardown = CancellationToken::new();

        let worker = StreamWorker {
            client: self.client.clone(),
            url: self.url.clone(),
            store: Arc::clone(&self.store),
            event: event.to_string(),
            reconnect_delay: self.reconnect_delay,
            tx,
        };
        let cancel = teardown.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Push subscription to '{}' dropped", event);
                }
                _ = worker.run() => {}
            }
        });

        Ok(PushSubscription::new(rx, teardown))
    }
}

struct StreamWorker {
    client: reqwest::Client,
    url: String,
    store: Arc<dyn CredentialStore>,
    event: String,
    reconnect_delay: Duration,
    tx: mpsc::Sender<String>,
}

impl StreamWorker {
    async fn run(&self) {
        loop {
            match self.stream_once().await {
                Ok(()) => tracing::debug!("Push stream {} ended", self.url),
                Err(e) => tracing::warn!("Push stream {} failed: {}", self.url, e),
            }
            if self.tx.is_closed() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn stream_once(&self) -> crate::Result<()> {
        tracing::debug!("Connecting push stream {}", self.url);
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(credential) = self.store.get() {
            request = request.bearer_auth(credential.token);
        }

        let response = request.send().await.map_err(|e| {
            crate::GatewatchError::Http(format!("GET {} failed: {}", self.url, e))
        })?;
        if !response.status().is_success() {
            return Err(crate::GatewatchError::Http(format!(
                "GET {} -> {}",
                self.url,
                response.status().as_u16()
            )));
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                crate::GatewatchError::Http(format!("Reading push stream: {}", e))
            })?;
            for frame in decoder.feed(&chunk) {
                if frame.event != self.event {
                    continue;
                }
                if self.tx.send(frame.data).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
