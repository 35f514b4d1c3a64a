//! Sensor feed: merges the REST snapshot and the push stream into one view
//!
//! Both sources carry the full history, and both replace the projection
//! wholesale. Whichever update is processed last wins, even if it is
//! chronologically older than what it replaces.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::io::HttpClient;
use crate::model::SensorEvent;
use crate::push::PushChannel;
use crate::store::CredentialStore;

/// "Current + history" projection consumed by the display layer.
///
/// `history` is sorted newest first and `current` is its head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    pub current: Option<SensorEvent>,
    pub history: Vec<SensorEvent>,
}

impl FeedState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the projection from an unordered full history
    pub fn from_events(mut events: Vec<SensorEvent>) -> Self {
        // Stable, so events sharing a timestamp keep their received order
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            current: events.first().cloned(),
            history: events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// `GET /sensor` response body
#[derive(Debug, Deserialize)]
struct SensorResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<SensorEvent>>,
}

struct FeedInner {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn CredentialStore>,
    push: Arc<dyn PushChannel>,
    sensor_url: String,
    event: String,
    state: watch::Sender<FeedState>,
}

impl FeedInner {
    fn replace(&self, events: Vec<SensorEvent>) {
        let next = FeedState::from_events(events);
        tracing::debug!(
            "Feed replaced: {} events, current={:?}",
            next.history.len(),
            next.current.as_ref().map(|e| e.id)
        );
        self.state.send_replace(next);
    }

    async fn fetch_snapshot(&self) {
        let token = self.store.get().map(|c| c.token);
        match self.request_snapshot(token.as_deref()).await {
            Ok(events) => self.replace(events),
            Err(e) => {
                tracing::warn!("Sensor snapshot failed: {}", e);
                self.state.send_replace(FeedState::empty());
            }
        }
    }

    async fn request_snapshot(&self, token: Option<&str>) -> crate::Result<Vec<SensorEvent>> {
        let response = self.http.get(&self.sensor_url, token).await?;
        if !response.is_success() {
            return Err(crate::GatewatchError::Api(format!(
                "GET {} -> {}",
                self.sensor_url, response.status
            )));
        }

        let parsed: SensorResponse = serde_json::from_str(&response.body)?;
        match parsed {
            SensorResponse {
                success: true,
                data: Some(events),
            } => Ok(events),
            _ => Err(crate::GatewatchError::Api(
                "snapshot payload not successful".to_string(),
            )),
        }
    }

    fn apply_push_payload(&self, payload: &str) {
        match serde_json::from_str::<Vec<SensorEvent>>(payload) {
            Ok(events) => self.replace(events),
            Err(e) => tracing::warn!("Ignoring malformed '{}' push payload: {}", self.event, e),
        }
    }

    async fn pump_push(&self) {
        let mut subscription = match self.push.subscribe(&self.event).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!("Push subscription to '{}' failed: {}", self.event, e);
                return;
            }
        };
        tracing::debug!("Subscribed to '{}' push messages", self.event);

        while let Some(payload) = subscription.next().await {
            self.apply_push_payload(&payload);
        }
        tracing::debug!("Push channel for '{}' closed", self.event);
    }
}

#[derive(Debug, Default)]
struct Activation {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Keeps a [`FeedState`] in sync with the backend for one consumer
pub struct SensorFeedSync {
    inner: Arc<FeedInner>,
    activation: Mutex<Activation>,
}

impl std::fmt::Debug for SensorFeedSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorFeedSync")
            .field("sensor_url", &self.inner.sensor_url)
            .field("event", &self.inner.event)
            .finish()
    }
}

impl SensorFeedSync {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn CredentialStore>,
        push: Arc<dyn PushChannel>,
        sensor_url: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(FeedState::empty());
        Self {
            inner: Arc::new(FeedInner {
                http,
                store,
                push,
                sensor_url: sensor_url.into(),
                event: event.into(),
                state,
            }),
            activation: Mutex::new(Activation::default()),
        }
    }

    fn activation(&self) -> MutexGuard<'_, Activation> {
        self.activation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    /// Fetch the full history and replace the projection with it.
    ///
    /// Failures empty the feed and are logged, never returned.
    pub async fn fetch_snapshot(&self) {
        self.inner.fetch_snapshot().await;
    }

    /// Replace the projection with a pushed full history
    pub fn on_push_message(&self, events: Vec<SensorEvent>) {
        self.inner.replace(events);
    }

    /// Subscribe to the push channel and fetch one snapshot, concurrently.
    ///
    /// Any previous activation is torn down first. Must be called from
    /// within a tokio runtime.
    pub fn activate(&self) {
        let mut activation = self.activation();
        teardown(&mut activation);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!("Feed sync deactivated");
                }
                _ = async { tokio::join!(inner.fetch_snapshot(), inner.pump_push()) } => {}
            }
        });

        activation.cancel = Some(cancel);
        activation.handle = Some(handle);
    }

    /// Drop the push subscription and any in-flight snapshot request
    pub fn deactivate(&self) {
        teardown(&mut self.activation());
    }

    pub fn is_active(&self) -> bool {
        self.activation()
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn teardown(activation: &mut Activation) {
    if let Some(cancel) = activation.cancel.take() {
        cancel.cancel();
    }
    if let Some(handle) = activation.handle.take() {
        handle.abort();
    }
}

impl Drop for SensorFeedSync {
    fn drop(&mut self) {
        teardown(&mut self.activation());
    }
}
