//! Gatewatch - gate monitor client
//!
//! Validates the stored session against the backend and keeps a live view of
//! gate sensor events, merging the REST history snapshot with pushed updates.

pub mod accounts;
pub mod config;
pub mod error;
pub mod feed;
pub mod io;
pub mod model;
pub mod push;
pub mod session;
pub mod store;

pub use config::{load_config, Config};
pub use error::{GatewatchError, Result, SessionError};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::accounts::AccountsClient;
use crate::feed::{FeedState, SensorFeedSync};
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::model::Identity;
use crate::push::{PushChannel, SsePushChannel};
use crate::session::{Landing, SessionValidator};
use crate::store::{CredentialStore, FileCredentialStore};

/// Assembles a [`Gatewatch`], letting tests swap any collaborator
pub struct GatewatchBuilder {
    config: Config,
    http: Option<Arc<dyn HttpClient>>,
    store: Option<Arc<dyn CredentialStore>>,
    push: Option<Arc<dyn PushChannel>>,
    cancel: Option<CancellationToken>,
}

impl GatewatchBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: None,
            store: None,
            push: None,
            cancel: None,
        }
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_push_channel(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Gatewatch> {
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::new(self.config.backend.request_timeout)?),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileCredentialStore::new(self.config.store.path.clone())),
        };
        let push: Arc<dyn PushChannel> = match self.push {
            Some(push) => push,
            None => Arc::new(SsePushChannel::new(
                self.config.backend.url(&self.config.push.path),
                Arc::clone(&store),
                self.config.backend.request_timeout,
                self.config.push.reconnect_delay,
            )?),
        };

        Ok(Gatewatch {
            config: self.config,
            http,
            store,
            push,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// A wired-up client
pub struct Gatewatch {
    config: Config,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn CredentialStore>,
    push: Arc<dyn PushChannel>,
    cancel: CancellationToken,
}

impl Gatewatch {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session_validator(&self) -> SessionValidator {
        SessionValidator::new(
            Arc::clone(&self.http),
            Arc::clone(&self.store),
            self.config.backend.url("/me"),
        )
        .with_timeout(self.config.session.validation_timeout)
    }

    pub fn feed_sync(&self) -> SensorFeedSync {
        SensorFeedSync::new(
            Arc::clone(&self.http),
            Arc::clone(&self.store),
            Arc::clone(&self.push),
            self.config.backend.url("/sensor"),
            self.config.push.event.clone(),
        )
    }

    pub fn accounts(&self) -> AccountsClient {
        AccountsClient::new(
            Arc::clone(&self.http),
            Arc::clone(&self.store),
            self.config.backend.clone(),
        )
    }

    /// Validate the stored session and return who it belongs to
    pub async fn whoami(&self) -> Result<Identity> {
        let validator = self.session_validator();
        validator.activate();

        let state = tokio::select! {
            state = validator.resolved() => state,
            _ = self.cancel.cancelled() => {
                validator.deactivate();
                return Err(GatewatchError::Cancelled);
            }
        };

        match Landing::for_session(&state) {
            Landing::Dashboard => state.user.ok_or(GatewatchError::NotAuthenticated),
            _ => Err(GatewatchError::NotAuthenticated),
        }
    }

    /// Gate the dashboard on a valid session, then follow the sensor feed
    /// until cancelled
    pub async fn start(&self) -> Result<()> {
        let user = match self.whoami().await {
            Ok(user) => user,
            Err(GatewatchError::Cancelled) => {
                tracing::info!("Cancelled before the session was validated");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        tracing::info!("Watching gate as {} [{}]", user.fullname, user.rfid);

        let feed = self.feed_sync();
        let mut updates = feed.subscribe();
        feed.activate();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = updates.borrow_and_update().clone();
                    report(&state);
                }
            }
        }

        feed.deactivate();
        tracing::info!("Stopped watching gate");
        Ok(())
    }
}

fn report(state: &FeedState) {
    match &state.current {
        Some(event) => tracing::info!(
            "Gate {} at {} by {} [{}] ({} events)",
            event.status,
            event.created_at,
            event.user.fullname,
            event.user.rfid,
            state.history.len()
        ),
        None => tracing::info!("No gate events available"),
    }
}
