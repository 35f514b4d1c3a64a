//! BDD test world for gatewatch

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use cucumber::World;
use gatewatch::feed::SensorFeedSync;
use gatewatch::model::{GateStatus, Identity, SensorEvent};
use gatewatch::push::LocalPushChannel;
use gatewatch::session::{SessionState, SessionValidator};
use gatewatch::store::MemoryCredentialStore;
use tokio::sync::Notify;

use crate::doubles::ScriptedHttpClient;

pub const BASE_URL: &str = "http://gate.test";
pub const ME_URL: &str = "http://gate.test/me";
pub const SENSOR_URL: &str = "http://gate.test/sensor";
pub const SENSOR_EVENT: &str = "sensor";

#[derive(Default, World)]
pub struct GatewatchWorld {
    pub store: Arc<MemoryCredentialStore>,
    pub http: Arc<ScriptedHttpClient>,
    pub push: Arc<LocalPushChannel>,
    pub gate: Option<Arc<Notify>>,

    // Session validation
    pub validator: Option<SessionValidator>,

    // Feed sync
    pub feed: Option<SensorFeedSync>,
    pub history: Vec<SensorEvent>,

    // Builder and accounts
    pub last_result: Option<gatewatch::Result<String>>,
}

impl fmt::Debug for GatewatchWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewatchWorld")
            .field("store", &self.store)
            .field("session", &self.validator.as_ref().map(|v| v.state()))
            .field("feed", &self.feed.as_ref().map(|f| f.state()))
            .field("last_result", &self.last_result)
            .finish()
    }
}

impl GatewatchWorld {
    pub fn validator(&mut self) -> &SessionValidator {
        let http = Arc::clone(&self.http);
        let store = Arc::clone(&self.store);
        self.validator
            .get_or_insert_with(|| SessionValidator::new(http, store, ME_URL.to_string()))
    }

    pub fn feed(&mut self) -> &SensorFeedSync {
        let http = Arc::clone(&self.http);
        let store = Arc::clone(&self.store);
        let push = Arc::clone(&self.push);
        self.feed.get_or_insert_with(|| {
            SensorFeedSync::new(
                http,
                store,
                push,
                SENSOR_URL.to_string(),
                SENSOR_EVENT.to_string(),
            )
        })
    }

    pub fn session_state(&self) -> SessionState {
        self.validator
            .as_ref()
            .map(|v| v.state())
            .unwrap_or_default()
    }

    /// Wait for the current validation attempt, failing the step if it hangs
    pub async fn await_session(&mut self) -> SessionState {
        let validator = self.validator();
        tokio::time::timeout(Duration::from_secs(2), validator.resolved())
            .await
            .expect("validation did not resolve")
    }
}

pub fn identity(id: i64, fullname: &str, rfid: &str) -> Identity {
    Identity {
        id,
        username: fullname.to_lowercase(),
        fullname: fullname.to_string(),
        rfid: rfid.to_string(),
    }
}

pub fn parse_status(s: &str) -> GateStatus {
    match s {
        "Terbuka" | "Open" => GateStatus::Open,
        "Tertutup" | "Closed" => GateStatus::Closed,
        other => panic!("Unknown gate status: {}", other),
    }
}

fn at_minute(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn sensor_event(id: i64, status: &str, minute: i64) -> SensorEvent {
    SensorEvent {
        id,
        status: parse_status(status),
        created_at: at_minute(minute),
        user: identity(1, "Admin", "R1"),
    }
}

pub fn parse_ids(ids: &str) -> Vec<i64> {
    if ids.trim().is_empty() {
        return Vec::new();
    }
    ids.split(',')
        .map(|id| id.trim().parse().expect("numeric id"))
        .collect()
}
