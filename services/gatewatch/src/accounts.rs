//! Account management calls: login, logout and user administration

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::GatewatchError;
use crate::io::{HttpClient, HttpResponse};
use crate::model::{Credential, Identity};
use crate::store::CredentialStore;

/// Details for a new account
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub fullname: String,
    pub rfid: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    id: i64,
}

/// Common `{ success, message, data }` envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdData {
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UsersData {
    #[serde(default)]
    users: Vec<Identity>,
}

/// Thin client for the account endpoints
pub struct AccountsClient {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn CredentialStore>,
    backend: BackendConfig,
}

impl std::fmt::Debug for AccountsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountsClient")
            .field("base_url", &self.backend.base_url)
            .finish()
    }
}

/// Parse an envelope, turning non-2xx statuses into `Api` errors
fn parse<T: DeserializeOwned>(
    response: &HttpResponse,
    fallback: &str,
) -> crate::Result<Envelope<T>> {
    let envelope: Option<Envelope<T>> = serde_json::from_str(&response.body).ok();
    if !response.is_success() {
        let message = envelope
            .and_then(|e| e.message)
            .unwrap_or_else(|| fallback.to_string());
        return Err(GatewatchError::Api(message));
    }
    envelope.ok_or_else(|| GatewatchError::Api(fallback.to_string()))
}

impl AccountsClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn CredentialStore>,
        backend: BackendConfig,
    ) -> Self {
        Self {
            http,
            store,
            backend,
        }
    }

    fn bearer(&self) -> Option<String> {
        self.store.get().map(|c| c.token)
    }

    /// Exchange a username and password for a token and store it
    pub async fn login(&self, username: &str, password: &str) -> crate::Result<Credential> {
        let body = serde_json::to_string(&LoginRequest { username, password })?;
        let response = self
            .http
            .post_json(&self.backend.url("/login"), None, &body)
            .await?;

        let envelope: Envelope<TokenData> = parse(&response, "Login failed")?;
        let token = envelope
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| GatewatchError::Api("Token not found".to_string()))?;

        let credential = Credential::new(token);
        self.store.set(&credential)?;
        tracing::info!("Logged in as '{}'", username);
        Ok(credential)
    }

    /// Forget the token and identity mirror
    pub fn logout(&self) -> crate::Result<()> {
        self.store.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub async fn list_users(&self) -> crate::Result<Vec<Identity>> {
        let token = self.bearer();
        let response = self
            .http
            .get(&self.backend.url("/users"), token.as_deref())
            .await?;

        let envelope: Envelope<UsersData> = parse(&response, "Failed to list users")?;
        if envelope.success != Some(true) {
            return Err(GatewatchError::Api("Failed to list users".to_string()));
        }
        Ok(envelope.data.map(|d| d.users).unwrap_or_default())
    }

    /// Create an account, returning its id
    pub async fn register(&self, user: &NewUser) -> crate::Result<i64> {
        let token = self.bearer();
        let body = serde_json::to_string(user)?;
        let response = self
            .http
            .post_json(&self.backend.url("/register"), token.as_deref(), &body)
            .await?;

        let envelope: Envelope<IdData> = parse(&response, "Failed to create user")?;
        let id = envelope
            .data
            .and_then(|d| d.id)
            .ok_or_else(|| GatewatchError::Api("Failed to create user".to_string()))?;
        tracing::info!("Created user '{}' with id {}", user.username, id);
        Ok(id)
    }

    /// Delete an account, returning the id the backend removed
    pub async fn delete_user(&self, id: i64) -> crate::Result<i64> {
        let token = self.bearer();
        let body = serde_json::to_string(&DeleteRequest { id })?;
        let response = self
            .http
            .post_json(&self.backend.url("/delete"), token.as_deref(), &body)
            .await?;

        let envelope: Envelope<IdData> = parse(&response, "Failed to delete user")?;
        let deleted = envelope
            .data
            .and_then(|d| d.id)
            .ok_or_else(|| GatewatchError::Api("Failed to delete user".to_string()))?;
        tracing::info!("Deleted user {}", deleted);
        Ok(deleted)
    }
}
