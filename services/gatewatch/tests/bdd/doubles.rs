//! Test doubles shared by the step definitions

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gatewatch::io::{HttpClient, HttpResponse};
use gatewatch::GatewatchError;
use tokio::sync::Notify;

/// A recorded HTTP request
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<String>,
}

/// A canned reply, optionally held back until released
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub status: u16,
    pub body: String,
    pub gate: Option<Arc<Notify>>,
}

impl ScriptedReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            gate: None,
        }
    }

    pub fn held(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Counts request futures dropped before their reply was delivered
struct AbandonGuard {
    abandoned: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// HTTP client that answers from per-path reply queues and records every
/// request. Paths with no queued reply answer 404.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    abandoned: Arc<AtomicUsize>,
}

impl ScriptedHttpClient {
    pub fn enqueue(&self, path: &str, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .cloned()
            .collect()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    async fn answer(
        &self,
        method: &str,
        url: &str,
        bearer: Option<&str>,
        body: Option<&str>,
    ) -> gatewatch::Result<HttpResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            bearer: bearer.map(str::to_string),
            body: body.map(str::to_string),
        });

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .iter_mut()
                .find(|(path, _)| url.ends_with(path.as_str()))
                .and_then(|(_, queue)| queue.pop_front())
        };
        let Some(reply) = reply else {
            return Ok(HttpResponse {
                status: 404,
                body: String::new(),
            });
        };

        if let Some(gate) = &reply.gate {
            let mut guard = AbandonGuard {
                abandoned: Arc::clone(&self.abandoned),
                armed: true,
            };
            gate.notified().await;
            guard.armed = false;
        }

        if reply.status == 0 {
            return Err(GatewatchError::Http("connection refused".to_string()));
        }
        Ok(HttpResponse {
            status: reply.status,
            body: reply.body,
        })
    }
}

#[async_trait::async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn get(&self, url: &str, bearer: Option<&str>) -> gatewatch::Result<HttpResponse> {
        self.answer("GET", url, bearer, None).await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &str,
    ) -> gatewatch::Result<HttpResponse> {
        self.answer("POST", url, bearer, Some(body)).await
    }
}
