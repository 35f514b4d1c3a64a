//! BDD step definitions for the client builder and lifecycle feature

use std::sync::Arc;
use std::time::Duration;

use cucumber::{then, when};
use gatewatch::config::{BackendConfig, Config};
use gatewatch::io::HttpClient;
use gatewatch::push::PushChannel;
use gatewatch::store::CredentialStore;
use gatewatch::{Gatewatch, GatewatchBuilder};
use tokio_util::sync::CancellationToken;

use crate::world::{GatewatchWorld, BASE_URL};

fn build_gatewatch(world: &GatewatchWorld, cancel: Option<CancellationToken>) -> Gatewatch {
    let config = Config {
        backend: BackendConfig {
            base_url: format!("{}/", BASE_URL),
            ..BackendConfig::default()
        },
        ..Config::default()
    };

    let mut builder = GatewatchBuilder::new(config)
        .with_http_client(Arc::clone(&world.http) as Arc<dyn HttpClient>)
        .with_credential_store(Arc::clone(&world.store) as Arc<dyn CredentialStore>)
        .with_push_channel(Arc::clone(&world.push) as Arc<dyn PushChannel>);
    if let Some(cancel) = cancel {
        builder = builder.with_cancellation_token(cancel);
    }

    builder.build().expect("builder with injected collaborators")
}

// --- When steps ---

#[when("the client asks who is logged in")]
async fn client_whoami(world: &mut GatewatchWorld) {
    let gatewatch = build_gatewatch(world, None);
    world.last_result = Some(gatewatch.whoami().await.map(|user| user.fullname));
}

#[when("the client is cancelled while asking who is logged in")]
async fn client_whoami_cancelled(world: &mut GatewatchWorld) {
    let cancel = CancellationToken::new();
    let gatewatch = build_gatewatch(world, Some(cancel.clone()));

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), gatewatch.whoami())
        .await
        .expect("whoami did not stop after cancellation");
    stopper.await.unwrap();
    world.last_result = Some(result.map(|user| user.fullname));
}

#[when("the client watches the gate until cancelled")]
async fn client_watches(world: &mut GatewatchWorld) {
    let cancel = CancellationToken::new();
    let gatewatch = build_gatewatch(world, Some(cancel.clone()));

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), gatewatch.start())
        .await
        .expect("watch loop did not stop after cancellation");
    stopper.await.unwrap();
    world.last_result = Some(result.map(|()| "stopped".to_string()));
}

// --- Then steps ---

#[then(expr = "the client reports {string}")]
fn client_reports(world: &mut GatewatchWorld, expected: String) {
    match world.last_result.take() {
        Some(Ok(value)) => assert_eq!(value, expected),
        other => panic!("expected Ok({:?}), got {:?}", expected, other),
    }
}

#[then("the client reports that nobody is logged in")]
fn client_reports_not_authenticated(world: &mut GatewatchWorld) {
    match world.last_result.take() {
        Some(Err(gatewatch::GatewatchError::NotAuthenticated)) => {}
        other => panic!("expected NotAuthenticated, got {:?}", other),
    }
}

#[then("the client reports that it was cancelled")]
fn client_reports_cancelled(world: &mut GatewatchWorld) {
    match world.last_result.take() {
        Some(Err(gatewatch::GatewatchError::Cancelled)) => {}
        other => panic!("expected Cancelled, got {:?}", other),
    }
}

#[then(expr = "the backend saw a request to {string}")]
fn backend_saw_request(world: &mut GatewatchWorld, path: String) {
    let requests = world.http.requests_to(&path);
    assert!(!requests.is_empty(), "no request to {}", path);
    let expected = format!("{}{}", BASE_URL, path);
    assert!(requests.iter().all(|r| r.url == expected));
}
