//! Shared harness: boots the control plane on an ephemeral port with a
//! fast outbox worker and a temp database.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mission_store::OutboxWorker;
use serve::{claims_for, router, AppState};
use tokio::net::TcpListener;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    _worker: tokio::task::JoinHandle<()>,
    _server: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn token(&self, subject: i64, admin: bool) -> String {
        self.state.codec.encode(&claims_for(subject, admin, 3600))
    }

    pub fn expired_token(&self, subject: i64) -> String {
        self.state.codec.encode(&claims_for(subject, false, -60))
    }
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with_agents(helm::agents::AgentSet::baseline()).await
}

/// Boots the server with a scripted agent roster; for steering the
/// cognitive loop into specific terminal outcomes.
pub async fn spawn_server_with_agents(agents: helm::agents::AgentSet) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = config::Settings::for_tests();
    settings.database_path = dir
        .path()
        .join("helm.db")
        .to_string_lossy()
        .into_owned();

    let state = AppState::build_with_agents(settings, agents).expect("state builds");
    // Fast drain so live WS frames arrive promptly in tests.
    let worker = OutboxWorker::new(
        Arc::clone(&state.store),
        Arc::clone(&state.bus),
        Duration::from_millis(25),
        10,
        5,
    )
    .spawn();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = router(Arc::clone(&state));
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        addr,
        state,
        _worker: worker,
        _server: server,
        _dir: dir,
    }
}

/// Polls the mission until its API status leaves pending/running.
pub async fn wait_terminal(server: &TestServer, client: &reqwest::Client, id: i64) -> serde_json::Value {
    for _ in 0..900 {
        let body: serde_json::Value = client
            .get(server.http(&format!("/missions/{id}")))
            .send()
            .await
            .expect("get mission")
            .json()
            .await
            .expect("mission json");
        let status = body["status"].as_str().unwrap_or("");
        if status != "pending" && status != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("mission {id} never reached a terminal status");
}
