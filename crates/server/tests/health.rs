use std::collections::HashMap;
use std::sync::Arc;

use herald_infra::config::Config;
use herald_infra::db::InMemoryMessageRepository;
use herald_infra::jobs::{InMemoryJobStore, JobQueue, QueueConfig};
use herald_infra::templates::InMemoryTemplateStore;
use herald_server::app::{build_app, AppState};
use herald_server::bootstrap::build_strategies;

fn config() -> Config {
    let vars: HashMap<String, String> = [
        ("DATABASE_URL", "postgres://localhost/herald"),
        ("UAA_HOST", "http://127.0.0.1:9"),
        ("UAA_CLIENT_ID", "notifications"),
        ("UAA_CLIENT_SECRET", "secret"),
        ("CC_HOST", "http://127.0.0.1:9"),
        ("SMTP_HOST", "smtp.example.com"),
        ("SENDER", "no-reply@example.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_map(&vars).unwrap()
}

fn state(queue: JobQueue) -> AppState {
    let strategies = build_strategies(
        &config(),
        Arc::new(InMemoryTemplateStore::new()),
        InMemoryMessageRepository::arc(),
        queue.clone(),
    );
    AppState {
        queue,
        strategies: Arc::new(strategies),
    }
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(queue: JobQueue) -> Self {
        let app = build_app(state(queue));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_reports_queue_length() {
    let queue = JobQueue::new(Arc::new(InMemoryJobStore::new()), QueueConfig::default());
    queue.enqueue(&serde_json::json!({ "n": 1 })).await.unwrap();
    queue.enqueue(&serde_json::json!({ "n": 2 })).await.unwrap();

    let server = TestServer::spawn(queue).await;
    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue_length"], 2);
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let queue = JobQueue::new(Arc::new(InMemoryJobStore::new()), QueueConfig::default());
    let server = TestServer::spawn(queue).await;

    let response = reqwest::get(format!("{}/notifications", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
