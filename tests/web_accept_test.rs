//! Accept endpoint served over a real socket.

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use ride_dispatch::messaging::MessagingProvider;
use ride_dispatch::models::NewDriver;
use ride_dispatch::orchestration::AcceptanceGuard;
use ride_dispatch::registry::{DriverRegistry, InMemoryDriverRegistry};
use ride_dispatch::web::{self, AcceptResponse, AppState, HealthResponse};

const OPEN_QUEUE: &str = "open_ride_test";

struct TestServer {
    base_url: String,
    registry: Arc<InMemoryDriverRegistry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let registry = Arc::new(InMemoryDriverRegistry::new());
        let provider = Arc::new(MessagingProvider::new_in_memory());
        provider.ensure_queue(OPEN_QUEUE).await.unwrap();
        provider
            .send_raw(OPEN_QUEUE, br#"{"id":1}"#)
            .await
            .unwrap();
        let guard = Arc::new(AcceptanceGuard::new(registry.clone(), true));
        let state = AppState::new(guard, provider).with_queues(vec![OPEN_QUEUE.to_string()]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(web::serve(listener, state, async {
            let _ = shutdown_rx.await;
        }));

        Self {
            base_url: format!("http://{addr}"),
            registry,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    fn accept_url(&self, driver_id: i64, ride_id: i64) -> String {
        format!(
            "{}/v1/drivers/{driver_id}/rides/{ride_id}/accept",
            self.base_url
        )
    }

    async fn driver(&self, name: &str) -> i64 {
        self.registry
            .create_driver(NewDriver::new(name, format!("{name}@example.com"), "+7700000000"))
            .await
            .unwrap()
            .id
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_accept_then_conflict() {
    let server = TestServer::start().await;
    let client = Client::new();
    let first = server.driver("aida").await;
    let second = server.driver("berik").await;

    let response = client.post(server.accept_url(first, 42)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: AcceptResponse = response.json().await.unwrap();
    assert_eq!(body.driver_id, first);
    assert_eq!(body.ride_id, 42);
    assert_eq!(body.message, format!("Driver {first} accepted the ride 42"));

    let response = client.post(server.accept_url(second, 42)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "ALREADY_ACCEPTED");
    assert_eq!(body["error"]["message"], "Ride has been already accepted RideID=42");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_and_blocked_drivers() {
    let server = TestServer::start().await;
    let client = Client::new();

    let response = client.post(server.accept_url(404, 1)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "DRIVER_NOT_FOUND");

    let blocked = server.driver("blocked").await;
    server.registry.set_blocked(blocked, true).unwrap();
    let response = client.post(server.accept_url(blocked, 1)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert_eq!(server.registry.task_count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_store_failure_is_retryable() {
    let server = TestServer::start().await;
    let client = Client::new();
    let driver = server.driver("aida").await;
    server.registry.fail_task_creates(1);

    let response = client.post(server.accept_url(driver, 9)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["retry-after"], "1");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "ACCEPT_CONFLICT");

    let response = client.post(server.accept_url(driver, 9)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_non_numeric_ids_rejected() {
    let server = TestServer::start().await;
    let response = Client::new()
        .post(format!("{}/v1/drivers/abc/rides/1/accept", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    server.stop().await;
}

#[tokio::test]
async fn test_health_reports_backends() {
    let server = TestServer::start().await;
    let response = Client::new()
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthResponse = response.json().await.unwrap();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.queue_provider, "in_memory");
    assert_eq!(body.registry, "in_memory");
    assert!(body.dispatch.is_none());
    assert_eq!(body.queues.len(), 1);
    assert_eq!(body.queues[0].name, OPEN_QUEUE);
    assert_eq!(body.queues[0].message_count, 1);

    server.stop().await;
}
