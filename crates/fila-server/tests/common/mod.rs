#![allow(dead_code)]

use std::sync::Arc;

use fila_db::Database;
use fila_server::config::Config;
use fila_server::push::LogPushTransport;
use fila_server::{Opts, Server};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret";

/// A test server on a random port with ephemeral storage.
pub struct TestServer {
    base_url: String,
    _temp_dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Config::new(TEST_SECRET)).await
    }

    pub async fn start_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Arc::new(
            Database::open(temp_dir.path().join("db.redb"))
                .await
                .expect("Failed to open database"),
        );

        let server = Server::init(
            Opts::new("127.0.0.1:0".to_string(), false),
            config,
            db,
            Arc::new(LogPushTransport),
        )
        .await
        .expect("Failed to start test server");

        let base_url = format!("http://{}", server.addr().expect("Listener has an address"));
        tokio::spawn(server.run());

        Self {
            base_url,
            _temp_dir: temp_dir,
        }
    }

    pub fn driver(&self) -> Driver {
        Driver {
            client: reqwest::Client::new(),
            base_url: self.base_url.clone(),
        }
    }
}

/// Thin request helper; host auth goes through the `x-host-auth` header.
pub struct Driver {
    client: reqwest::Client,
    base_url: String,
}

impl Driver {
    pub async fn post_json(
        &self,
        path: &str,
        host_token: Option<&str>,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(token) = host_token {
            request = request.header("x-host-auth", token);
        }
        request.send().await.expect("Request failed")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get_with_etag(&self, path: &str, etag: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("if-none-match", etag)
            .send()
            .await
            .expect("Request failed")
    }
}

/// Create a session and return (code, host token).
pub async fn create_session(driver: &Driver, max_guests: u32) -> (String, String) {
    let resp = driver
        .post_json(
            "/api/queue/create",
            None,
            &serde_json::json!({
                "eventName": "Integration test",
                "maxGuests": max_guests,
            }),
        )
        .await;
    assert_eq!(resp.status(), 200, "Create should succeed");
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["code"].as_str().unwrap().to_string(),
        body["hostAuthToken"].as_str().unwrap().to_string(),
    )
}

/// Join a session and return the party id.
pub async fn join(driver: &Driver, code: &str, name: &str, size: u32) -> String {
    let resp = driver
        .post_json(
            &format!("/api/queue/{code}/join"),
            None,
            &serde_json::json!({"name": name, "size": size}),
        )
        .await;
    assert_eq!(resp.status(), 200, "Join should succeed");
    let body: serde_json::Value = resp.json().await.unwrap();
    body["partyId"].as_str().unwrap().to_string()
}
