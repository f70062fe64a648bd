//! Common test utilities for in-process API testing.
//!
//! [`TestFixture`] wires a real orchestrator to a [`ScriptedRunner`] so that
//! job lifecycles run end-to-end without yt-dlp or ffmpeg installed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use mediagrab_core::{
    testing::ScriptedRunner, CommandRunner, Config, InMemoryJobRegistry, Job, JobOrchestrator,
    JobRegistry, PacingConfig,
};
use mediagrab_server::{create_router, AppState};

/// A URL accepted by the default pattern.
pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Test fixture for API testing with a scripted engine.
pub struct TestFixture {
    pub router: Router,
    pub runner: Arc<ScriptedRunner>,
    pub orchestrator: Arc<JobOrchestrator>,
    /// Holds the output directory for the fixture's lifetime
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub max_active_jobs: usize,
    pub client_interval_secs: u64,
    pub proxies: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: 4,
            client_interval_secs: 0,
            proxies: Vec::new(),
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.storage.output_dir = temp_dir.path().to_path_buf();
        config.admission.max_active_jobs = test_config.max_active_jobs;
        config.rate_limit.client_interval_secs = test_config.client_interval_secs;
        config.rate_limit.session_interval_secs = 0;
        config.pacing = PacingConfig::immediate();
        config.proxies = test_config.proxies;

        let runner = Arc::new(ScriptedRunner::new());
        let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
        let orchestrator = Arc::new(
            JobOrchestrator::new(
                &config,
                registry,
                Arc::clone(&runner) as Arc<dyn CommandRunner>,
            )
            .expect("Failed to create orchestrator"),
        );

        let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator)));
        let router = create_router(state);

        Self {
            router,
            runner,
            orchestrator,
            temp_dir,
        }
    }

    /// Send a GET request.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Request::builder().method("GET").uri(path), Body::empty(), None)
            .await
    }

    /// Send a POST request with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.post_from(None, path, body).await
    }

    /// Send a POST request as if from the given peer address.
    pub async fn post_from(
        &self,
        peer: Option<SocketAddr>,
        path: &str,
        body: Value,
    ) -> TestResponse {
        let builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json");
        let body = Body::from(serde_json::to_vec(&body).unwrap());
        self.send(builder, body, peer).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str, content_type: &str) -> TestResponse {
        let builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", content_type);
        self.send(builder, Body::from(body.to_string()), None).await
    }

    /// Submit a job and return its id.
    pub async fn create_job(&self, formats: &[&str]) -> Uuid {
        let response = self
            .post(
                "/api/v1/jobs",
                serde_json::json!({ "url": VIDEO_URL, "formats": formats }),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{}", response.body);
        response.body["job_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("job_id in response")
    }

    /// Wait for a job's background task to finish.
    pub async fn wait_for(&self, job_id: &Uuid) -> Job {
        self.orchestrator
            .wait_for(job_id)
            .await
            .expect("job record exists")
    }

    async fn send(
        &self,
        builder: axum::http::request::Builder,
        body: Body,
        peer: Option<SocketAddr>,
    ) -> TestResponse {
        let mut request = builder.body(body).unwrap();
        if let Some(addr) = peer {
            request.extensions_mut().insert(ConnectInfo(addr));
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let raw = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        let body = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
            raw,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
