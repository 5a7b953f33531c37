//! WireMock-based snapshot endpoint
//!
//! Serves encoded test images the way a network camera serves its
//! snapshot URL.

use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const SNAPSHOT_PATH: &str = "/snapshot";

/// Mock camera serving a snapshot at [`SNAPSHOT_PATH`]
pub struct MockImageServer {
    pub server: MockServer,
}

impl MockImageServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}{}", self.server.uri(), SNAPSHOT_PATH)
    }

    /// Serve `body` with `content_type` for every request
    pub async fn serve(&self, body: Vec<u8>, content_type: &str) {
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve `body` only after `delay`
    pub async fn serve_slowly(&self, body: Vec<u8>, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body)
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer the first `times` requests with `status`; takes precedence
    /// over [`MockImageServer::serve`]
    pub async fn fail_first(&self, times: u64, status: u16) {
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer every request with `status`
    pub async fn always_fail(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}
