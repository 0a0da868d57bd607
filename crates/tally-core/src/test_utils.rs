//! Test utilities for tally-core
//!
//! This module provides a mock OCR server that speaks the extraction
//! service's wire format, for HTTP client and pipeline integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Canned reply for one request
#[derive(Debug, Clone)]
pub struct MockOcrReply {
    pub status: StatusCode,
    pub body: Value,
}

impl MockOcrReply {
    /// `200` with `success: true` and these transaction lines
    pub fn transactions(lines: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({
                "success": true,
                "data": {
                    "period_start": "2024-03-01",
                    "period_end": "2024-03-31",
                    "transactions": lines,
                }
            }),
        }
    }

    /// Error status with an error payload
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: json!({ "success": false, "message": message }),
        }
    }
}

#[derive(Default)]
struct MockState {
    /// Replies served in order; the last one repeats
    replies: Mutex<Vec<MockOcrReply>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// What the server saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub bank: String,
    pub file_name: Option<String>,
    pub bytes: usize,
}

/// Mock OCR server for testing and development
///
/// Accepts `POST /{bank}/extract` with a multipart `file` part.
pub struct MockOcrServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOcrServer {
    /// Start the mock server on an available port
    pub async fn start(replies: Vec<MockOcrReply>) -> Self {
        let state = Arc::new(MockState {
            replies: Mutex::new(replies),
            ..Default::default()
        });

        let app = Router::new()
            .route("/:bank/extract", post(handle_extract))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of extraction requests received
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOcrServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_extract(
    State(state): State<Arc<MockState>>,
    Path(bank): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);

    let mut file_name = None;
    let mut bytes = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            bytes = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        }
    }
    state.requests.lock().unwrap().push(RecordedRequest {
        bank,
        file_name,
        bytes,
    });

    if bytes == 0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "success": false, "message": "No file uploaded" })),
        )
            .into_response();
    }

    let reply = {
        let replies = state.replies.lock().unwrap();
        replies
            .get(call)
            .or_else(|| replies.last())
            .cloned()
            .unwrap_or_else(|| MockOcrReply::transactions(json!([])))
    };
    (reply.status, Json(reply.body)).into_response()
}
