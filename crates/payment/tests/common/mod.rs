// In-process settlement server enforcing single-use secrets

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const TEST_TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub amount: f64,
    pub currency: String,
    pub secret: Option<String>,
    pub approved: bool,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub hits: usize,
    pub next_id: u32,
    pub requests: HashMap<String, RecordedRequest>,
    /// Answer every call with a plain-text 503
    pub maintenance: bool,
    /// Drop the connection partway through every response body
    pub truncate_bodies: bool,
}

pub type SharedState = Arc<Mutex<ServerState>>;

pub struct SettlementServer {
    pub base_url: String,
    pub state: SharedState,
}

impl SettlementServer {
    pub fn hits(&self) -> usize {
        self.state.lock().unwrap().hits
    }

    pub fn request(&self, request_id: &str) -> Option<RecordedRequest> {
        self.state.lock().unwrap().requests.get(request_id).cloned()
    }

    pub fn set_maintenance(&self, on: bool) {
        self.state.lock().unwrap().maintenance = on;
    }

    pub fn set_truncate_bodies(&self, on: bool) {
        self.state.lock().unwrap().truncate_bodies = on;
    }
}

pub async fn spawn_server() -> SettlementServer {
    let state = SharedState::default();
    let app = Router::new()
        .route("/wallet/tap-to-pay/request", post(create_request))
        .route("/wallet/tap-to-pay/authorize", post(authorize))
        .route("/wallet/tap-to-pay/approve", post(approve))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    SettlementServer {
        base_url: format!("http://{}", addr),
        state,
    }
}

fn truncated() -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"{\"requestId\":")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection dropped")),
    ];
    (StatusCode::CREATED, Body::from_stream(futures::stream::iter(chunks))).into_response()
}

fn error(status: StatusCode, message: &str, code: &str) -> Response {
    (status, Json(json!({ "message": message, "code": code }))).into_response()
}

/// Common gate: count the hit, honour maintenance mode, check the bearer token
fn admit(state: &SharedState, headers: &HeaderMap) -> Option<Response> {
    let mut state = state.lock().unwrap();
    state.hits += 1;

    if state.maintenance {
        return Some((StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response());
    }
    if state.truncate_bodies {
        return Some(truncated());
    }

    let expected = format!("Bearer {}", TEST_TOKEN);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);
    if !authorized {
        return Some(error(StatusCode::UNAUTHORIZED, "Unauthorized", "UNAUTHORIZED"));
    }
    None
}

async fn create_request(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }

    let amount = body["amount"].as_f64();
    let currency = body["currency"].as_str();
    let (amount, currency) = match (amount, currency) {
        (Some(amount), Some(currency)) => (amount, currency.to_string()),
        _ => return error(StatusCode::BAD_REQUEST, "amount and currency are required", "VALIDATION"),
    };

    let mut state = state.lock().unwrap();
    state.next_id += 1;
    let request_id = format!("R{}", state.next_id);
    state.requests.insert(
        request_id.clone(),
        RecordedRequest {
            amount,
            currency,
            secret: None,
            approved: false,
        },
    );

    (StatusCode::CREATED, Json(json!({ "requestId": request_id }))).into_response()
}

async fn authorize(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }

    let request_id = body["requestId"].as_str().unwrap_or_default().to_string();
    let mut state = state.lock().unwrap();
    match state.requests.get_mut(&request_id) {
        Some(request) => {
            let secret = format!("S{}", request_id.trim_start_matches('R'));
            request.secret = Some(secret.clone());
            Json(json!({ "secret": secret })).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "Request not found", "REQUEST_NOT_FOUND"),
    }
}

async fn approve(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }

    let request_id = body["requestId"].as_str().unwrap_or_default().to_string();
    let secret = body["secret"].as_str().unwrap_or_default().to_string();

    let mut state = state.lock().unwrap();
    let request = match state.requests.get_mut(&request_id) {
        Some(request) => request,
        None => return error(StatusCode::NOT_FOUND, "Request not found", "REQUEST_NOT_FOUND"),
    };

    if request.approved {
        return error(StatusCode::CONFLICT, "Secret already used", "SECRET_CONSUMED");
    }
    if request.secret.as_deref() != Some(secret.as_str()) {
        return error(StatusCode::FORBIDDEN, "Invalid secret", "INVALID_SECRET");
    }

    request.approved = true;
    Json(json!({ "status": "APPROVED", "requestId": request_id })).into_response()
}
