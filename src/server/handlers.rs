//! Endpoint handlers.

use crate::error::Error;
use crate::mocks::{MockKind, RegisterMock};
use crate::search::search_users;
use crate::server::types::*;
use crate::server::AppState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use rand::Rng;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const INSPECT_LIMIT: usize = 50;

/// GET /health
pub fn health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &json!({"status": "ok"}))
}

/// GET /inspect
pub fn inspect(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &json!({"recent_requests": state.log.recent(INSPECT_LIMIT)}),
    )
}

/// GET /users?filter=&delay_ms=&error_rate=
pub async fn list_users(state: &Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let params = QueryParams::parse(query);
    let (delay_ms, error_rate) = match (
        params.parse_or("delay_ms", 0u64),
        params.parse_or("error_rate", 0.0f64),
    ) {
        (Ok(delay), Ok(rate)) => (delay, rate),
        (Err(msg), _) | (_, Err(msg)) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    apply_delay(delay_ms).await;
    if should_inject(error_rate) {
        debug!("Injecting error (rate {})", error_rate);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "injected error");
    }

    let filter = params.get("filter").map(str::to_string);
    let searched = run_blocking(state, move |state| {
        search_users(&state.store, filter.as_deref())
    })
    .await;

    match searched {
        Err(response) => response,
        Ok(Ok(users)) => json_response(StatusCode::OK, &users),
        Ok(Err(Error::Filter(e))) => {
            debug!("Rejected filter: {}", e);
            error_response(StatusCode::BAD_REQUEST, "bad filter")
        }
        Ok(Err(e)) => error_from(&e),
    }
}

/// GET /users/{name}
pub fn get_user(state: &AppState, name: &str) -> Response<Full<Bytes>> {
    match state.store.get_by_account_name(name) {
        Ok(Some(user)) => json_response(StatusCode::OK, &user),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not found"),
        Err(e) => error_from(&e),
    }
}

/// POST /users
pub fn create_user(state: &AppState, body: &Bytes) -> Response<Full<Bytes>> {
    let payload: Map<String, JsonValue> = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("body must be a JSON object: {}", e),
            )
        }
    };
    match state.store.create_user(&payload) {
        Ok(()) => json_response(StatusCode::CREATED, &payload),
        Err(e) => error_from(&e),
    }
}

/// GET /mocks/{label}?delay_ms=
pub async fn serve_mock(
    state: &Arc<AppState>,
    label: &str,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let owned_label = label.to_string();
    let resolved = run_blocking(state, move |state| state.mocks.resolve(&owned_label)).await;
    let mock = match resolved {
        Ok(Some(mock)) => mock,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "mock not found"),
        Err(response) => return response,
    };

    let delay_ms = match QueryParams::parse(query).parse_or("delay_ms", 0u64) {
        Ok(delay) => delay,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    apply_delay(delay_ms).await;

    let kind = mock.entry.kind;
    let loaded = run_blocking(state, move |state| state.mocks.load(&mock)).await;
    let response = match loaded {
        Err(response) => return response,
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Failed to load mock {}: {}", label, e);
            let detail = match kind {
                MockKind::Json => "failed to load mock json",
                MockKind::Csv | MockKind::Raw => "failed to read mock file",
            };
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, detail);
        }
    };

    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!("Mock {} has invalid status {}", label, response.status);
        StatusCode::INTERNAL_SERVER_ERROR
    });
    let mut builder = Response::builder().status(status);
    let mut has_content_type = false;
    for (name, value) in &response.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                has_content_type |= name == CONTENT_TYPE;
                builder = builder.header(name, value);
            }
            _ => warn!("Mock {} has invalid header {:?}", label, name),
        }
    }
    if !has_content_type {
        builder = builder.header(CONTENT_TYPE, response.content_type.as_str());
    }
    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid mock response"))
}

/// GET /admin/mocks
pub fn list_mocks(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &state.mocks.load_mappings())
}

/// POST /admin/mocks
pub fn register_mock(state: &AppState, body: &Bytes) -> Response<Full<Bytes>> {
    let request: RegisterMock = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("invalid body: {}", e)),
    };
    match state.mocks.register(request) {
        Ok((label, entry)) => {
            json_response(StatusCode::CREATED, &BTreeMap::from([(label, entry)]))
        }
        Err(e) => error_from(&e),
    }
}

/// DELETE /admin/mocks/{label}
pub fn delete_mock(state: &AppState, label: &str) -> Response<Full<Bytes>> {
    match state.mocks.delete(label) {
        Ok(_) => empty_response(StatusCode::NO_CONTENT),
        Err(Error::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "not found"),
        Err(e) => error_from(&e),
    }
}

/// Runs store or filesystem work off the async workers.
async fn run_blocking<T, F>(state: &Arc<AppState>, work: F) -> Result<T, Response<Full<Bytes>>>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| {
            warn!("Blocking task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        })
}

async fn apply_delay(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn should_inject(probability: f64) -> bool {
    probability > 0.0 && rand::thread_rng().gen::<f64>() < probability
}
