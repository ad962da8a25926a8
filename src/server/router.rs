//! Route dispatch.

use crate::server::handlers;
use crate::server::request_log::LogEntry;
use crate::server::types::{collect_body, error_response, not_found, path_segment};
use crate::server::AppState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Entry point for every connection's requests. Collects the body, dispatches
/// and records the outcome in the request log.
pub async fn route_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    let response = match collect_body(req).await {
        Ok(body) => dispatch(&method, &path, query.as_deref(), body, &state).await,
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
    };

    let time_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    info!("{} {} -> {} ({} ms)", method, path, status, time_ms);
    state.log.record(LogEntry {
        method: method.to_string(),
        path,
        status,
        time_ms,
    });

    Ok(response)
}

pub async fn dispatch(
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: Bytes,
    state: &Arc<AppState>,
) -> Response<Full<Bytes>> {
    debug!("Dispatching {} {}", method, path);

    match (method, path) {
        (&Method::GET, "/health") => return handlers::health(),
        (&Method::GET, "/inspect") => return handlers::inspect(state),
        (&Method::GET, "/users") => return handlers::list_users(state, query).await,
        (&Method::POST, "/users") => return handlers::create_user(state, &body),
        (&Method::GET, "/admin/mocks") => return handlers::list_mocks(state),
        (&Method::POST, "/admin/mocks") => return handlers::register_mock(state, &body),
        _ => {}
    }

    if let Some(label) = path.strip_prefix("/admin/mocks/").and_then(path_segment) {
        if method == Method::DELETE {
            return handlers::delete_mock(state, &label);
        }
        return not_found();
    }

    if let Some(label) = path.strip_prefix("/mocks/").and_then(path_segment) {
        if method == Method::GET {
            return handlers::serve_mock(state, &label, query).await;
        }
        return not_found();
    }

    if let Some(name) = path.strip_prefix("/users/").and_then(path_segment) {
        if method == Method::GET {
            return handlers::get_user(state, &name);
        }
        return not_found();
    }

    not_found()
}
