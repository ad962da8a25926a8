//! Response helpers and query-string parsing.

use crate::error::Error;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;

/// Form-decoded query parameters. A repeated name keeps its last value.
#[derive(Debug, Default)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(form_decode(key), form_decode(value));
        }
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Parses `name`, falling back to `default` when it is absent or empty.
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, String> {
        match self.get(name).map(str::trim) {
            None | Some("") => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("invalid {}: {:?}", name, raw)),
        }
    }
}

fn form_decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| spaced.clone())
}

/// Percent-decodes one path segment. Empty segments and segments containing
/// `/` do not name anything.
pub fn path_segment(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    urlencoding::decode(raw).ok().map(Cow::into_owned)
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// Build an HTTP response with headers. Falls back to a bare 500 if the
/// builder rejects the input.
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder.body(Full::new(body.into())).unwrap_or_else(|_| {
        let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    build_response_with_headers(status, std::iter::empty::<(&str, &str)>(), Bytes::new())
}

/// `{"detail": message}`
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "detail": message }))
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Filter(_) | Error::InvalidRequest(_) | Error::InvalidRecord(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_from(error: &Error) -> Response<Full<Bytes>> {
    let message = match error {
        Error::InvalidRequest(msg) | Error::Conflict(msg) => msg.clone(),
        other => other.to_string(),
    };
    error_response(status_for(error), &message)
}

pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_decoding() {
        let params = QueryParams::parse(Some("filter=%28cn%3DAlice+Smith%29&delay_ms=5&flag"));
        assert_eq!(params.get("filter"), Some("(cn=Alice Smith)"));
        assert_eq!(params.get("delay_ms"), Some("5"));
        assert_eq!(params.get("flag"), Some(""));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_query_params_last_value_wins() {
        let params = QueryParams::parse(Some("a=1&a=2"));
        assert_eq!(params.get("a"), Some("2"));
    }

    #[test]
    fn test_parse_or() {
        let params = QueryParams::parse(Some("delay_ms=25&error_rate=abc&empty="));
        assert_eq!(params.parse_or("delay_ms", 0u64), Ok(25));
        assert_eq!(params.parse_or("missing", 7u64), Ok(7));
        assert_eq!(params.parse_or("empty", 0.5f64), Ok(0.5));
        assert!(params.parse_or("error_rate", 0.0f64).is_err());
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("alice%20smith"), Some("alice smith".to_string()));
        assert_eq!(path_segment(""), None);
        assert_eq!(path_segment("a/b"), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::Conflict("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::Io(std::io::Error::other("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_format() {
        let resp = error_response(StatusCode::BAD_REQUEST, "bad filter");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }
}
