//! Minimal plumbing to serve HTTP endpoints on top of [`hyper`]

mod responder;

pub use responder::*;

use hyper::http::StatusCode;
use hyper::{Body, Response};
use serde::Serialize;

/// Builds a JSON response with the given status code
///
/// Falls back to an empty 500 should serialization fail, which for the
/// response types used throughout this crate cannot happen.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(_) => {
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap()
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Builds the `{"error": …}` JSON response used by all services
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Extracts a query parameter from a request URI
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;

    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            let raw = parts.next().unwrap_or("");
            return percent_decode(raw);
        }
    }

    None
}

fn percent_decode(raw: &str) -> Option<String> {
    let raw = raw.replace('+', " ");
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extract_query_parameters() {
        let query = Some("conversation_id=c1&page_size=10");

        assert_eq!(query_param(query, "conversation_id").as_deref(), Some("c1"));
        assert_eq!(query_param(query, "page_size").as_deref(), Some("10"));
        assert_eq!(query_param(query, "next_token"), None);
        assert_eq!(query_param(None, "conversation_id"), None);
    }

    #[test]
    fn decode_encoded_parameters() {
        let query = Some("next_token=AQID%3D%3D&user=jane+doe");

        assert_eq!(query_param(query, "next_token").as_deref(), Some("AQID=="));
        assert_eq!(query_param(query, "user").as_deref(), Some("jane doe"));
    }
}
