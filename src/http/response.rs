//! Response envelope shared by every rejection and JSON handler.
//!
//! Bodies always have the shape `{code, message, data}` so clients can handle
//! guard rejections and handler results the same way.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Non-standard status used when the client went away mid-request.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Response extension a handler sets when the client disconnected while
/// the request was in flight (for example a failed body read).
#[derive(Debug, Clone, Copy)]
pub struct ClientDisconnected;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

/// Build a JSON success response.
pub fn ok<T: Serialize>(data: T) -> Response {
    let body = Envelope {
        code: StatusCode::OK.as_u16(),
        message: "ok".to_string(),
        data: Some(data),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Build a JSON rejection with optional structured detail.
pub fn reject(status: StatusCode, message: impl Into<String>, data: Option<Value>) -> Response {
    let body = Envelope {
        code: status.as_u16(),
        message: message.into(),
        data,
    };
    (status, Json(body)).into_response()
}
