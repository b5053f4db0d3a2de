//! Verifies the `X-Signature` header on every mutating control-plane route
//! and the inbound webhook (spec §4.6/§6).

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use twinclaw_common::{ApiEnvelope, ErrorKind};
use twinclaw_signing::{SigningError, SIGNATURE_HEADER};

use crate::state::SigningState;

const MAX_SIGNED_BODY_BYTES: usize = 2 * 1024 * 1024;

pub async fn require_signature(State(state): State<SigningState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return signing_error_response(SigningError::MissingHeader),
    };

    let body_str = String::from_utf8_lossy(&bytes).into_owned();
    let signature = parts.headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if let Err(e) = twinclaw_signing::verify(&body_str, signature, state.secret.as_str()) {
        return signing_error_response(e);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

fn signing_error_response(e: SigningError) -> Response {
    let status = StatusCode::from_u16(e.kind().status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    (status, Json(ApiEnvelope::<()>::err("auth_error", e.to_string()))).into_response()
}
