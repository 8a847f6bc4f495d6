//! Admin listener: content event webhook and health check.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::application::error::HttpError;
use crate::cache::{CacheTrigger, EventKind};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::events";

#[derive(Clone)]
pub struct AdminState {
    pub trigger: Arc<CacheTrigger>,
    /// Bearer token for the webhook; `None` disables it.
    pub token: Option<Arc<str>>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn receive_event(
    State(state): State<AdminState>,
    headers: HeaderMap,
    payload: Result<Json<EventKind>, JsonRejection>,
) -> Response {
    if let Err(err) = authorize(state.token.as_deref(), &headers) {
        return err.into_response();
    }

    let Json(kind) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid event payload",
                rejection.body_text(),
            )
            .into_response();
        }
    };

    let event_id = state.trigger.trigger(kind, true).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "event_id": event_id,
            "queued": event_id.is_some(),
            "pending": state.trigger.pending(),
        })),
    )
        .into_response()
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(expected) = expected else {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Not found",
            "event webhook is disabled: no token configured",
        ));
    };

    let presented = extract_token(headers).unwrap_or_default();
    if presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 0 {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid bearer token",
        ));
    }
    Ok(())
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn token_must_match_exactly() {
        assert!(authorize(Some("s3cret"), &bearer("Bearer s3cret")).is_ok());
        assert_eq!(
            authorize(Some("s3cret"), &bearer("Bearer s3cre")).map_err(|e| e.status()),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            authorize(Some("s3cret"), &bearer("s3cret")).map_err(|e| e.status()),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            authorize(Some("s3cret"), &HeaderMap::new()).map_err(|e| e.status()),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn webhook_is_disabled_without_token() {
        assert_eq!(
            authorize(None, &bearer("Bearer anything")).map_err(|e| e.status()),
            Err(StatusCode::NOT_FOUND)
        );
    }
}
