//! HTTP routes over a shared [`Allocator`].
//!
//! - `GET /v1/sequence/next` returns the next id as plain text.
//! - `GET /healthz` reports whether the shared cache is in use.
//!
//! Callers never see tier topology. An allocation either succeeds or fails
//! with a single JSON error whose status reflects the error kind.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use core::time::Duration;
use seqalloc::{Allocator, Context, Error, ErrorKind, SequenceCache, SequenceStore};
use serde::Serialize;
use std::sync::Arc;

pub struct AppState<D, S, L> {
    pub allocator: Arc<Allocator<D, S, L>>,
    pub request_timeout: Duration,
}

// Derived `Clone` would require `D: Clone` and friends.
impl<D, S, L> Clone for AppState<D, S, L> {
    fn clone(&self) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
            request_timeout: self.request_timeout,
        }
    }
}

pub fn router<D, S, L>(state: AppState<D, S, L>) -> Router
where
    D: SequenceStore + 'static,
    S: SequenceCache + 'static,
    L: SequenceCache + 'static,
{
    Router::new()
        .route("/v1/sequence/next", get(next_id::<D, S, L>))
        .route("/healthz", get(healthz::<D, S, L>))
        .with_state(state)
}

async fn next_id<D, S, L>(State(state): State<AppState<D, S, L>>) -> Result<String, ApiError>
where
    D: SequenceStore,
    S: SequenceCache,
    L: SequenceCache,
{
    let ctx = Context::with_timeout(state.request_timeout);
    let id = state.allocator.next_id(&ctx).await?;
    Ok(id.to_string())
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    shared_tier: &'static str,
}

async fn healthz<D, S, L>(State(state): State<AppState<D, S, L>>) -> Json<Health>
where
    D: SequenceStore,
    S: SequenceCache,
    L: SequenceCache,
{
    let shared_tier = if state.allocator.is_shared_available() {
        "available"
    } else {
        "unavailable"
    };
    Json(Health {
        status: "ok",
        shared_tier,
    })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

/// An allocator failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cache | ErrorKind::Database => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(kind = %self.0.kind(), error = %self.0, "id allocation failed");
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
