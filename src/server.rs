//! HTTP surface: `POST /api/v1/hackrx/run` and `GET /health`.
//!
//! The handler is a thin shell over [`QueryEngine::run`]: it decodes the
//! body, delegates, and maps fatal errors to a JSON error object. Partial
//! failures are already folded into the answer list and still return 200.

use crate::error::QueryError;
use crate::output::{QueryRequest, QueryResponse};
use crate::query::QueryEngine;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Route of the query endpoint.
pub const QUERY_ROUTE: &str = "/api/v1/hackrx/run";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

/// Build the application router around `engine`.
pub fn router(engine: Arc<QueryEngine>) -> Router {
    Router::new()
        .route(QUERY_ROUTE, post(run_query))
        .route("/health", get(health))
        .with_state(AppState { engine })
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// Serve `router(engine)` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, engine: Arc<QueryEngine>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on {}", addr);
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
}

async fn run_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, QueryError> {
    let Json(request) = payload.map_err(|rej| QueryError::InvalidRequest(rej.body_text()))?;
    let response = state.engine.run(&request).await?;
    Ok(Json(response))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn error_response(status: StatusCode, detail: String) -> Response {
    let body = ErrorBody {
        error: status
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string(),
        detail,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Query failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }
        error_response(status, self.to_string())
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    error!("Handler panicked: {}", detail);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_uses_reason_phrase() {
        let resp = QueryError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = QueryError::InvalidRequest("documents: bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn panic_payload_becomes_detail() {
        let resp = panic_response(Box::new("index out of bounds"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
