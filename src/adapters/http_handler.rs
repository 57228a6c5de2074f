use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    body::Body as AxumBody,
    http::{StatusCode, header},
    routing::any,
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use tower_http::trace::TraceLayer;

use crate::core::{
    capture::{CaptureError, CapturedJob, routing_directive},
    dispatcher::Dispatcher,
    queue::QueueError,
};

/// Plain-text counters line.
pub const STATS_PATH: &str = "/_stats";
/// JSON health document.
pub const HEALTH_PATH: &str = "/_health";

/// HTTP handler for the relay: intake plus the two reserved health paths
#[derive(Clone)]
pub struct HttpHandler {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

impl HttpHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, max_body_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_body_bytes,
        }
    }

    /// Main request handler that routes requests appropriately
    pub async fn handle_request(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        match req.uri().path() {
            STATS_PATH => self.handle_stats(),
            HEALTH_PATH => self.handle_health(),
            _ => self.handle_intake(req).await,
        }
    }

    /// Handle the counters line
    fn handle_stats(&self) -> Result<Response<AxumBody>> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(AxumBody::from(self.dispatcher.stats().to_string()))
            .wrap_err("Failed to build stats response")
    }

    /// Handle health check endpoint
    fn handle_health(&self) -> Result<Response<AxumBody>> {
        let pool = self.dispatcher.pool_summary();
        let stats = self.dispatcher.stats();

        let (status, label) = if pool.live() == 0 || !self.dispatcher.is_accepting() {
            (StatusCode::SERVICE_UNAVAILABLE, "down")
        } else if pool.halted > 0 {
            (StatusCode::OK, "degraded")
        } else {
            (StatusCode::OK, "ok")
        };

        let health_data = serde_json::json!({
            "status": label,
            "version": env!("CARGO_PKG_VERSION"),
            "workers": pool,
            "queue": {
                "depth": self.dispatcher.queue_depth(),
                "capacity": self.dispatcher.queue_capacity(),
            },
            "jobs": {
                "received": stats.received,
                "completed": stats.completed,
                "failed": stats.failed,
                "rejected": stats.rejected,
                "in_flight": stats.in_flight(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(health_data.to_string()))
            .wrap_err("Failed to build health check response")
    }

    /// Capture the request and hand it to the worker pool
    async fn handle_intake(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        if routing_directive(req.headers()).is_none() {
            return plain_response(StatusCode::NOT_FOUND, "Not Found");
        }

        let job = match CapturedJob::capture(req, self.max_body_bytes).await {
            Ok(job) => job,
            Err(e @ CaptureError::BodyTooLarge { .. }) => {
                tracing::debug!("Refusing intake: {}", e);
                return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
            }
            Err(e) => {
                tracing::debug!("Refusing intake: {}", e);
                return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
            }
        };

        match self.dispatcher.submit(job).await {
            Ok(()) => plain_response(StatusCode::OK, "OK"),
            Err(e @ QueueError::Full { .. }) => {
                tracing::warn!("Rejecting intake: {}", e);
                plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
            Err(e) => {
                tracing::info!("Rejecting intake: {}", e);
                plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
        }
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Result<Response<AxumBody>> {
    Response::builder()
        .status(status)
        .body(AxumBody::from(body))
        .wrap_err_with(|| format!("Failed to build {status} response"))
}

/// Axum router sending every method and path through `handler`.
pub fn router(handler: Arc<HttpHandler>) -> Router {
    let make_request_route = |handler: Arc<HttpHandler>| {
        any(move |req: Request<AxumBody>| {
            let handler = handler.clone();
            async move {
                match handler.handle_request(req).await {
                    Ok(response) => Ok::<Response<AxumBody>, Infallible>(response),
                    Err(e) => {
                        tracing::error!("Request handling error: {:?}", e);
                        let mut response = Response::new(AxumBody::from("Internal Server Error"));
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        Ok(response)
                    }
                }
            }
        })
    };

    Router::new()
        .route("/{*path}", make_request_route(handler.clone()))
        .route("/", make_request_route(handler))
        .layer(TraceLayer::new_for_http())
}
