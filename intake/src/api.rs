use crate::IntakeError;
use crate::config::Listener as ListenerConfig;
use crate::metrics_defs::{SUBMISSIONS_ACCEPTED, SUBMISSIONS_RATE_LIMITED, SUBMISSIONS_REJECTED};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::submission::{SubmissionError, SubmissionRequest, Submissions, Submitted};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use shared::counter;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

pub const HEALTH_TEXT: &str = "Backend server is running!";

#[derive(Clone)]
pub struct AppState {
    pub submissions: Submissions,
    pub limiter: Arc<dyn RateLimiter>,
}

/// `GET /` answers unconditionally. `POST /save` passes the rate limiter
/// before the body is read.
pub fn router(state: AppState, allowed_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request());

    let save = post(save_handler)
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/", get(health_handler))
        .route("/save", save)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(state)
}

pub async fn serve(listener: &ListenerConfig, app: Router) -> Result<(), IntakeError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn health_handler() -> &'static str {
    HEALTH_TEXT
}

async fn save_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Submitted, SubmissionError> {
    let result = state
        .submissions
        .submit(SubmissionRequest::from_request(&headers, &body))
        .await;

    match &result {
        Ok(_) => counter!(SUBMISSIONS_ACCEPTED).increment(1),
        Err(e) => counter!(SUBMISSIONS_REJECTED, "reason" => e.reason()).increment(1),
    }

    result
}

async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, SubmissionError> {
    match state.limiter.check_and_increment(peer.ip(), Instant::now()) {
        RateDecision::Allowed { .. } => Ok(next.run(request).await),
        RateDecision::Denied { retry_after } => {
            tracing::debug!(%peer, ?retry_after, "Rate limit exceeded");
            counter!(SUBMISSIONS_RATE_LIMITED).increment(1);
            Err(SubmissionError::RateLimited { retry_after })
        }
    }
}

// Preflights answered by the CORS layer go out as 204 No Content.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "Unhandled error while serving request");

    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
