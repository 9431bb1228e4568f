//! Form intake service: validates `{name, email}` submissions, turns away
//! duplicates by email, and appends the rest to the qualifier store.

pub mod api;
pub mod config;
pub mod metrics_defs;
pub mod rate_limit;
pub mod store;
pub mod submission;
pub mod validation;

#[cfg(test)]
mod testutils;

use api::AppState;
use rate_limit::FixedWindowLimiter;
use shared::admin_service::AdminService;
use shared::http::{bind, run_http_service};
use std::sync::Arc;
use store::StoreError;
use submission::Submissions;

#[derive(thiserror::Error, Debug)]
pub enum IntakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ValidationError),

    #[error("could not initialize the qualifier store: {0}")]
    Store(#[from] StoreError),
}

/// Builds the store and serves the intake routes until a shutdown signal.
pub async fn run(config: config::Config) -> Result<(), IntakeError> {
    config.validate()?;
    let allowed_origin = config.origin_header()?;

    let store = store::get_store(&config.store)?;
    let limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window(),
    ));

    if let Some(admin) = &config.admin_listener {
        let listener = bind(&admin.host, admin.port).await?;
        let store = store.clone();
        let admin_service = AdminService::<_, IntakeError>::new(move || store.is_ready());

        tokio::spawn(async move {
            if let Err(e) = run_http_service(listener, admin_service).await {
                tracing::error!("Admin listener failed: {e}");
            }
        });
    }

    let state = AppState {
        submissions: Submissions::new(store),
        limiter,
    };

    tracing::info!(
        origin = %config.allowed_origin,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        "Starting intake server"
    );

    api::serve(&config.listener, api::router(state, allowed_origin)).await
}
