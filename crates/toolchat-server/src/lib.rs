//! HTTP boundary: `/health`, `/tools` and `/chat` over axum.

pub mod routes;
pub mod state;

use std::any::Any;
use std::future::Future;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use toolchat_core::config::AppConfig;
use toolchat_core::AgentHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Error in request handler: handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "detail": "Internal server error" })),
    )
        .into_response()
}

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.server.cors;
    let app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::tool_routes())
        .merge(routes::chat_routes())
        .with_state(state);
    with_middleware(app, cors)
}

fn with_middleware(mut app: Router, cors: bool) -> Router {
    app = app
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http());
    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    config: AppConfig,
    agent: AgentHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = build_router(AppState::new(config, agent));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
