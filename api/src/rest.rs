use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    handlers::{account, email, entries},
    links::{CLICK_PATH, OPEN_PATH, UNSUBSCRIBE_PATH},
    AppState,
};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
        }
    }
}

pub fn router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout));

    Router::new()
        .route("/health", get(health))
        .route("/api/entries", post(entries::create).get(entries::list))
        .route(
            "/api/entries/:id",
            get(entries::show)
                .put(entries::update)
                .delete(entries::remove),
        )
        .route(
            "/api/entries/:id/reflections",
            post(entries::reflect).get(entries::reflections),
        )
        .route("/api/account", delete(account::delete))
        .route("/api/account/export", post(account::export))
        .route(OPEN_PATH, get(email::open))
        .route(CLICK_PATH, get(email::click))
        .route(
            UNSUBSCRIBE_PATH,
            get(email::unsubscribe_page).post(email::unsubscribe_one_click),
        )
        .route("/api/email/bounce", post(email::bounce))
        .route("/api/email/links", post(email::links))
        .route("/api/email/preferences", get(email::preferences))
        .layer(middleware)
        .with_state(state)
}
