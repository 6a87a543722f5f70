pub mod dto;
pub mod errors;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/sensor-data",
            get(handlers::get_sensor_data).post(handlers::post_sensor_data),
        )
        .route("/devices", post(handlers::register_device))
        .route("/devices/{device_key}", get(handlers::get_device))
        .route("/devices/{device_key}/heartbeat", post(handlers::heartbeat))
        .route("/devices/{device_key}/status", put(handlers::set_device_status))
        .route(
            "/control",
            get(handlers::get_control).post(handlers::post_control),
        )
        .route("/monitor/scan", post(handlers::run_scan))
        .route("/health", get(handlers::health))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
