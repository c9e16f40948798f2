pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{config::DeviceCatalog, control::CommandRelay, store::Store};

/// Shared by every handler. Holds no readings or device state of its own:
/// each request reads a fresh snapshot from the store.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub relay: Arc<CommandRelay>,
    pub catalog: Arc<DeviceCatalog>,
    pub default_tariff: f64,
}

impl AppState {
    pub fn new(
        store: Store,
        relay: Arc<CommandRelay>,
        catalog: Arc<DeviceCatalog>,
        default_tariff: f64,
    ) -> Self {
        Self { store, relay, catalog, default_tariff }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/data", get(handlers::get_data))
        .route("/cost_summary", get(handlers::get_cost_summary))
        .route("/energy_summary", get(handlers::get_energy_summary))
        .route("/readings/{device_id}", get(handlers::get_device_readings))
        .route("/control", post(handlers::post_control))
        .route("/control/{device}/{state}", get(handlers::get_control))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
