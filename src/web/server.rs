use axum::{routing::get, routing::post, Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ServerConfig;

use super::api::catalog as catalog_handlers;
use super::api::trips as trip_handlers;
use super::api_doc::ApiDoc;
use super::auth::AppState;
use super::store::Store;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Trips
        .route("/api/recorridos/iniciar", post(trip_handlers::start_trip))
        .route(
            "/api/recorridos/{id}/posiciones",
            post(trip_handlers::report_position).get(trip_handlers::list_positions),
        )
        .route(
            "/api/recorridos/{id}/finalizar",
            post(trip_handlers::finalize_trip),
        )
        .route("/api/misrecorridos", get(trip_handlers::my_trips))
        // Catalog
        .route(
            "/api/rutas",
            get(catalog_handlers::list_routes).post(catalog_handlers::create_route),
        )
        .route("/api/vehiculos", get(catalog_handlers::list_vehicles))
        // OpenAPI
        .route("/api-doc/openapi.json", get(openapi_json))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let bind_addr = config.bind.clone();
    if config.profiles.is_empty() {
        log::warn!("No profiles configured, every perfil_id is accepted");
    }
    let store = Arc::new(Store::new(&config));
    let app = router(AppState::new(config, store));

    log::info!("Starting rehearsal backend on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await
}
