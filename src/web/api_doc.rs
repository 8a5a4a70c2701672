use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use super::api::catalog::{CreateRouteRequest, RouteRecord, VehicleRecord};
use super::api::error::ErrorResponse;
use super::api::trips::{
    CreatedResponse, PositionRecord, ReportPositionRequest, StartTripRequest, TripRecord,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::trips::start_trip,
        super::api::trips::report_position,
        super::api::trips::list_positions,
        super::api::trips::finalize_trip,
        super::api::trips::my_trips,
        super::api::catalog::list_routes,
        super::api::catalog::create_route,
        super::api::catalog::list_vehicles,
    ),
    components(
        schemas(
            StartTripRequest,
            CreatedResponse,
            ReportPositionRequest,
            PositionRecord,
            TripRecord,
            CreateRouteRequest,
            RouteRecord,
            VehicleRecord,
            ErrorResponse,
            crate::web::store::TripStatus,
            crate::geo::polyline::LineString,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Trip Tracker Rehearsal API",
        description = "In-memory stand-in for the collection backend: routes, vehicles, trips and their position histories",
        version = "0.1.0"
    ),
    tags(
        (name = "recorridos", description = "Trip lifecycle and position history"),
        (name = "rutas", description = "Route catalog"),
        (name = "vehiculos", description = "Fleet")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "perfil_id",
                SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("perfil_id"))),
            );
        }
    }
}
