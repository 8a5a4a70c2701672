use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::backend::{Route, Vehicle};
use crate::geo::polyline::{self, LineString};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{AppState, Profile};

use super::trips::CreatedResponse;
use super::DataList;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRouteRequest {
    pub nombre_ruta: String,
    /// Any supported geometry; GeoJSON `LineString` is canonical.
    #[schema(value_type = LineString)]
    pub shape: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteRecord {
    pub id: String,
    pub nombre: String,
    pub shape: LineString,
}

impl From<Route> for RouteRecord {
    fn from(route: Route) -> Self {
        Self {
            shape: LineString::from_points(&route.polyline),
            id: route.id,
            nombre: route.name,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleRecord {
    pub id: String,
    pub placa: String,
    pub activo: bool,
}

impl From<Vehicle> for VehicleRecord {
    fn from(vehicle: Vehicle) -> Self {
        Self {
            id: vehicle.id,
            placa: vehicle.plate,
            activo: vehicle.active,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/rutas",
    tag = "rutas",
    responses(
        (status = 200, description = "Registered routes", body = Vec<RouteRecord>)
    ),
    security(("perfil_id" = []))
)]
pub async fn list_routes(
    State(state): State<AppState>,
    _profile: Profile,
) -> Json<DataList<RouteRecord>> {
    let routes = state.store.routes();
    Json(DataList::new(routes.into_iter().map(RouteRecord::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/rutas",
    tag = "rutas",
    request_body = CreateRouteRequest,
    responses(
        (status = 201, description = "Route registered", body = CreatedResponse),
        (status = 400, description = "Unreadable geometry", body = ErrorResponse),
        (status = 422, description = "Fewer than two points", body = ErrorResponse)
    ),
    security(("perfil_id" = []))
)]
pub async fn create_route(
    State(state): State<AppState>,
    _profile: Profile,
    Json(request): Json<CreateRouteRequest>,
) -> ApiResult<impl IntoResponse> {
    let points =
        polyline::normalize(&request.shape).map_err(|e| ApiError::Validation(e.to_string()))?;
    let id = state.store.add_route(&request.nombre_ruta, points)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[utoipa::path(
    get,
    path = "/api/vehiculos",
    tag = "vehiculos",
    responses(
        (status = 200, description = "Fleet", body = Vec<VehicleRecord>)
    ),
    security(("perfil_id" = []))
)]
pub async fn list_vehicles(
    State(state): State<AppState>,
    _profile: Profile,
) -> Json<DataList<VehicleRecord>> {
    let vehicles = state.store.vehicles();
    Json(DataList::new(
        vehicles.into_iter().map(VehicleRecord::from).collect(),
    ))
}
