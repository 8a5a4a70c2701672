use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::geo::polyline::coordinate;
use crate::geo::{LatLng, Position};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{AppState, Profile};
use crate::web::store::{StoredTrip, TripStatus};

use super::DataList;

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartTripRequest {
    pub ruta_id: String,
    pub vehiculo_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportPositionRequest {
    /// Number or numeric string.
    #[schema(value_type = f64)]
    pub lat: Value,
    #[schema(value_type = f64)]
    pub lon: Value,
    #[serde(default)]
    pub capturado_en: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PositionRecord {
    pub lat: f64,
    pub lon: f64,
    pub capturado_en: DateTime<Utc>,
}

impl From<&Position> for PositionRecord {
    fn from(position: &Position) -> Self {
        Self {
            lat: position.latitude,
            lon: position.longitude,
            capturado_en: position.captured_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripRecord {
    pub id: String,
    pub ruta_id: String,
    pub vehiculo_id: String,
    pub estado: TripStatus,
    pub iniciado_en: DateTime<Utc>,
    pub finalizado_en: Option<DateTime<Utc>>,
}

impl From<StoredTrip> for TripRecord {
    fn from(trip: StoredTrip) -> Self {
        Self {
            id: trip.id,
            ruta_id: trip.route_id,
            vehiculo_id: trip.vehicle_id,
            estado: trip.status,
            iniciado_en: trip.started_at,
            finalizado_en: trip.finished_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/recorridos/iniciar",
    tag = "recorridos",
    request_body = StartTripRequest,
    responses(
        (status = 201, description = "Trip started", body = CreatedResponse),
        (status = 404, description = "Unknown route", body = ErrorResponse),
        (status = 409, description = "Vehicle already has an open trip", body = ErrorResponse),
        (status = 422, description = "Unknown vehicle", body = ErrorResponse),
        (status = 401, description = "Missing perfil_id")
    ),
    security(("perfil_id" = []))
)]
pub async fn start_trip(
    State(state): State<AppState>,
    Profile(profile_id): Profile,
    Json(request): Json<StartTripRequest>,
) -> ApiResult<impl IntoResponse> {
    let trip = state
        .store
        .start_trip(&profile_id, &request.ruta_id, &request.vehiculo_id)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: trip.id })))
}

#[utoipa::path(
    post,
    path = "/api/recorridos/{id}/posiciones",
    tag = "recorridos",
    params(("id" = String, Path, description = "Trip id")),
    request_body = ReportPositionRequest,
    responses(
        (status = 201, description = "Position recorded", body = PositionRecord),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse),
        (status = 404, description = "Unknown trip", body = ErrorResponse),
        (status = 409, description = "Trip already finished", body = ErrorResponse)
    ),
    security(("perfil_id" = []))
)]
pub async fn report_position(
    State(state): State<AppState>,
    _profile: Profile,
    Path(id): Path<String>,
    Json(request): Json<ReportPositionRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(lat), Some(lon)) = (coordinate(&request.lat), coordinate(&request.lon)) else {
        return Err(ApiError::Validation("lat and lon must be numbers".into()));
    };
    let point = LatLng::checked(lat, lon).map_err(|e| ApiError::Validation(e.to_string()))?;
    let position = Position::new(point, request.capturado_en.unwrap_or_else(Utc::now));

    state.store.add_position(&id, position)?;
    Ok((StatusCode::CREATED, Json(PositionRecord::from(&position))))
}

#[utoipa::path(
    get,
    path = "/api/recorridos/{id}/posiciones",
    tag = "recorridos",
    params(("id" = String, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Recorded positions in capture order", body = Vec<PositionRecord>),
        (status = 404, description = "Unknown trip", body = ErrorResponse)
    ),
    security(("perfil_id" = []))
)]
pub async fn list_positions(
    State(state): State<AppState>,
    _profile: Profile,
    Path(id): Path<String>,
) -> ApiResult<Json<DataList<PositionRecord>>> {
    let positions = state.store.positions(&id)?;
    Ok(Json(DataList::new(
        positions.iter().map(PositionRecord::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/recorridos/{id}/finalizar",
    tag = "recorridos",
    params(("id" = String, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip finished", body = TripRecord),
        (status = 404, description = "Unknown trip", body = ErrorResponse)
    ),
    security(("perfil_id" = []))
)]
pub async fn finalize_trip(
    State(state): State<AppState>,
    _profile: Profile,
    Path(id): Path<String>,
) -> ApiResult<Json<TripRecord>> {
    let trip = state.store.finish_trip(&id)?;
    Ok(Json(TripRecord::from(trip)))
}

#[utoipa::path(
    get,
    path = "/api/misrecorridos",
    tag = "recorridos",
    responses(
        (status = 200, description = "Trips started by this profile", body = Vec<TripRecord>),
        (status = 401, description = "Missing perfil_id")
    ),
    security(("perfil_id" = []))
)]
pub async fn my_trips(
    State(state): State<AppState>,
    Profile(profile_id): Profile,
) -> Json<DataList<TripRecord>> {
    let trips = state.store.trips_for(&profile_id);
    Json(DataList::new(trips.into_iter().map(TripRecord::from).collect()))
}
