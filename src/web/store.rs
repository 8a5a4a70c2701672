use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::backend::{Backend, BackendError, OpenTrip, Route, Vehicle};
use crate::config::ServerConfig;
use crate::geo::{LatLng, Position};

/// Profile used when the store is driven directly instead of over HTTP.
const LOCAL_PROFILE: &str = "local";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ruta {0} no existe")]
    UnknownRoute(String),
    #[error("vehiculo {0} no existe")]
    UnknownVehicle(String),
    #[error("recorrido {0} no existe")]
    UnknownTrip(String),
    #[error("vehicle {vehicle_id} already has open trip {trip_id}")]
    VehicleBusy { vehicle_id: String, trip_id: String },
    #[error("recorrido {0} ya fue finalizado")]
    TripClosed(String),
    #[error("invalid route geometry: {0}")]
    Geometry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum TripStatus {
    #[serde(rename = "en_curso")]
    InProgress,
    #[serde(rename = "finalizado")]
    Finished,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoredTrip {
    pub id: String,
    pub route_id: String,
    pub vehicle_id: String,
    pub profile_id: String,
    pub status: TripStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub positions: Vec<Position>,
}

#[derive(Default)]
struct StoreState {
    routes: Vec<Route>,
    vehicles: Vec<Vehicle>,
    trips: Vec<StoredTrip>,
}

/// In-memory collection backend for rehearsals. Routes, trips and histories live only
/// as long as the process.
pub struct Store {
    default_profile: String,
    state: StdMutex<StoreState>,
}

impl Store {
    pub fn new(config: &ServerConfig) -> Self {
        let vehicles = config
            .vehicles
            .iter()
            .map(|seed| Vehicle {
                id: seed.id.clone(),
                plate: seed.plate.clone(),
                active: seed.active,
            })
            .collect();

        Self {
            default_profile: config
                .profiles
                .first()
                .cloned()
                .unwrap_or_else(|| LOCAL_PROFILE.to_string()),
            state: StdMutex::new(StoreState {
                vehicles,
                ..StoreState::default()
            }),
        }
    }

    pub fn add_route(&self, name: &str, polyline: Vec<LatLng>) -> Result<String, StoreError> {
        if polyline.len() < 2 {
            return Err(StoreError::Geometry(format!(
                "{} points, need at least 2",
                polyline.len()
            )));
        }
        let id = Uuid::new_v4().to_string();
        log::info!("Registered route {} ({}, {} points)", id, name, polyline.len());
        self.state.lock().unwrap().routes.push(Route {
            id: id.clone(),
            name: name.to_string(),
            polyline,
            external_id: None,
        });
        Ok(id)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state.lock().unwrap().routes.clone()
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.state.lock().unwrap().vehicles.clone()
    }

    pub fn start_trip(
        &self,
        profile_id: &str,
        route_id: &str,
        vehicle_id: &str,
    ) -> Result<StoredTrip, StoreError> {
        let mut state = self.state.lock().unwrap();

        if !state.routes.iter().any(|r| r.id == route_id) {
            return Err(StoreError::UnknownRoute(route_id.to_string()));
        }
        if !state.vehicles.iter().any(|v| v.id == vehicle_id) {
            return Err(StoreError::UnknownVehicle(vehicle_id.to_string()));
        }
        if let Some(open) = state
            .trips
            .iter()
            .find(|t| t.vehicle_id == vehicle_id && t.status == TripStatus::InProgress)
        {
            return Err(StoreError::VehicleBusy {
                vehicle_id: vehicle_id.to_string(),
                trip_id: open.id.clone(),
            });
        }

        let trip = StoredTrip {
            id: Uuid::new_v4().to_string(),
            route_id: route_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            profile_id: profile_id.to_string(),
            status: TripStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
            positions: Vec::new(),
        };
        log::info!("Trip {} started by vehicle {}", trip.id, vehicle_id);
        state.trips.push(trip.clone());
        Ok(trip)
    }

    pub fn add_position(&self, trip_id: &str, position: Position) -> Result<usize, StoreError> {
        let mut state = self.state.lock().unwrap();
        let trip = find_trip(&mut state.trips, trip_id)?;
        if trip.status == TripStatus::Finished {
            return Err(StoreError::TripClosed(trip_id.to_string()));
        }
        trip.positions.push(position);
        Ok(trip.positions.len())
    }

    pub fn positions(&self, trip_id: &str) -> Result<Vec<Position>, StoreError> {
        let mut state = self.state.lock().unwrap();
        Ok(find_trip(&mut state.trips, trip_id)?.positions.clone())
    }

    /// Closes the trip. Finalizing twice is not an error.
    pub fn finish_trip(&self, trip_id: &str) -> Result<StoredTrip, StoreError> {
        let mut state = self.state.lock().unwrap();
        let trip = find_trip(&mut state.trips, trip_id)?;
        if trip.status == TripStatus::InProgress {
            trip.status = TripStatus::Finished;
            trip.finished_at = Some(Utc::now());
            log::info!(
                "Trip {} finished with {} positions",
                trip.id,
                trip.positions.len()
            );
        }
        Ok(trip.clone())
    }

    pub fn trips_for(&self, profile_id: &str) -> Vec<StoredTrip> {
        self.state
            .lock()
            .unwrap()
            .trips
            .iter()
            .filter(|t| t.profile_id == profile_id)
            .cloned()
            .collect()
    }
}

fn find_trip<'a>(trips: &'a mut [StoredTrip], trip_id: &str) -> Result<&'a mut StoredTrip, StoreError> {
    trips
        .iter_mut()
        .find(|t| t.id == trip_id)
        .ok_or_else(|| StoreError::UnknownTrip(trip_id.to_string()))
}

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        let status = match e {
            StoreError::UnknownRoute(id) => return BackendError::InvalidRoute(id),
            StoreError::VehicleBusy { .. } | StoreError::TripClosed(_) => 409,
            StoreError::UnknownTrip(_) => 404,
            StoreError::UnknownVehicle(_) | StoreError::Geometry(_) => 422,
        };
        BackendError::Rejected { status, message }
    }
}

#[async_trait]
impl Backend for Store {
    async fn create_trip(&self, route_id: &str, vehicle_id: &str) -> Result<String, BackendError> {
        Ok(self.start_trip(&self.default_profile, route_id, vehicle_id)?.id)
    }

    async fn report_position(&self, trip_id: &str, position: &Position) -> Result<(), BackendError> {
        self.add_position(trip_id, *position)?;
        Ok(())
    }

    async fn finalize_trip(&self, trip_id: &str) -> Result<(), BackendError> {
        self.finish_trip(trip_id)?;
        Ok(())
    }

    async fn position_history(&self, trip_id: &str) -> Result<Vec<Position>, BackendError> {
        Ok(self.positions(trip_id)?)
    }

    async fn create_route(&self, name: &str, polyline: &[LatLng]) -> Result<String, BackendError> {
        Ok(self.add_route(name, polyline.to_vec())?)
    }

    async fn list_my_open_trips(&self) -> Result<Vec<OpenTrip>, BackendError> {
        Ok(self
            .trips_for(&self.default_profile)
            .into_iter()
            .map(|t| OpenTrip {
                is_open: t.status == TripStatus::InProgress,
                trip_id: t.id,
                vehicle_id: t.vehicle_id,
                route_id: t.route_id,
            })
            .collect())
    }

    async fn list_routes(&self) -> Result<Vec<Route>, BackendError> {
        Ok(self.routes())
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, BackendError> {
        Ok(self.vehicles())
    }
}
