use thiserror::Error;

use super::location::FixError;
use super::types::TripState;
use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("already running")]
    AlreadyRunning,
    #[error("route needs at least 2 points, got {0}")]
    InvalidRouteGeometry(usize),
    #[error("vehicle {vehicle_id} already has open trip {trip_id}")]
    VehicleBusy { vehicle_id: String, trip_id: String },
    #[error("trip start failed: {0}")]
    TripStartFailed(#[source] BackendError),
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: TripState,
        action: &'static str,
    },
    #[error("location source: {0}")]
    Location(#[from] FixError),
}
