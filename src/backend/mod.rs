mod error;
pub mod http;
mod types;

use async_trait::async_trait;

use crate::geo::{LatLng, Position};

pub use error::BackendError;
pub use http::HttpBackend;
pub use types::{OpenTrip, Route, Vehicle};

/// Operations the trip pipeline needs from the collection backend.
///
/// Everything except `create_trip` and `list_my_open_trips` is called from background
/// tasks, where errors are logged and dropped by the caller.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn create_trip(&self, route_id: &str, vehicle_id: &str) -> Result<String, BackendError>;

    async fn report_position(&self, trip_id: &str, position: &Position)
        -> Result<(), BackendError>;

    async fn finalize_trip(&self, trip_id: &str) -> Result<(), BackendError>;

    /// Full history for a trip in capture order; empty means nothing recorded yet.
    async fn position_history(&self, trip_id: &str) -> Result<Vec<Position>, BackendError>;

    async fn create_route(&self, name: &str, polyline: &[LatLng]) -> Result<String, BackendError>;

    async fn list_my_open_trips(&self) -> Result<Vec<OpenTrip>, BackendError>;

    async fn list_routes(&self) -> Result<Vec<Route>, BackendError>;

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, BackendError>;
}
