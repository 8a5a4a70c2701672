use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Route {
    pub id: String,
    pub name: String,
    pub polyline: Vec<LatLng>,
    /// The backend's own route record, when it differs from `id`.
    #[serde(default)]
    pub external_id: Option<String>,
}

impl Route {
    /// The reference to hand to `create_trip`.
    pub fn backend_ref(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Vehicle {
    pub id: String,
    pub plate: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OpenTrip {
    pub trip_id: String,
    pub vehicle_id: String,
    pub route_id: String,
    pub is_open: bool,
}
