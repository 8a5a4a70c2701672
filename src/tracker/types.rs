use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TripState {
    NotStarted,
    Active,
    Finalizing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    /// Route reference the backend accepted; differs from `route_id` after remediation.
    pub route_ref: String,
    pub vehicle_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Completed,
    Requested,
}
