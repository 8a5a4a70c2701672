//! In-process fakes for the tracker components.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::location::{Fix, FixError, LocationProvider};
use crate::backend::{Backend, BackendError, OpenTrip, Route, Vehicle};
use crate::geo::{LatLng, Position};
use crate::map::{MapView, OverlayId, PathStyle};

#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub at: Instant,
    pub trip_id: String,
    pub position: Position,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    events: Vec<String>,
    reports: Vec<ReportRecord>,
    report_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
    failing_reports: usize,
    failing_history: usize,
    fail_finalize: bool,
    reject_all_routes: bool,
    rejected_routes: HashSet<String>,
    open_trips: Vec<OpenTrip>,
    histories: HashMap<String, Vec<Position>>,
    history_calls: usize,
}

/// Scriptable backend that records every call in order.
#[derive(Default)]
pub struct FakeBackend {
    state: StdMutex<FakeState>,
}

fn rejected(message: &str) -> BackendError {
    BackendError::Rejected {
        status: 503,
        message: message.to_string(),
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn reports(&self) -> Vec<ReportRecord> {
        self.state.lock().unwrap().reports.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn history_calls(&self) -> usize {
        self.state.lock().unwrap().history_calls
    }

    pub fn set_report_delay(&self, delay: Duration) {
        self.state.lock().unwrap().report_delay = delay;
    }

    pub fn fail_next_reports(&self, n: usize) {
        self.state.lock().unwrap().failing_reports = n;
    }

    pub fn fail_next_history(&self, n: usize) {
        self.state.lock().unwrap().failing_history = n;
    }

    pub fn fail_finalize(&self) {
        self.state.lock().unwrap().fail_finalize = true;
    }

    pub fn reject_route(&self, route_id: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_routes
            .insert(route_id.to_string());
    }

    pub fn reject_all_routes(&self) {
        self.state.lock().unwrap().reject_all_routes = true;
    }

    pub fn set_open_trips(&self, trips: Vec<OpenTrip>) {
        self.state.lock().unwrap().open_trips = trips;
    }

    pub fn set_history(&self, trip_id: &str, points: &[LatLng]) {
        let history = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let at = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
                Position::new(*p, at)
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(trip_id.to_string(), history);
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_trip(&self, route_id: &str, vehicle_id: &str) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("create_trip {route_id}"));
        if state.reject_all_routes || state.rejected_routes.contains(route_id) {
            return Err(BackendError::InvalidRoute(route_id.to_string()));
        }
        state.next_id += 1;
        let trip_id = format!("trip-{}", state.next_id);
        state.open_trips.push(OpenTrip {
            trip_id: trip_id.clone(),
            vehicle_id: vehicle_id.to_string(),
            route_id: route_id.to_string(),
            is_open: true,
        });
        Ok(trip_id)
    }

    async fn report_position(&self, trip_id: &str, position: &Position) -> Result<(), BackendError> {
        let (delay, started) = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            (state.report_delay, Instant::now())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if state.failing_reports > 0 {
            state.failing_reports -= 1;
            state.events.push(format!("report_failed {trip_id}"));
            return Err(rejected("report unavailable"));
        }
        state.events.push(format!("report {trip_id}"));
        state.reports.push(ReportRecord {
            at: started,
            trip_id: trip_id.to_string(),
            position: *position,
        });
        state
            .histories
            .entry(trip_id.to_string())
            .or_default()
            .push(*position);
        Ok(())
    }

    async fn finalize_trip(&self, trip_id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("finalize {trip_id}"));
        if state.fail_finalize {
            return Err(rejected("finalize unavailable"));
        }
        for trip in state.open_trips.iter_mut().filter(|t| t.trip_id == trip_id) {
            trip.is_open = false;
        }
        Ok(())
    }

    async fn position_history(&self, trip_id: &str) -> Result<Vec<Position>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.history_calls += 1;
        if state.failing_history > 0 {
            state.failing_history -= 1;
            return Err(rejected("history unavailable"));
        }
        Ok(state.histories.get(trip_id).cloned().unwrap_or_default())
    }

    async fn create_route(&self, name: &str, _polyline: &[LatLng]) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("create_route {name}"));
        state.next_id += 1;
        Ok(format!("route-created-{}", state.next_id))
    }

    async fn list_my_open_trips(&self) -> Result<Vec<OpenTrip>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("list_open_trips".to_string());
        Ok(state.open_trips.clone())
    }

    async fn list_routes(&self) -> Result<Vec<Route>, BackendError> {
        Ok(Vec::new())
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, BackendError> {
        Ok(Vec::new())
    }
}

/// Location provider fed from the test through a channel. Dropping the sender closes it.
pub struct ScriptedProvider {
    fixes: mpsc::UnboundedReceiver<Result<Fix, FixError>>,
}

impl ScriptedProvider {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<Fix, FixError>>) {
        let (tx, fixes) = mpsc::unbounded_channel();
        (Self { fixes }, tx)
    }
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    async fn next_fix(&mut self) -> Result<Fix, FixError> {
        self.fixes.recv().await.unwrap_or(Err(FixError::Closed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOp {
    Marker(OverlayId, LatLng),
    Path(OverlayId, Vec<LatLng>, PathStyle),
    Remove(OverlayId),
}

/// Map view that records overlay operations and tracks what is still visible.
#[derive(Default)]
pub struct RecordingMap {
    ops: StdMutex<Vec<MapOp>>,
    visible: StdMutex<HashSet<OverlayId>>,
}

impl RecordingMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<MapOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn is_visible(&self, id: &OverlayId) -> bool {
        self.visible.lock().unwrap().contains(id)
    }

    pub fn visible_count(&self) -> usize {
        self.visible.lock().unwrap().len()
    }
}

impl MapView for RecordingMap {
    fn place_marker(&self, id: &OverlayId, at: LatLng) {
        self.visible.lock().unwrap().insert(id.clone());
        self.ops.lock().unwrap().push(MapOp::Marker(id.clone(), at));
    }

    fn draw_path(&self, id: &OverlayId, points: &[LatLng], style: PathStyle) {
        self.visible.lock().unwrap().insert(id.clone());
        self.ops
            .lock()
            .unwrap()
            .push(MapOp::Path(id.clone(), points.to_vec(), style));
    }

    fn remove(&self, id: &OverlayId) {
        self.visible.lock().unwrap().remove(id);
        self.ops.lock().unwrap().push(MapOp::Remove(id.clone()));
    }
}
