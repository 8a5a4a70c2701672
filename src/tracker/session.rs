use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::location::{LocationProvider, WatchOptions};
use super::relay::{PositionRelay, RelayHandle};
use super::sampler::GeoSampler;
use super::simulator::{SimTick, SimulationPlan, TripSimulator};
use super::types::{StopReason, Trip, TripState};
use super::{PositionSink, TickSink, TrackerError};
use crate::backend::{Backend, BackendError, Route};
use crate::config::{Config, GeolocationConfig, SimulatorConfig};
use crate::geo::Position;
use crate::map::{MapView, OverlayId, PathStyle};

/// Where positions come from while a trip is active.
pub enum FeedSource {
    Gps(Box<dyn LocationProvider>),
    /// Rehearsal: drive the route polyline instead of reading a device.
    Simulated,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub relay_window: Duration,
    pub simulator: SimulatorConfig,
    pub watch: WatchOptions,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            relay_window: config.relay.throttle,
            simulator: config.simulator.clone(),
            watch: WatchOptions::from(&config.geolocation),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            relay_window: Duration::from_secs(5),
            simulator: SimulatorConfig::default(),
            watch: WatchOptions::from(&GeolocationConfig::default()),
        }
    }
}

struct GpsFeedSink {
    relay: RelayHandle,
    map: Arc<dyn MapView>,
    marker: OverlayId,
}

impl PositionSink for GpsFeedSink {
    fn on_position(&mut self, position: Position) {
        self.map.place_marker(&self.marker, position.point());
        self.relay.submit(position);
    }
}

struct SimulatedFeedSink {
    relay: RelayHandle,
    map: Arc<dyn MapView>,
    marker: OverlayId,
    completed: Option<oneshot::Sender<()>>,
}

impl TickSink for SimulatedFeedSink {
    fn on_tick(&mut self, tick: &SimTick) {
        self.map.place_marker(&self.marker, tick.position.point());
        if tick.report {
            self.relay.submit(tick.position);
        }
    }

    fn on_complete(&mut self, last: Position) {
        self.map.place_marker(&self.marker, last.point());
        if let Some(completed) = self.completed.take() {
            let _ = completed.send(());
        }
    }
}

/// What a running trip owns. Torn down exactly once.
struct ActiveTrip {
    trip_id: String,
    sampler: GeoSampler,
    simulator: TripSimulator,
    relay: PositionRelay,
    marker: OverlayId,
    route_line: OverlayId,
}

/// State reachable from both the session and its completion watcher.
struct Shared {
    backend: Arc<dyn Backend>,
    map: Arc<dyn MapView>,
    state: watch::Sender<TripState>,
    active: AsyncMutex<Option<ActiveTrip>>,
}

impl Shared {
    /// Stops the feed, then the relay, then finalizes. Ends Closed even if finalizing fails.
    /// Returns false when another caller already closed the trip.
    async fn close(&self) -> bool {
        let mut active = self.active.lock().await;
        let Some(mut trip) = active.take() else {
            return false;
        };
        self.state.send_replace(TripState::Finalizing);

        trip.sampler.stop().await;
        trip.simulator.stop().await;
        trip.relay.stop().await;
        let status = trip.relay.status();
        log::info!(
            "Relay delivered {} positions ({} failed)",
            status.delivered,
            status.failed
        );

        match self.backend.finalize_trip(&trip.trip_id).await {
            Ok(()) => log::info!("Trip {} finalized", trip.trip_id),
            Err(e) => log::error!("Failed to finalize trip {}: {}", trip.trip_id, e),
        }

        self.map.remove(&trip.marker);
        self.map.remove(&trip.route_line);
        self.state.send_replace(TripState::Closed);
        true
    }

    /// Undoes a start whose feed could not be wired after the backend created the trip.
    async fn abandon(&self, trip_id: &str, mut relay: PositionRelay, route_line: &OverlayId) {
        relay.stop().await;
        self.map.remove(route_line);
        if let Err(e) = self.backend.finalize_trip(trip_id).await {
            log::error!("Failed to finalize abandoned trip {}: {}", trip_id, e);
        }
    }
}

/// One driver trip from creation to finalization.
pub struct TripSession {
    shared: Arc<Shared>,
    settings: SessionSettings,
    owner: String,
    marker: Option<OverlayId>,
    watcher: Option<JoinHandle<()>>,
}

impl TripSession {
    pub fn new(backend: Arc<dyn Backend>, map: Arc<dyn MapView>, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(TripState::NotStarted);
        Self {
            shared: Arc::new(Shared {
                backend,
                map,
                state,
                active: AsyncMutex::new(None),
            }),
            settings,
            owner: format!("session-{}", Uuid::new_v4()),
            marker: None,
            watcher: None,
        }
    }

    pub fn state(&self) -> TripState {
        *self.shared.state.borrow()
    }

    /// The vehicle marker, once a feed is wired.
    pub fn marker_id(&self) -> Option<&OverlayId> {
        self.marker.as_ref()
    }

    pub async fn start(
        &mut self,
        route: &Route,
        vehicle_id: &str,
        feed: FeedSource,
    ) -> Result<Trip, TrackerError> {
        let state = self.state();
        if state != TripState::NotStarted {
            return Err(TrackerError::InvalidTransition {
                state,
                action: "start",
            });
        }

        // validated before the backend hears about the trip
        let plan = SimulationPlan::new(
            route.polyline.clone(),
            &self.settings.simulator,
            self.settings.relay_window,
        )?;

        let open = self
            .shared
            .backend
            .list_my_open_trips()
            .await
            .map_err(TrackerError::TripStartFailed)?;
        if let Some(busy) = open
            .into_iter()
            .find(|t| t.is_open && t.vehicle_id == vehicle_id)
        {
            return Err(TrackerError::VehicleBusy {
                vehicle_id: vehicle_id.to_string(),
                trip_id: busy.trip_id,
            });
        }

        let (trip_id, route_ref) = self.create_trip(route, vehicle_id).await?;
        let trip = Trip {
            id: trip_id,
            route_id: route.id.clone(),
            route_ref,
            vehicle_id: vehicle_id.to_string(),
        };

        let route_line = OverlayId::new(self.owner.clone(), "route");
        self.shared
            .map
            .draw_path(&route_line, &route.polyline, PathStyle::Solid);

        let relay = PositionRelay::start(
            self.shared.backend.clone(),
            trip.id.clone(),
            self.settings.relay_window,
        );
        let mut sampler = GeoSampler::new(self.settings.watch);
        let mut simulator = TripSimulator::new();
        let mut completed = None;
        let (marker, wired) = match feed {
            FeedSource::Gps(provider) => {
                let marker = OverlayId::new(self.owner.clone(), "live");
                let sink = GpsFeedSink {
                    relay: relay.handle(),
                    map: self.shared.map.clone(),
                    marker: marker.clone(),
                };
                (marker, sampler.start(provider, sink))
            }
            FeedSource::Simulated => {
                let marker = OverlayId::new(self.owner.clone(), "simulated");
                let (completed_tx, completed_rx) = oneshot::channel();
                let sink = SimulatedFeedSink {
                    relay: relay.handle(),
                    map: self.shared.map.clone(),
                    marker: marker.clone(),
                    completed: Some(completed_tx),
                };
                completed = Some(completed_rx);
                (marker, simulator.start(plan, sink))
            }
        };
        if let Err(e) = wired {
            log::error!("Could not wire the feed for trip {}: {}", trip.id, e);
            self.shared.abandon(&trip.id, relay, &route_line).await;
            return Err(e);
        }

        log::info!(
            "Trip {} started for vehicle {} on route {}",
            trip.id,
            trip.vehicle_id,
            trip.route_ref
        );
        *self.shared.active.lock().await = Some(ActiveTrip {
            trip_id: trip.id.clone(),
            sampler,
            simulator,
            relay,
            marker: marker.clone(),
            route_line,
        });
        self.marker = Some(marker);
        self.shared.state.send_replace(TripState::Active);

        if let Some(completed) = completed {
            let shared = self.shared.clone();
            self.watcher = Some(tokio::spawn(async move {
                // a dropped sender means the trip was stopped first
                if completed.await.is_ok() {
                    log::info!("Stopping trip: {}", StopReason::Completed);
                    shared.close().await;
                }
            }));
        }
        Ok(trip)
    }

    /// Creates the trip, re-registering the route once if the backend does not know it.
    async fn create_trip(
        &self,
        route: &Route,
        vehicle_id: &str,
    ) -> Result<(String, String), TrackerError> {
        let backend = &self.shared.backend;
        let route_ref = route.backend_ref();
        match backend.create_trip(route_ref, vehicle_id).await {
            Ok(trip_id) => return Ok((trip_id, route_ref.to_string())),
            Err(BackendError::InvalidRoute(rejected)) => {
                log::warn!(
                    "Backend rejected route {}, registering '{}' again",
                    rejected,
                    route.name
                );
            }
            Err(e) => return Err(TrackerError::TripStartFailed(e)),
        }

        let route_ref = backend
            .create_route(&route.name, &route.polyline)
            .await
            .map_err(TrackerError::TripStartFailed)?;
        let trip_id = backend
            .create_trip(&route_ref, vehicle_id)
            .await
            .map_err(TrackerError::TripStartFailed)?;
        Ok((trip_id, route_ref))
    }

    /// Tears the feed down, then finalizes. Ends Closed even if finalizing fails.
    pub async fn stop(&mut self) -> Result<(), TrackerError> {
        let state = self.state();
        if state != TripState::Active {
            return Err(TrackerError::InvalidTransition {
                state,
                action: "stop",
            });
        }
        self.shared.close().await;
        self.join_watcher().await;
        Ok(())
    }

    /// Waits until the simulated route completes or `shutdown` resolves, stopping the trip
    /// in the latter case. A simulated trip closes itself on completion with or without this.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<StopReason, TrackerError>
    where
        F: Future<Output = ()>,
    {
        let state = self.state();
        if state != TripState::Active {
            return Err(TrackerError::InvalidTransition {
                state,
                action: "run",
            });
        }

        let mut state_rx = self.shared.state.subscribe();
        let requested = tokio::select! {
            _ = state_rx.wait_for(|s| *s == TripState::Closed) => false,
            _ = shutdown => true,
        };
        let reason = if requested {
            log::info!("Stopping trip: {}", StopReason::Requested);
            // closing may already be under way after completion
            if self.shared.close().await {
                StopReason::Requested
            } else {
                StopReason::Completed
            }
        } else {
            StopReason::Completed
        };
        self.join_watcher().await;
        Ok(reason)
    }

    async fn join_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }
}
