use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::backend::Backend;
use crate::geo::{LatLng, Position};
use crate::map::{MapView, OverlayId, PathStyle};

/// Positions a spectator has seen for one trip. Never shrinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedPath {
    points: Vec<LatLng>,
}

impl TrackedPath {
    /// Takes over `history` unless it is empty or shorter than what is already known.
    pub fn absorb(&mut self, history: &[Position]) -> bool {
        if history.is_empty() || history.len() < self.points.len() {
            return false;
        }
        self.points = history.iter().map(Position::point).collect();
        true
    }

    pub fn points(&self) -> &[LatLng] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<LatLng> {
        self.points.last().copied()
    }
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Follows someone else's trip by polling its recorded history.
pub struct SpectatorTracker {
    backend: Arc<dyn Backend>,
    map: Arc<dyn MapView>,
    poll_interval: Duration,
    marker: OverlayId,
    path_line: OverlayId,
    path: Arc<StdMutex<TrackedPath>>,
    trip_id: Option<String>,
    worker: Option<WorkerHandle>,
}

impl SpectatorTracker {
    pub fn new(backend: Arc<dyn Backend>, map: Arc<dyn MapView>, poll_interval: Duration) -> Self {
        let owner = format!("spectator-{}", Uuid::new_v4());
        Self {
            backend,
            map,
            poll_interval,
            marker: OverlayId::new(owner.clone(), "marker"),
            path_line: OverlayId::new(owner, "path"),
            path: Arc::new(StdMutex::new(TrackedPath::default())),
            trip_id: None,
            worker: None,
        }
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.trip_id.as_deref()
    }

    pub fn path(&self) -> TrackedPath {
        self.path.lock().unwrap().clone()
    }

    pub fn marker_id(&self) -> &OverlayId {
        &self.marker
    }

    pub fn path_id(&self) -> &OverlayId {
        &self.path_line
    }

    /// Starts following `trip_id`, dropping whatever was watched before.
    pub async fn watch(&mut self, trip_id: &str) {
        self.unwatch().await;

        *self.path.lock().unwrap() = TrackedPath::default();
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_poll(
            PollTarget {
                backend: self.backend.clone(),
                map: self.map.clone(),
                trip_id: trip_id.to_string(),
                marker: self.marker.clone(),
                path_line: self.path_line.clone(),
                path: self.path.clone(),
            },
            self.poll_interval,
            stop_rx,
        ));

        log::info!("Watching trip {}", trip_id);
        self.trip_id = Some(trip_id.to_string());
        self.worker = Some(WorkerHandle { stop_tx, join });
    }

    /// Stops polling and clears this tracker's overlays. Safe to repeat.
    pub async fn unwatch(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop_tx.send(());
        let _ = worker.join.await;

        self.map.remove(&self.marker);
        self.map.remove(&self.path_line);
        if let Some(trip_id) = self.trip_id.take() {
            log::info!("Stopped watching trip {}", trip_id);
        }
    }
}

struct PollTarget {
    backend: Arc<dyn Backend>,
    map: Arc<dyn MapView>,
    trip_id: String,
    marker: OverlayId,
    path_line: OverlayId,
    path: Arc<StdMutex<TrackedPath>>,
}

impl PollTarget {
    fn apply(&self, history: &[Position]) {
        if history.is_empty() {
            log::debug!("Trip {} has no positions yet", self.trip_id);
            return;
        }

        let mut path = self.path.lock().unwrap();
        if !path.absorb(history) {
            log::debug!(
                "Ignoring stale history for trip {} ({} < {})",
                self.trip_id,
                history.len(),
                path.len()
            );
            return;
        }

        if let Some(latest) = path.latest() {
            self.map.place_marker(&self.marker, latest);
        }
        if path.len() >= 2 {
            self.map
                .draw_path(&self.path_line, path.points(), PathStyle::Dashed);
        }
    }
}

async fn run_poll(target: PollTarget, poll_interval: Duration, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop_rx => return,
            _ = ticker.tick() => {}
        }

        let history = tokio::select! {
            _ = &mut stop_rx => return,
            history = target.backend.position_history(&target.trip_id) => history,
        };

        match history {
            Ok(history) => target.apply(&history),
            Err(e) => log::warn!("Polling trip {} failed: {}", target.trip_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    use crate::tracker::testing::{FakeBackend, MapOp, RecordingMap};

    const POLL: Duration = Duration::from_secs(2);

    fn pts(n: usize) -> Vec<LatLng> {
        (0..n)
            .map(|i| LatLng::new(3.880 + i as f64 * 0.001, -77.030))
            .collect()
    }

    fn tracker(backend: &Arc<FakeBackend>, map: &Arc<RecordingMap>) -> SpectatorTracker {
        SpectatorTracker::new(backend.clone(), map.clone(), POLL)
    }

    #[test]
    fn tracked_path_only_grows() {
        let at = |p: &LatLng| Position::now(*p);
        let three: Vec<Position> = pts(3).iter().map(at).collect();
        let mut path = TrackedPath::default();

        assert!(!path.absorb(&[]));
        assert!(path.absorb(&three[..2]));
        assert!(path.absorb(&three));
        assert!(!path.absorb(&three[..1]));
        assert!(!path.absorb(&[]));
        assert_eq!(path.points(), pts(3).as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_follows_latest_and_path_appears_from_two_points() {
        let backend = FakeBackend::new();
        let map = RecordingMap::new();
        let mut spectator = tracker(&backend, &map);
        let marker = spectator.marker_id().clone();
        let line = spectator.path_id().clone();

        backend.set_history("trip-1", &pts(1));
        spectator.watch("trip-1").await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(map.ops(), vec![MapOp::Marker(marker.clone(), pts(1)[0])]);

        backend.set_history("trip-1", &pts(2));
        sleep(POLL).await;
        assert_eq!(
            map.ops()[1..].to_vec(),
            vec![
                MapOp::Marker(marker.clone(), pts(2)[1]),
                MapOp::Path(line.clone(), pts(2), PathStyle::Dashed),
            ]
        );

        // every later poll redraws the whole history
        backend.set_history("trip-1", &pts(4));
        sleep(POLL).await;
        assert_eq!(
            map.ops().last(),
            Some(&MapOp::Path(line, pts(4), PathStyle::Dashed))
        );
        assert_eq!(spectator.path().len(), 4);
        spectator.unwatch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_and_stale_polls_leave_overlays_alone() {
        let backend = FakeBackend::new();
        let map = RecordingMap::new();
        let mut spectator = tracker(&backend, &map);

        spectator.watch("trip-1").await;
        sleep(POLL * 3 + Duration::from_millis(10)).await;
        assert!(map.ops().is_empty());
        assert!(backend.history_calls() >= 3);

        backend.set_history("trip-1", &pts(3));
        sleep(POLL).await;
        let drawn = map.ops().len();
        assert_eq!(drawn, 2);

        backend.set_history("trip-1", &pts(2));
        sleep(POLL * 2).await;
        assert_eq!(map.ops().len(), drawn);
        assert_eq!(spectator.path().points(), pts(3).as_slice());

        backend.set_history("trip-1", &[]);
        sleep(POLL * 2).await;
        assert_eq!(map.ops().len(), drawn);
        spectator.unwatch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_is_retried_on_the_next_tick() {
        let backend = FakeBackend::new();
        backend.fail_next_history(1);
        backend.set_history("trip-1", &pts(2));
        let map = RecordingMap::new();
        let mut spectator = tracker(&backend, &map);

        spectator.watch("trip-1").await;
        sleep(Duration::from_millis(10)).await;
        assert!(map.ops().is_empty());

        sleep(POLL).await;
        assert_eq!(map.ops().len(), 2);
        spectator.unwatch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unwatch_clears_overlays_and_stops_polling() {
        let backend = FakeBackend::new();
        backend.set_history("trip-1", &pts(3));
        let map = RecordingMap::new();
        let mut spectator = tracker(&backend, &map);

        spectator.unwatch().await;
        assert!(map.ops().is_empty());

        spectator.watch("trip-1").await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(map.visible_count(), 2);

        spectator.unwatch().await;
        assert_eq!(map.visible_count(), 0);
        assert_eq!(spectator.trip_id(), None);
        let ops = map.ops().len();
        let calls = backend.history_calls();

        spectator.unwatch().await;
        sleep(POLL * 5).await;
        assert_eq!(map.ops().len(), ops);
        assert_eq!(backend.history_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn trackers_are_independent() {
        let backend = FakeBackend::new();
        backend.set_history("trip-1", &pts(2));
        backend.set_history("trip-2", &pts(3));
        let map = RecordingMap::new();
        let mut first = tracker(&backend, &map);
        let mut second = tracker(&backend, &map);
        assert_ne!(first.marker_id(), second.marker_id());

        first.watch("trip-1").await;
        second.watch("trip-2").await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(map.visible_count(), 4);

        first.unwatch().await;
        assert!(map.is_visible(second.marker_id()));
        assert!(map.is_visible(second.path_id()));
        assert_eq!(second.path().len(), 3);

        // switching trips starts a fresh path
        second.watch("trip-1").await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(second.trip_id(), Some("trip-1"));
        assert_eq!(second.path().len(), 2);
        second.unwatch().await;
    }
}
