use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::backend::Backend;
use crate::geo::Position;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatus {
    pub delivered: u64,
    pub failed: u64,
    pub last_delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Cheap submit side of a relay, handed to whichever feed produces positions.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    latest: Arc<watch::Sender<Option<Position>>>,
}

impl RelayHandle {
    /// Never blocks; overwrites any position that has not been sent yet.
    pub fn submit(&self, position: Position) {
        self.latest.send_replace(Some(position));
    }
}

/// Forwards position reports for one trip, at most one per throttle window and never
/// more than one in flight. Only the newest pending position is kept.
pub struct PositionRelay {
    trip_id: String,
    handle: RelayHandle,
    status: Arc<StdMutex<RelayStatus>>,
    worker: Option<WorkerHandle>,
}

impl PositionRelay {
    pub fn start(backend: Arc<dyn Backend>, trip_id: String, window: Duration) -> Self {
        let (latest, rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let status = Arc::new(StdMutex::new(RelayStatus::default()));

        let join = tokio::spawn(run_relay(
            backend,
            trip_id.clone(),
            window,
            rx,
            status.clone(),
            stop_rx,
        ));

        Self {
            trip_id,
            handle: RelayHandle {
                latest: Arc::new(latest),
            },
            status,
            worker: Some(WorkerHandle { stop_tx, join }),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn submit(&self, position: Position) {
        self.handle.submit(position);
    }

    pub fn status(&self) -> RelayStatus {
        self.status.lock().unwrap().clone()
    }

    /// Drops any scheduled delivery. Returns once an in-flight delivery has settled.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
            log::debug!("Relay for trip {} stopped", self.trip_id);
        }
    }
}

async fn run_relay(
    backend: Arc<dyn Backend>,
    trip_id: String,
    window: Duration,
    mut latest: watch::Receiver<Option<Position>>,
    status: Arc<StdMutex<RelayStatus>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut last_delivered: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut stop_rx => return,
            changed = latest.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        if let Some(due) = last_delivered.map(|at| at + window) {
            if Instant::now() < due {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = sleep_until(due) => {}
                }
            }
        }

        let Some(position) = *latest.borrow_and_update() else {
            continue;
        };

        let started = Instant::now();
        match backend.report_position(&trip_id, &position).await {
            Ok(()) => {
                last_delivered = Some(started);
                let mut locked = status.lock().unwrap();
                locked.delivered += 1;
                locked.last_delivered_at = Some(Utc::now());
                log::trace!(
                    "Reported {:.6}, {:.6} for trip {}",
                    position.latitude,
                    position.longitude,
                    trip_id
                );
            }
            Err(e) => {
                status.lock().unwrap().failed += 1;
                log::warn!("Position report for trip {} failed: {}", trip_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::geo::LatLng;
    use crate::tracker::testing::FakeBackend;

    const WINDOW: Duration = Duration::from_millis(5000);

    fn at(lat: f64) -> Position {
        Position::now(LatLng::new(lat, -77.03))
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_a_burst_to_first_and_last() {
        let backend = FakeBackend::new();
        let t0 = Instant::now();
        let mut relay = PositionRelay::start(backend.clone(), "trip-1".into(), WINDOW);

        relay.submit(at(1.0));
        sleep_ms(1000).await;
        relay.submit(at(2.0));
        sleep_ms(1000).await;
        relay.submit(at(3.0));
        sleep_ms(4000).await;

        let reports = backend.reports();
        let seen: Vec<(u128, f64)> = reports
            .iter()
            .map(|r| ((r.at - t0).as_millis(), r.position.latitude))
            .collect();
        assert_eq!(seen, vec![(0, 1.0), (5000, 3.0)]);
        assert_eq!(relay.status().delivered, 2);

        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_sampling_is_throttled() {
        let backend = FakeBackend::new();
        let mut relay = PositionRelay::start(backend.clone(), "trip-1".into(), WINDOW);

        for i in 0..100 {
            relay.submit(at(f64::from(i) / 100.0));
            sleep_ms(200).await;
        }
        sleep_ms(5000).await;

        let reports = backend.reports();
        assert!(reports.len() < 100);
        for pair in reports.windows(2) {
            assert!(pair[1].at - pair[0].at >= WINDOW);
        }
        // the newest sample is never lost
        assert_eq!(reports.last().unwrap().position.latitude, 0.99);

        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_two_deliveries_in_flight() {
        let backend = FakeBackend::new();
        backend.set_report_delay(Duration::from_millis(7000));
        let mut relay = PositionRelay::start(backend.clone(), "trip-1".into(), WINDOW);

        for i in 0..40 {
            relay.submit(at(f64::from(i)));
            sleep_ms(500).await;
        }
        sleep_ms(20_000).await;

        assert_eq!(backend.max_in_flight(), 1);
        assert!(backend.reports().len() >= 2);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_retries_on_next_submit_without_waiting() {
        let backend = FakeBackend::new();
        backend.fail_next_reports(1);
        let t0 = Instant::now();
        let mut relay = PositionRelay::start(backend.clone(), "trip-1".into(), WINDOW);

        relay.submit(at(1.0));
        sleep_ms(1000).await;
        assert!(backend.reports().is_empty());
        assert_eq!(relay.status().failed, 1);

        relay.submit(at(2.0));
        sleep_ms(10).await;

        let reports = backend.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].position.latitude, 2.0);
        assert_eq!((reports[0].at - t0).as_millis(), 1000);

        // a failure alone never triggers another attempt
        sleep_ms(30_000).await;
        assert_eq!(backend.reports().len(), 1);

        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_pending_delivery() {
        let backend = FakeBackend::new();
        let mut relay = PositionRelay::start(backend.clone(), "trip-1".into(), WINDOW);
        let handle = relay.handle();

        handle.submit(at(1.0));
        sleep_ms(1000).await;
        handle.submit(at(2.0));
        relay.stop().await;

        handle.submit(at(3.0));
        sleep_ms(20_000).await;

        let reports = backend.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].position.latitude, 1.0);
        relay.stop().await;
    }
}
