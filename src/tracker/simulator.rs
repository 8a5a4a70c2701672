use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{TickSink, TrackerError};
use crate::config::SimulatorConfig;
use crate::geo::{LatLng, Position};

/// One simulator step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTick {
    pub index: u64,
    pub position: Position,
    /// Set on the sub-sampled ticks that should reach the relay.
    pub report: bool,
}

/// Timing for a simulated drive along a fixed polyline.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    polyline: Vec<LatLng>,
    tick: Duration,
    ticks_per_segment: u64,
    report_every: u64,
}

impl SimulationPlan {
    pub fn new(
        polyline: Vec<LatLng>,
        config: &SimulatorConfig,
        relay_window: Duration,
    ) -> Result<Self, TrackerError> {
        if polyline.len() < 2 {
            return Err(TrackerError::InvalidRouteGeometry(polyline.len()));
        }
        let tick = config.tick.max(Duration::from_millis(1));

        Ok(Self {
            polyline,
            tick,
            ticks_per_segment: ratio(config.segment_duration, tick),
            report_every: ratio(relay_window, tick),
        })
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn ticks_per_segment(&self) -> u64 {
        self.ticks_per_segment
    }

    pub fn total_ticks(&self) -> u64 {
        (self.polyline.len() as u64 - 1) * self.ticks_per_segment
    }

    pub fn duration(&self) -> Duration {
        self.tick * u32::try_from(self.total_ticks()).unwrap_or(u32::MAX)
    }

    pub fn position_at(&self, tick: u64) -> LatLng {
        interpolate(&self.polyline, tick, self.ticks_per_segment)
            .unwrap_or_else(|| self.destination())
    }

    pub fn is_report_tick(&self, tick: u64) -> bool {
        tick % self.report_every == 0
    }

    pub fn destination(&self) -> LatLng {
        self.polyline[self.polyline.len() - 1]
    }
}

fn ratio(span: Duration, tick: Duration) -> u64 {
    let n = (span.as_nanos() + tick.as_nanos() / 2) / tick.as_nanos();
    u64::try_from(n).unwrap_or(u64::MAX).max(1)
}

/// Position after `tick` steps: every segment takes `ticks_per_segment` steps,
/// regardless of its length. Past the last segment this is the final point.
fn interpolate(polyline: &[LatLng], tick: u64, ticks_per_segment: u64) -> Option<LatLng> {
    let ticks_per_segment = ticks_per_segment.max(1);
    let segment = usize::try_from(tick / ticks_per_segment).unwrap_or(usize::MAX);

    match (polyline.get(segment), polyline.get(segment.saturating_add(1))) {
        (Some(from), Some(to)) => {
            let step = tick % ticks_per_segment;
            Some(from.lerp(*to, step as f64 / ticks_per_segment as f64))
        }
        _ => polyline.last().copied(),
    }
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Drives a vehicle along a polyline on a fixed tick, standing in for GPS.
#[derive(Default)]
pub struct TripSimulator {
    worker: Option<WorkerHandle>,
}

impl TripSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<S: TickSink>(&mut self, plan: SimulationPlan, sink: S) -> Result<(), TrackerError> {
        if self.worker.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }

        log::info!(
            "Simulating {} segments over {:?}",
            plan.polyline.len() - 1,
            plan.duration()
        );
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_simulation(plan, sink, stop_rx));
        self.worker = Some(WorkerHandle { stop_tx, join });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.join.is_finished())
    }

    /// Cancels ticking; a no-op once the run completed.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
        }
    }
}

async fn run_simulation<S: TickSink>(
    plan: SimulationPlan,
    mut sink: S,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval(plan.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let total = plan.total_ticks();

    for index in 0..=total {
        tokio::select! {
            _ = &mut stop_rx => return,
            _ = ticker.tick() => {}
        }

        if index == total {
            log::info!("Simulation reached the end of the route after {} ticks", total);
            sink.on_complete(Position::now(plan.destination()));
            return;
        }

        sink.on_tick(&SimTick {
            index,
            position: Position::now(plan.position_at(index)),
            report: plan.is_report_tick(index),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::time::Instant;

    fn route() -> Vec<LatLng> {
        vec![
            LatLng::new(3.880, -77.030),
            LatLng::new(3.882, -77.031),
            LatLng::new(3.884, -77.028),
        ]
    }

    fn plan() -> SimulationPlan {
        SimulationPlan::new(route(), &SimulatorConfig::default(), Duration::from_secs(5)).unwrap()
    }

    #[derive(Default)]
    struct Recorded {
        ticks: Vec<(u64, LatLng, bool)>,
        completions: Vec<(u64, LatLng)>,
    }

    #[derive(Clone)]
    struct Recorder {
        started: Instant,
        seen: Arc<StdMutex<Recorded>>,
    }

    impl TickSink for Recorder {
        fn on_tick(&mut self, tick: &SimTick) {
            self.seen
                .lock()
                .unwrap()
                .ticks
                .push((tick.index, tick.position.point(), tick.report));
        }

        fn on_complete(&mut self, last: Position) {
            let elapsed = self.started.elapsed().as_millis() as u64;
            self.seen
                .lock()
                .unwrap()
                .completions
                .push((elapsed, last.point()));
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            started: Instant::now(),
            seen: Arc::new(StdMutex::new(Recorded::default())),
        }
    }

    #[test]
    fn plan_timing_matches_the_defaults() {
        let plan = plan();
        assert_eq!(plan.ticks_per_segment(), 50);
        assert_eq!(plan.total_ticks(), 100);
        assert_eq!(plan.duration(), Duration::from_secs(10));
        assert!(plan.is_report_tick(0));
        assert!(!plan.is_report_tick(1));
        assert!(plan.is_report_tick(50));
    }

    #[test]
    fn interpolation_is_a_pure_function_of_the_tick() {
        let points = route();
        let first: Vec<LatLng> = (0..=100).filter_map(|t| interpolate(&points, t, 50)).collect();
        let second: Vec<LatLng> = (0..=100).filter_map(|t| interpolate(&points, t, 50)).collect();
        assert_eq!(first, second);

        assert_eq!(first[0], points[0]);
        assert_eq!(first[50], points[1]);
        assert_eq!(first[100], points[2]);
        assert_eq!(interpolate(&points, 10_000, 50), Some(points[2]));
        assert_eq!(interpolate(&[], 0, 50), None);

        let quarter = first[25];
        assert!((quarter.lat - 3.881).abs() < 1e-9);
        assert!((quarter.lng + 77.0305).abs() < 1e-9);
    }

    #[test]
    fn short_polylines_are_rejected() {
        let config = SimulatorConfig::default();
        assert!(matches!(
            SimulationPlan::new(vec![], &config, Duration::from_secs(5)),
            Err(TrackerError::InvalidRouteGeometry(0))
        ));
        assert!(matches!(
            SimulationPlan::new(vec![LatLng::new(3.88, -77.03)], &config, Duration::from_secs(5)),
            Err(TrackerError::InvalidRouteGeometry(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_the_route_then_completes_once() {
        let sink = recorder();
        let seen = sink.seen.clone();
        let mut simulator = TripSimulator::new();
        simulator.start(plan(), sink).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.ticks.len(), 100);
        let indices: Vec<u64> = recorded.ticks.iter().map(|t| t.0).collect();
        assert_eq!(indices, (0..100).collect::<Vec<_>>());

        let reported: Vec<u64> = recorded
            .ticks
            .iter()
            .filter(|t| t.2)
            .map(|t| t.0)
            .collect();
        assert_eq!(reported, vec![0, 50]);

        assert_eq!(
            recorded.completions,
            vec![(10_000, LatLng::new(3.884, -77.028))]
        );
        drop(recorded);

        assert!(!simulator.is_running());
        simulator.stop().await;
        simulator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticking() {
        let sink = recorder();
        let seen = sink.seen.clone();
        let mut simulator = TripSimulator::new();
        simulator.start(plan(), sink).unwrap();

        tokio::time::sleep(Duration::from_millis(2050)).await;
        simulator.stop().await;
        let count = seen.lock().unwrap().ticks.len();
        assert_eq!(count, 21);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.ticks.len(), count);
        assert!(recorded.completions.is_empty());
    }
}
