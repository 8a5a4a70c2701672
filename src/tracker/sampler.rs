use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use super::location::{FixError, LocationProvider, WatchOptions};
use super::{PositionSink, TrackerError};
use crate::geo::Position;

/// With high accuracy requested, fixes reporting a larger error (meters) are dropped.
const HIGH_ACCURACY_LIMIT_M: f64 = 100.0;

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Last accepted sample and when it reached the sampler.
#[derive(Debug, Clone, Copy)]
struct Cached {
    position: Position,
    received_at: Instant,
}

/// Continuous location watch. Forwards every accepted fix, unthrottled.
///
/// `maximum_age` bounds reuse of the cached sample: a new watch starts by replaying the last
/// accepted sample if it arrived within that window. Provider fixes are never filtered on their
/// capture timestamp.
pub struct GeoSampler {
    options: WatchOptions,
    last_known: Arc<StdMutex<Option<Cached>>>,
    worker: Option<WorkerHandle>,
}

impl GeoSampler {
    pub fn new(options: WatchOptions) -> Self {
        Self {
            options,
            last_known: Arc::new(StdMutex::new(None)),
            worker: None,
        }
    }

    pub fn last_known(&self) -> Option<Position> {
        self.last_known.lock().unwrap().map(|cached| cached.position)
    }

    pub fn is_watching(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.join.is_finished())
    }

    pub fn start<S>(
        &mut self,
        provider: Box<dyn LocationProvider>,
        sink: S,
    ) -> Result<(), TrackerError>
    where
        S: PositionSink,
    {
        if self.worker.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_watch(
            provider,
            sink,
            self.options,
            self.last_known.clone(),
            stop_rx,
        ));
        self.worker = Some(WorkerHandle { stop_tx, join });
        Ok(())
    }

    /// Cancels the watch. Safe to call when not started.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
        }
    }
}

async fn run_watch<S: PositionSink>(
    mut provider: Box<dyn LocationProvider>,
    mut sink: S,
    options: WatchOptions,
    last_known: Arc<StdMutex<Option<Cached>>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let cached = *last_known.lock().unwrap();
    if let Some(cached) = cached.filter(|c| c.received_at.elapsed() <= options.maximum_age) {
        log::debug!("Reusing cached fix from {:?} ago", cached.received_at.elapsed());
        sink.on_position(cached.position);
    }

    loop {
        let attempt = tokio::select! {
            _ = &mut stop_rx => return,
            attempt = timeout(options.timeout, provider.next_fix()) => attempt,
        };

        let fix = match attempt {
            Err(_) => {
                log::debug!("{}", FixError::Timeout);
                continue;
            }
            Ok(Err(e)) if e.is_terminal() => {
                log::warn!("Location watch ended: {}", e);
                return;
            }
            Ok(Err(e)) => {
                log::warn!("Location fix failed: {}", e);
                continue;
            }
            Ok(Ok(fix)) => fix,
        };

        if options.high_accuracy
            && fix.accuracy_m.is_some_and(|error| error > HIGH_ACCURACY_LIMIT_M)
        {
            log::debug!("Dropping coarse fix ({:?} m)", fix.accuracy_m);
            continue;
        }

        let position = Position::new(fix.point, fix.captured_at);
        *last_known.lock().unwrap() = Some(Cached {
            position,
            received_at: Instant::now(),
        });
        sink.on_position(position);
    }
}
