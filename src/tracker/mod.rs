mod error;
pub mod location;
mod relay;
mod sampler;
mod session;
mod simulator;
mod spectator;
#[cfg(test)]
pub(crate) mod testing;
mod types;

use crate::geo::Position;

pub use error::TrackerError;
pub use relay::{PositionRelay, RelayHandle};
pub use sampler::GeoSampler;
pub use session::{FeedSource, SessionSettings, TripSession};
pub use simulator::{SimTick, SimulationPlan, TripSimulator};
pub use spectator::{SpectatorTracker, TrackedPath};
pub use types::{StopReason, Trip, TripState};

/// Receives every accepted location fix.
pub trait PositionSink: Send + 'static {
    fn on_position(&mut self, position: Position);
}

impl<F> PositionSink for F
where
    F: FnMut(Position) + Send + 'static,
{
    fn on_position(&mut self, position: Position) {
        self(position)
    }
}

/// Receives simulator output: every tick, then exactly one completion.
pub trait TickSink: Send + 'static {
    fn on_tick(&mut self, tick: &SimTick);

    fn on_complete(&mut self, last: Position);
}
