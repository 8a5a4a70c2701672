mod error;
pub mod polyline;
mod types;

pub use error::GeoError;
pub use types::{LatLng, Position};
