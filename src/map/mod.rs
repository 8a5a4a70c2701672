mod log_view;

use std::fmt;

use crate::geo::LatLng;

pub use log_view::LogMapView;

/// Identifies one overlay on the map. The owner part is unique per component instance,
/// so a component can only address overlays it created itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayId {
    pub owner: String,
    pub name: &'static str,
}

impl OverlayId {
    pub fn new(owner: impl Into<String>, name: &'static str) -> Self {
        Self {
            owner: owner.into(),
            name,
        }
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Solid,
    Dashed,
}

/// Rendering boundary. Implementations draw; they never decide anything about trips.
pub trait MapView: Send + Sync + 'static {
    /// Creates the marker or moves it if it already exists.
    fn place_marker(&self, id: &OverlayId, at: LatLng);

    /// Draws the path, replacing any previous geometry under the same id.
    fn draw_path(&self, id: &OverlayId, points: &[LatLng], style: PathStyle);

    /// Removes the overlay; unknown ids are ignored.
    fn remove(&self, id: &OverlayId);
}
