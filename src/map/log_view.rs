use crate::geo::LatLng;

use super::{MapView, OverlayId, PathStyle};

/// Headless map that writes every overlay operation to the log.
#[derive(Debug, Default)]
pub struct LogMapView;

impl MapView for LogMapView {
    fn place_marker(&self, id: &OverlayId, at: LatLng) {
        log::info!("[map] marker {} at {:.6}, {:.6}", id, at.lat, at.lng);
    }

    fn draw_path(&self, id: &OverlayId, points: &[LatLng], style: PathStyle) {
        let last = points.last().map(|p| format!("{:.6}, {:.6}", p.lat, p.lng));
        log::info!(
            "[map] {:?} path {} with {} points, ends at {}",
            style,
            id,
            points.len(),
            last.unwrap_or_else(|| "-".into())
        );
    }

    fn remove(&self, id: &OverlayId) {
        log::info!("[map] removed {}", id);
    }
}
