use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoError;

/// A point in map order: latitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Checked constructor for coordinates arriving from outside the process.
    ///
    /// Only rejects values outside the WGS84 ranges. It cannot tell `[lng, lat]` from
    /// `[lat, lng]` when the longitude is itself a valid latitude.
    pub fn checked(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let in_range = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        if !in_range {
            return Err(GeoError::OutOfRange { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// Linear interpolation towards `other`; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, other: LatLng, t: f64) -> LatLng {
        let t = t.clamp(0.0, 1.0);
        LatLng {
            lat: self.lat + (other.lat - self.lat) * t,
            lng: self.lng + (other.lng - self.lng) * t,
        }
    }
}

impl From<[f64; 2]> for LatLng {
    fn from(pair: [f64; 2]) -> Self {
        LatLng::new(pair[0], pair[1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl Position {
    pub fn new(point: LatLng, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude: point.lat,
            longitude: point.lng,
            captured_at,
        }
    }

    pub fn now(point: LatLng) -> Self {
        Self::new(point, Utc::now())
    }

    pub fn point(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}
