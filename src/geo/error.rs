use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported coordinate shape: {0}")]
    UnsupportedShape(String),
    #[error("invalid coordinate at index {0}")]
    InvalidCoordinate(usize),
    #[error("coordinate out of range: lat {lat}, lng {lng}")]
    OutOfRange { lat: f64, lng: f64 },
}
