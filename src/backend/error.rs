use thiserror::Error;

use crate::geo::GeoError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid route reference: {0}")]
    InvalidRoute(String),
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("geometry error: {0}")]
    Geo(#[from] GeoError),
}
