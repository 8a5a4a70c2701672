use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::web::store::StoreError;

pub enum ApiError {
    Validation(String),
    NotFound(String),
    Unprocessable(String),
    Conflict(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::UnknownRoute(_) | StoreError::UnknownTrip(_) => ApiError::NotFound(message),
            StoreError::UnknownVehicle(_) | StoreError::Geometry(_) => {
                ApiError::Unprocessable(message)
            }
            StoreError::VehicleBusy { .. } | StoreError::TripClosed(_) => {
                ApiError::Conflict(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_failed", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", msg)
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
        };
        (status, Json(ErrorResponse::with_message(error, &message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn with_message(error: &str, message: &str) -> Self {
        ErrorResponse {
            error: error.to_string(),
            message: Some(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let status = |e: StoreError| ApiError::from(e).into_response().status();

        assert_eq!(status(StoreError::UnknownRoute("r".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(StoreError::UnknownVehicle("v".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(StoreError::VehicleBusy {
                vehicle_id: "v".into(),
                trip_id: "t".into()
            }),
            StatusCode::CONFLICT
        );
    }
}
