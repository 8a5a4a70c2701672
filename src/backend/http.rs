use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use super::{Backend, BackendError, OpenTrip, Route, Vehicle};
use crate::config::ApiConfig;
use crate::geo::polyline::{self, coordinate, LineString};
use crate::geo::{LatLng, Position};

/// Client for the collection API (`<base_url>/api/...`).
pub struct HttpBackend {
    client: Client,
    base: String,
    profile_id: String,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> Result<Self, BackendError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .user_agent(concat!("trip-tracker/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base: format!("{}/api", config.base_url.trim_end_matches('/')),
            profile_id: config.profile_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, BackendError> {
        let response = request
            .query(&[("perfil_id", self.profile_id.as_str())])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>, BackendError> {
        let value = self.send(self.client.get(self.url(path))).await?;
        match unwrap_data(value) {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(BackendError::Decode(format!(
                "{path}: expected a list, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create_trip(&self, route_id: &str, vehicle_id: &str) -> Result<String, BackendError> {
        let body = json!({
            "ruta_id": route_id,
            "vehiculo_id": vehicle_id,
            "perfil_id": self.profile_id,
        });
        let request = self.client.post(self.url("recorridos/iniciar")).json(&body);

        match self.send(request).await {
            Ok(value) => extract_id(&value)
                .ok_or_else(|| BackendError::Decode(format!("trip created without id: {value}"))),
            Err(BackendError::Rejected { status, message })
                if is_route_rejection(status, &message) =>
            {
                Err(BackendError::InvalidRoute(route_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn report_position(
        &self,
        trip_id: &str,
        position: &Position,
    ) -> Result<(), BackendError> {
        let body = json!({
            "lat": position.latitude,
            "lon": position.longitude,
            "perfil_id": self.profile_id,
        });
        let path = format!("recorridos/{trip_id}/posiciones");
        self.send(self.client.post(self.url(&path)).json(&body))
            .await
            .map(|_| ())
    }

    async fn finalize_trip(&self, trip_id: &str) -> Result<(), BackendError> {
        let body = json!({ "perfil_id": self.profile_id });
        let path = format!("recorridos/{trip_id}/finalizar");
        self.send(self.client.post(self.url(&path)).json(&body))
            .await
            .map(|_| ())
    }

    async fn position_history(&self, trip_id: &str) -> Result<Vec<Position>, BackendError> {
        let items = self
            .get_list(&format!("recorridos/{trip_id}/posiciones"))
            .await?;

        let mut positions = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match parse_position(item) {
                Some(position) => positions.push(position),
                None => log::warn!("Skipping malformed position {} of trip {}", i, trip_id),
            }
        }
        Ok(positions)
    }

    async fn create_route(&self, name: &str, points: &[LatLng]) -> Result<String, BackendError> {
        let body = json!({
            "nombre_ruta": name,
            "perfil_id": self.profile_id,
            "shape": LineString::from_points(points),
        });
        let value = self
            .send(self.client.post(self.url("rutas")).json(&body))
            .await?;
        extract_id(&value)
            .ok_or_else(|| BackendError::Decode(format!("route created without id: {value}")))
    }

    async fn list_my_open_trips(&self) -> Result<Vec<OpenTrip>, BackendError> {
        let items = self.get_list("misrecorridos").await?;
        Ok(items.iter().filter_map(parse_open_trip).collect())
    }

    async fn list_routes(&self) -> Result<Vec<Route>, BackendError> {
        let items = self.get_list("rutas").await?;
        Ok(items.iter().filter_map(parse_route).collect())
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, BackendError> {
        let items = self.get_list("vehiculos").await?;
        Ok(items.iter().filter_map(parse_vehicle).collect())
    }
}

fn is_route_rejection(status: u16, message: &str) -> bool {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match status {
        StatusCode::NOT_FOUND => true,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            message.to_lowercase().contains("ruta")
        }
        _ => false,
    }
}

fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn first_of<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| value.get(*k).filter(|v| !v.is_null()))
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_id(value: &Value) -> Option<String> {
    let data = value.get("data").unwrap_or(value);
    [data, value]
        .into_iter()
        .find_map(|v| first_of(v, &["id", "recorrido_id", "ruta_id", "ext_id"]).and_then(as_id))
}

fn parse_position(item: &Value) -> Option<Position> {
    let lat = first_of(item, &["lat", "latitud", "latitude"]).and_then(coordinate)?;
    let lng = first_of(item, &["lon", "lng", "longitud", "longitude"]).and_then(coordinate)?;
    let point = LatLng::checked(lat, lng).ok()?;

    let captured_at = first_of(item, &["capturado_en", "captured_at", "created_at", "timestamp"])
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Position::new(point, captured_at))
}

fn parse_open_trip(item: &Value) -> Option<OpenTrip> {
    let trip_id = first_of(item, &["id", "recorrido_id"]).and_then(as_id)?;
    let vehicle_id = first_of(item, &["vehiculo_id", "vehicle_id"])
        .and_then(as_id)
        .unwrap_or_default();
    let route_id = first_of(item, &["ruta_id", "route_id"])
        .and_then(as_id)
        .unwrap_or_default();

    let is_open = if let Some(open) = item.get("is_open").and_then(Value::as_bool) {
        open
    } else if let Some(active) = item.get("activo").and_then(Value::as_bool) {
        active
    } else if let Some(state) = item.get("estado").and_then(Value::as_str) {
        !matches!(
            state.to_lowercase().as_str(),
            "finalizado" | "cerrado" | "closed" | "finished"
        )
    } else if let Some(ended) = item.get("finalizado_en") {
        ended.is_null()
    } else {
        true
    };

    Some(OpenTrip {
        trip_id,
        vehicle_id,
        route_id,
        is_open,
    })
}

fn parse_route(item: &Value) -> Option<Route> {
    let id = first_of(item, &["id", "ext_id", "codigo"]).and_then(as_id)?;
    let name = first_of(item, &["nombre", "nombre_ruta", "name", "titulo"])
        .and_then(Value::as_str)
        .unwrap_or("Ruta")
        .to_string();

    let geometry = first_of(
        item,
        &["coordenadas", "coordinates", "path", "geometry", "shape", "geometria"],
    )
    .unwrap_or(&Value::Null);
    let points = match polyline::normalize(geometry) {
        Ok(points) => points,
        Err(e) => {
            log::warn!("Route {} has unusable geometry: {}", id, e);
            Vec::new()
        }
    };

    Some(Route {
        name,
        polyline: points,
        external_id: item.get("ext_id").and_then(as_id).filter(|ext| *ext != id),
        id,
    })
}

fn parse_vehicle(item: &Value) -> Option<Vehicle> {
    let id = first_of(item, &["id", "ext_id", "codigo"]).and_then(as_id)?;
    let plate = first_of(item, &["placa", "plate"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let active = first_of(item, &["activo", "active"])
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Some(Vehicle { id, plate, active })
}
