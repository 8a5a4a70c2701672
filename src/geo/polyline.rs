//! Polyline conversions at the backend boundary.
//!
//! Inside the process every point is `[lat, lng]`. The backend speaks GeoJSON order,
//! `[lng, lat]`, and historically returns route geometry in several shapes. All of that
//! is resolved here so the tracker never branches on payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GeoError, LatLng};

/// GeoJSON `LineString` as sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LineString {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

impl LineString {
    pub fn from_points(points: &[LatLng]) -> Self {
        LineString {
            kind: "LineString".to_string(),
            coordinates: to_wire(points),
        }
    }
}

pub fn to_wire(points: &[LatLng]) -> Vec<[f64; 2]> {
    points.iter().map(|p| [p.lng, p.lat]).collect()
}

/// Normalizes any known geometry payload into map-order points.
///
/// Accepted shapes: `[[lat, lng], ...]`, `[{lat, lng}, ...]`, a flat `[lat, lng]` pair,
/// GeoJSON `LineString` / `MultiLineString` / `Feature`, or any of those encoded as a
/// JSON string.
pub fn normalize(raw: &Value) -> Result<Vec<LatLng>, GeoError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::String(encoded) => {
            let decoded: Value = serde_json::from_str(encoded)?;
            if decoded.is_string() {
                return Err(GeoError::UnsupportedShape("doubly encoded string".into()));
            }
            normalize(&decoded)
        }
        Value::Array(items) => normalize_array(items),
        Value::Object(map) => match map.get("type").and_then(Value::as_str) {
            Some("LineString") => geojson_line(map.get("coordinates")),
            Some("MultiLineString") => {
                let lines = map
                    .get("coordinates")
                    .and_then(Value::as_array)
                    .ok_or_else(|| GeoError::UnsupportedShape("MultiLineString".into()))?;
                let mut points = Vec::new();
                for line in lines {
                    points.extend(geojson_line(Some(line))?);
                }
                Ok(points)
            }
            Some("Feature") => normalize(map.get("geometry").unwrap_or(&Value::Null)),
            Some(other) => Err(GeoError::UnsupportedShape(other.to_string())),
            None => object_point(raw, 0).map(|p| vec![p]),
        },
        other => Err(GeoError::UnsupportedShape(shape_name(other).into())),
    }
}

fn normalize_array(items: &[Value]) -> Result<Vec<LatLng>, GeoError> {
    match items.first() {
        None => Ok(Vec::new()),
        Some(Value::Number(_)) | Some(Value::String(_)) if items.len() == 2 => {
            let lat = coordinate(&items[0]).ok_or(GeoError::InvalidCoordinate(0))?;
            let lng = coordinate(&items[1]).ok_or(GeoError::InvalidCoordinate(0))?;
            Ok(vec![LatLng::checked(lat, lng)?])
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Array(pair) => map_pair(pair, i),
                Value::Object(_) => object_point(item, i),
                _ => Err(GeoError::InvalidCoordinate(i)),
            })
            .collect(),
        Some(other) => Err(GeoError::UnsupportedShape(shape_name(other).into())),
    }
}

/// GeoJSON positions are `[lng, lat]`; this is the single place they get swapped on input.
fn geojson_line(coordinates: Option<&Value>) -> Result<Vec<LatLng>, GeoError> {
    let items = coordinates
        .and_then(Value::as_array)
        .ok_or_else(|| GeoError::UnsupportedShape("LineString without coordinates".into()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let pair = item.as_array().ok_or(GeoError::InvalidCoordinate(i))?;
            let (lng, lat) = numeric_pair(pair, i)?;
            LatLng::checked(lat, lng)
        })
        .collect()
}

fn map_pair(pair: &[Value], index: usize) -> Result<LatLng, GeoError> {
    let (lat, lng) = numeric_pair(pair, index)?;
    LatLng::checked(lat, lng)
}

fn numeric_pair(pair: &[Value], index: usize) -> Result<(f64, f64), GeoError> {
    match pair {
        [a, b, ..] => {
            let a = coordinate(a).ok_or(GeoError::InvalidCoordinate(index))?;
            let b = coordinate(b).ok_or(GeoError::InvalidCoordinate(index))?;
            Ok((a, b))
        }
        _ => Err(GeoError::InvalidCoordinate(index)),
    }
}

fn object_point(value: &Value, index: usize) -> Result<LatLng, GeoError> {
    let lat = ["lat", "latitude", "latitud"]
        .iter()
        .find_map(|k| value.get(*k).and_then(coordinate));
    let lng = ["lng", "lon", "longitude", "longitud"]
        .iter()
        .find_map(|k| value.get(*k).and_then(coordinate));

    match (lat, lng) {
        (Some(lat), Some(lng)) => LatLng::checked(lat, lng),
        _ => Err(GeoError::InvalidCoordinate(index)),
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
pub(crate) fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
