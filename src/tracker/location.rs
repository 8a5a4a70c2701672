use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::config::GeolocationConfig;
use crate::geo::polyline::coordinate;
use crate::geo::LatLng;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("no fix within the attempt timeout")]
    Timeout,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location source closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported location source: {0}")]
    UnsupportedSource(String),
}

impl FixError {
    /// Errors after which the source will never produce another fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FixError::Closed
                | FixError::PermissionDenied
                | FixError::Io(_)
                | FixError::UnsupportedSource(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub point: LatLng,
    pub captured_at: DateTime<Utc>,
    /// Estimated horizontal error in meters, when the source reports one.
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub maximum_age: Duration,
    pub timeout: Duration,
}

impl From<&GeolocationConfig> for WatchOptions {
    fn from(config: &GeolocationConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            maximum_age: config.maximum_age,
            timeout: config.timeout,
        }
    }
}

/// A continuous location watch. Each call waits for the next fix from the device.
#[async_trait]
pub trait LocationProvider: Send + 'static {
    async fn next_fix(&mut self) -> Result<Fix, FixError>;
}

/// Newline-delimited JSON fixes: plain `{"lat", "lon", "time"}` objects or gpsd `TPV`
/// reports. Other gpsd classes are skipped.
pub struct JsonLinesProvider<R> {
    reader: R,
    line: String,
}

impl<R> JsonLinesProvider<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R> LocationProvider for JsonLinesProvider<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_fix(&mut self) -> Result<Fix, FixError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err(FixError::Closed);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_fix_line(line) {
                Ok(Some(fix)) => return Ok(fix),
                Ok(None) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// gpsd client speaking the JSON watch protocol.
pub struct GpsdProvider {
    lines: JsonLinesProvider<BufReader<OwnedReadHalf>>,
    // gpsd ends the watch when the client half-closes
    _writer: OwnedWriteHalf,
}

impl GpsdProvider {
    pub async fn connect(addr: &str) -> Result<Self, FixError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"?WATCH={\"enable\":true,\"json\":true};\n")
            .await?;
        log::info!("Watching gpsd at {}", addr);

        Ok(Self {
            lines: JsonLinesProvider::new(BufReader::new(reader)),
            _writer: writer,
        })
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    async fn next_fix(&mut self) -> Result<Fix, FixError> {
        self.lines.next_fix().await
    }
}

/// Opens the provider named by `geolocation.source`.
pub async fn open_provider(
    config: &GeolocationConfig,
) -> Result<Box<dyn LocationProvider>, FixError> {
    let source = config.source.trim();

    if let Some(addr) = source.strip_prefix("gpsd://") {
        return Ok(Box::new(GpsdProvider::connect(addr).await?));
    }
    if let Some(path) = source.strip_prefix("file:") {
        let file = tokio::fs::File::open(path).await?;
        return Ok(Box::new(JsonLinesProvider::new(BufReader::new(file))));
    }
    if source == "stdin" {
        return Ok(Box::new(JsonLinesProvider::new(BufReader::new(
            tokio::io::stdin(),
        ))));
    }

    Err(FixError::UnsupportedSource(source.to_string()))
}

fn parse_fix_line(line: &str) -> Result<Option<Fix>, FixError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| FixError::Unavailable(format!("malformed fix: {e}")))?;

    if let Some(class) = value.get("class").and_then(Value::as_str) {
        if class != "TPV" {
            return Ok(None);
        }
        // mode 0/1: no fix yet
        let mode = value.get("mode").and_then(Value::as_u64).unwrap_or(0);
        if mode < 2 {
            return Err(FixError::Unavailable(format!("gpsd mode {mode}")));
        }
    }

    if value.get("error").and_then(Value::as_str) == Some("denied") {
        return Err(FixError::PermissionDenied);
    }

    let lat = value.get("lat").or_else(|| value.get("latitude")).and_then(coordinate);
    let lng = ["lon", "lng", "longitude"]
        .iter()
        .find_map(|k| value.get(*k).and_then(coordinate));
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(FixError::Unavailable("fix without coordinates".into()));
    };
    let point = LatLng::checked(lat, lng)
        .map_err(|e| FixError::Unavailable(e.to_string()))?;

    let captured_at = value
        .get("time")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let accuracy_m = value.get("eph").and_then(Value::as_f64).or_else(|| {
        let epx = value.get("epx").and_then(Value::as_f64)?;
        let epy = value.get("epy").and_then(Value::as_f64)?;
        Some(epx.max(epy))
    });

    Ok(Some(Fix {
        point,
        captured_at,
        accuracy_m,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_plain_and_gpsd_lines() {
        let input = concat!(
            "{\"class\":\"VERSION\",\"release\":\"3.25\"}\n",
            "\n",
            "{\"class\":\"TPV\",\"mode\":3,\"time\":\"2025-03-01T12:00:00.000Z\",\"lat\":3.88,\"lon\":-77.03,\"eph\":4.5}\n",
            "{\"lat\":\"3.89\",\"lng\":-77.02}\n",
        );
        let mut provider = JsonLinesProvider::new(BufReader::new(input.as_bytes()));

        let fix = provider.next_fix().await.unwrap();
        assert_eq!(fix.point, LatLng::new(3.88, -77.03));
        assert_eq!(fix.accuracy_m, Some(4.5));
        assert_eq!(fix.captured_at.to_rfc3339(), "2025-03-01T12:00:00+00:00");

        let fix = provider.next_fix().await.unwrap();
        assert_eq!(fix.point, LatLng::new(3.89, -77.02));
        assert_eq!(fix.accuracy_m, None);

        assert!(matches!(provider.next_fix().await, Err(FixError::Closed)));
    }

    #[tokio::test]
    async fn bad_lines_are_per_fix_errors() {
        let input = "{\"class\":\"TPV\",\"mode\":1}\nnot json\n{\"lat\":3.0,\"lon\":-77.0}\n";
        let mut provider = JsonLinesProvider::new(BufReader::new(input.as_bytes()));

        let err = provider.next_fix().await.unwrap_err();
        assert!(matches!(err, FixError::Unavailable(_)));
        assert!(!err.is_terminal());
        assert!(matches!(provider.next_fix().await, Err(FixError::Unavailable(_))));
        assert!(provider.next_fix().await.is_ok());
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let config = GeolocationConfig {
            source: "bluetooth".into(),
            ..GeolocationConfig::default()
        };
        assert!(matches!(
            open_provider(&config).await,
            Err(FixError::UnsupportedSource(_))
        ));
    }
}
