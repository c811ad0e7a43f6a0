//! Cliente de la API de previsión de Open-Meteo.
//!
//! La API se consume en formato JSON con `timeformat=unixtime`. Las series
//! temporales se normalizan al triple `(inicio, fin, intervalo)` con el que
//! trabaja `weather_service`, de modo que el eje de tiempos se reconstruye
//! en lugar de copiarse.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::models::Location;

/// Tratamiento de la elevación en la petición.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Elevation {
    /// Se omite el parámetro: Open-Meteo usa su modelo digital de elevación.
    Auto,
    /// Se envía el literal `nan`, que desactiva el downscaling.
    Disabled,
    Meters(f64),
}

impl Elevation {
    /// Interpreta el parámetro `elevation` de la query (NaN = desactivado).
    pub fn from_query(value: Option<f64>) -> Self {
        match value {
            None => Self::Auto,
            Some(v) if v.is_nan() => Self::Disabled,
            Some(v) => Self::Meters(v),
        }
    }

    fn query_value(&self) -> Option<String> {
        match self {
            Self::Auto => None,
            Self::Disabled => Some("nan".to_string()),
            Self::Meters(v) => Some(v.to_string()),
        }
    }
}

/// Granularidad de los datos solicitados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Current,
    Hourly,
    Daily,
}

impl Granularity {
    fn query_key(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }

    /// Intervalo por defecto cuando la serie tiene un único punto.
    fn default_interval(self) -> i64 {
        match self {
            Self::Current => 900,
            Self::Hourly => 3_600,
            Self::Daily => 86_400,
        }
    }
}

/// Petición a la API de previsión.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Elevation,
    pub granularity: Granularity,
    pub variables: Vec<&'static str>,
    pub timezone: String,
    pub past_days: Option<u32>,
    pub forecast_days: Option<u32>,
}

impl ForecastRequest {
    /// Parámetros de query tal y como los recibe Open-Meteo.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("latitude".to_string(), self.latitude.to_string()),
            ("longitude".to_string(), self.longitude.to_string()),
            (
                self.granularity.query_key().to_string(),
                self.variables.join(","),
            ),
            ("timezone".to_string(), self.timezone.clone()),
            ("timeformat".to_string(), "unixtime".to_string()),
        ];
        if let Some(days) = self.past_days {
            pairs.push(("past_days".to_string(), days.to_string()));
        }
        if let Some(days) = self.forecast_days {
            pairs.push(("forecast_days".to_string(), days.to_string()));
        }
        if let Some(elevation) = self.elevation.query_value() {
            pairs.push(("elevation".to_string(), elevation));
        }
        pairs
    }
}

/// Lecturas instantáneas (bloque `current`).
#[derive(Debug, Clone, PartialEq)]
pub struct InstantBlock {
    pub time: i64,
    pub values: HashMap<String, Option<f64>>,
}

/// Serie temporal descrita por `[start, end)` con paso `interval` (segundos).
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBlock {
    pub start: i64,
    pub end: i64,
    pub interval: i64,
    pub variables: HashMap<String, Vec<Option<f64>>>,
}

impl SeriesBlock {
    /// Reconstruye el eje de tiempos a partir del triple (inicio, fin, intervalo).
    pub fn timestamps(&self) -> Vec<i64> {
        if self.interval <= 0 {
            return Vec::new();
        }
        (self.start..self.end).step_by(self.interval as usize).collect()
    }

    /// Devuelve la variable exigiendo que esté alineada con el eje de tiempos.
    pub fn aligned(&self, name: &str, expected_len: usize) -> Result<&[Option<f64>]> {
        let values = self
            .variables
            .get(name)
            .ok_or_else(|| anyhow!("La respuesta no contiene la variable '{name}'"))?;
        if values.len() != expected_len {
            return Err(anyhow!(
                "La variable '{name}' tiene {} valores pero el eje temporal tiene {expected_len}",
                values.len()
            ));
        }
        Ok(values)
    }
}

/// Respuesta normalizada de la API de previsión.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResponse {
    pub location: Location,
    pub utc_offset_seconds: i32,
    pub current: Option<InstantBlock>,
    pub hourly: Option<SeriesBlock>,
    pub daily: Option<SeriesBlock>,
}

/// Contrato con el servicio de previsión externo.
#[async_trait]
pub trait ForecastApi: Send + Sync {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse>;
}

// --- Formato JSON de Open-Meteo ---

#[derive(Deserialize)]
struct RawForecast {
    latitude: f64,
    longitude: f64,
    elevation: f64,
    timezone: String,
    #[serde(default)]
    utc_offset_seconds: i32,
    current: Option<RawInstant>,
    hourly: Option<RawSeries>,
    daily: Option<RawSeries>,
}

#[derive(Deserialize)]
struct RawInstant {
    time: i64,
    #[serde(default)]
    #[allow(dead_code)]
    interval: Option<i64>,
    #[serde(flatten)]
    values: HashMap<String, Option<f64>>,
}

#[derive(Deserialize)]
struct RawSeries {
    time: Vec<i64>,
    #[serde(flatten)]
    values: HashMap<String, Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct RawError {
    reason: String,
}

impl RawSeries {
    fn into_block(self, granularity: Granularity) -> Result<SeriesBlock> {
        let start = self.time.first().copied().unwrap_or(0);
        let interval = match self.time.as_slice() {
            [first, second, ..] => second - first,
            _ => granularity.default_interval(),
        };
        if interval <= 0 {
            return Err(anyhow!("Eje temporal de Open-Meteo no creciente (intervalo {interval})"));
        }
        Ok(SeriesBlock {
            start,
            end: start + interval * self.time.len() as i64,
            interval,
            variables: self.values,
        })
    }
}

impl RawForecast {
    fn normalize(self) -> Result<ForecastResponse> {
        Ok(ForecastResponse {
            location: Location {
                latitude: self.latitude,
                longitude: self.longitude,
                elevation: self.elevation,
                timezone: self.timezone,
            },
            utc_offset_seconds: self.utc_offset_seconds,
            current: self.current.map(|c| InstantBlock {
                time: c.time,
                values: c.values,
            }),
            hourly: self.hourly.map(|s| s.into_block(Granularity::Hourly)).transpose()?,
            daily: self.daily.map(|s| s.into_block(Granularity::Daily)).transpose()?,
        })
    }
}

/// Parsea el cuerpo JSON de una respuesta correcta de Open-Meteo.
pub fn parse_forecast(body: &str) -> Result<ForecastResponse> {
    let raw: RawForecast =
        serde_json::from_str(body).context("Respuesta de Open-Meteo no reconocida")?;
    raw.normalize()
}

/// Cliente HTTP de Open-Meteo.
#[derive(Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    url: Url,
}

impl OpenMeteoClient {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl ForecastApi for OpenMeteoClient {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse> {
        let pairs = request.query_pairs();
        debug!("Consultando Open-Meteo: {:?}", pairs);

        let response = self
            .client
            .get(self.url.clone())
            .query(&pairs)
            .send()
            .await
            .context("Fallo llamando a Open-Meteo")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Fallo leyendo la respuesta de Open-Meteo")?;

        if !status.is_success() {
            let reason = serde_json::from_str::<RawError>(&body)
                .map(|e| e.reason)
                .unwrap_or(body);
            error!("Open-Meteo respondió {status}: {reason}");
            return Err(anyhow!("Open-Meteo respondió {status}: {reason}"));
        }

        parse_forecast(&body)
    }
}
