//! Servicio meteorológico: traduce coordenadas simples al esquema de la API
//! de previsión y aplana su respuesta en estructuras JSON sencillas.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WeatherConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CurrentReading, CurrentWeather, DailySeries, DailyWeather, HourlySeries, HourlyWeather,
};
use crate::open_meteo::{Elevation, ForecastApi, ForecastRequest, ForecastResponse, Granularity};

const CURRENT_VARIABLES: [&str; 6] = [
    "temperature_2m",
    "relative_humidity_2m",
    "rain",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
];

const HOURLY_VARIABLES: [&str; 16] = [
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "precipitation",
    "rain",
    "showers",
    "weather_code",
    "cloud_cover",
    "wind_speed_10m",
    "wind_speed_80m",
    "wind_speed_120m",
    "wind_direction_180m",
    "wind_gusts_10m",
    "uv_index",
    "uv_index_clear_sky",
    "is_day",
];

const DAILY_VARIABLES: [&str; 2] = ["sunrise", "sunset"];

pub const CITY_NOT_SUPPORTED: &str =
    "City search is not supported. Please use coordinates instead.";

/// Descripción textual de un código meteorológico WMO.
pub fn weather_description(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

/// Epoch (segundos) → fecha y hora local según el desplazamiento de la ubicación.
fn local_datetime(epoch: i64, utc_offset_seconds: i32) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(epoch + i64::from(utc_offset_seconds), 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| anyhow!("Marca de tiempo fuera de rango: {epoch}"))
}

fn format_local(epoch: i64, utc_offset_seconds: i32, pattern: &str) -> Result<String> {
    Ok(local_datetime(epoch, utc_offset_seconds)?.format(pattern).to_string())
}

fn validate_coordinates(lat: f64, lon: f64) -> ApiResult<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ApiError::InvalidInput(format!(
            "Latitude must be between -90 and 90, got {lat}"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(ApiError::InvalidInput(format!(
            "Longitude must be between -180 and 180, got {lon}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct WeatherService {
    api: Arc<dyn ForecastApi>,
    timezone: String,
    past_days: u32,
    forecast_days: u32,
}

impl WeatherService {
    pub fn new(api: Arc<dyn ForecastApi>, timezone: impl Into<String>, past_days: u32, forecast_days: u32) -> Self {
        Self {
            api,
            timezone: timezone.into(),
            past_days,
            forecast_days,
        }
    }

    pub fn from_config(api: Arc<dyn ForecastApi>, cfg: &WeatherConfig) -> Self {
        Self::new(api, cfg.timezone.clone(), cfg.past_days, cfg.forecast_days)
    }

    fn request(
        &self,
        lat: f64,
        lon: f64,
        elevation: Elevation,
        granularity: Granularity,
        variables: &[&'static str],
    ) -> ForecastRequest {
        let windowed = granularity != Granularity::Current;
        ForecastRequest {
            latitude: lat,
            longitude: lon,
            elevation,
            granularity,
            variables: variables.to_vec(),
            timezone: self.timezone.clone(),
            past_days: windowed.then_some(self.past_days),
            forecast_days: windowed.then_some(self.forecast_days),
        }
    }

    /// Llama a la API externa y reduce cualquier fallo, incluido el reajuste
    /// de la respuesta, a un único `ApiError::Upstream`.
    async fn run<T>(
        &self,
        kind: &str,
        request: ForecastRequest,
        reshape: impl FnOnce(ForecastResponse) -> Result<T>,
    ) -> ApiResult<T> {
        let request_id = Uuid::new_v4().simple().to_string();
        info!(
            "Petición {request_id}: datos {kind} para lat={}, lon={}, elevación={:?}",
            request.latitude, request.longitude, request.elevation
        );

        let result = match self.api.forecast(&request).await {
            Ok(response) => reshape(response),
            Err(err) => Err(err),
        };

        result.map_err(|err| {
            error!("Petición {request_id}: error obteniendo datos {kind}: {err:#}");
            ApiError::from(err)
        })
    }

    pub async fn get_current_weather(
        &self,
        lat: f64,
        lon: f64,
        elevation: Elevation,
    ) -> ApiResult<CurrentWeather> {
        validate_coordinates(lat, lon)?;
        let request = self.request(lat, lon, elevation, Granularity::Current, &CURRENT_VARIABLES);
        self.run("actuales", request, reshape_current).await
    }

    pub async fn get_hourly_weather(
        &self,
        lat: f64,
        lon: f64,
        elevation: Elevation,
    ) -> ApiResult<HourlyWeather> {
        validate_coordinates(lat, lon)?;
        let request = self.request(lat, lon, elevation, Granularity::Hourly, &HOURLY_VARIABLES);
        self.run("horarios", request, reshape_hourly).await
    }

    pub async fn get_daily_weather(
        &self,
        lat: f64,
        lon: f64,
        elevation: Elevation,
    ) -> ApiResult<DailyWeather> {
        validate_coordinates(lat, lon)?;
        let request = self.request(lat, lon, elevation, Granularity::Daily, &DAILY_VARIABLES);
        self.run("diarios", request, reshape_daily).await
    }

    pub async fn get_weather_by_city(&self, city: &str) -> ApiResult<CurrentWeather> {
        warn!("Búsqueda por ciudad no soportada: {city}");
        Err(ApiError::NotSupported(CITY_NOT_SUPPORTED.to_string()))
    }
}

fn reshape_current(response: ForecastResponse) -> Result<CurrentWeather> {
    let current = response
        .current
        .ok_or_else(|| anyhow!("La respuesta no contiene datos actuales"))?;
    let value = |name: &str| -> Result<Option<f64>> {
        current
            .values
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("La respuesta no contiene la variable '{name}'"))
    };

    Ok(CurrentWeather {
        current: CurrentReading {
            temperature: value("temperature_2m")?,
            humidity: value("relative_humidity_2m")?,
            rain: value("rain")?,
            wind_speed: value("wind_speed_10m")?,
            wind_direction: value("wind_direction_10m")?,
            wind_gusts: value("wind_gusts_10m")?,
            time: format_local(current.time, response.utc_offset_seconds, "%Y-%m-%dT%H:%M:%S")?,
        },
        location: response.location,
    })
}

fn reshape_hourly(response: ForecastResponse) -> Result<HourlyWeather> {
    let hourly = response
        .hourly
        .ok_or_else(|| anyhow!("La respuesta no contiene datos horarios"))?;
    let offset = response.utc_offset_seconds;
    let timestamps = hourly.timestamps();
    let len = timestamps.len();
    let series = |name: &str| hourly.aligned(name, len).map(<[Option<f64>]>::to_vec);

    let weather_code = series("weather_code")?;
    let weather_description = weather_code
        .iter()
        .map(|code| match code {
            Some(c) => {
                let description = weather_description(*c as i64);
                if description == "Unknown" {
                    warn!("Código meteorológico desconocido: {c}");
                }
                description.to_string()
            }
            None => "Unknown".to_string(),
        })
        .collect();

    Ok(HourlyWeather {
        hourly: HourlySeries {
            time: timestamps
                .iter()
                .map(|ts| format_local(*ts, offset, "%Y-%m-%d %H:%M:%S"))
                .collect::<Result<_>>()?,
            temperature: series("temperature_2m")?,
            humidity: series("relative_humidity_2m")?,
            apparent_temperature: series("apparent_temperature")?,
            precipitation: series("precipitation")?,
            rain: series("rain")?,
            showers: series("showers")?,
            weather_code,
            cloud_cover: series("cloud_cover")?,
            wind_speed_10m: series("wind_speed_10m")?,
            wind_speed_80m: series("wind_speed_80m")?,
            wind_speed_120m: series("wind_speed_120m")?,
            wind_direction_180m: series("wind_direction_180m")?,
            wind_gusts_10m: series("wind_gusts_10m")?,
            uv_index: series("uv_index")?,
            uv_index_clear_sky: series("uv_index_clear_sky")?,
            is_day: series("is_day")?,
            weather_description,
        },
        location: response.location,
    })
}

fn reshape_daily(response: ForecastResponse) -> Result<DailyWeather> {
    let daily = response
        .daily
        .ok_or_else(|| anyhow!("La respuesta no contiene datos diarios"))?;
    let offset = response.utc_offset_seconds;
    let timestamps = daily.timestamps();
    let clock = |name: &str| -> Result<Vec<Option<String>>> {
        daily
            .aligned(name, timestamps.len())?
            .iter()
            .map(|v| v.map(|ts| format_local(ts as i64, offset, "%H:%M")).transpose())
            .collect()
    };

    Ok(DailyWeather {
        daily: DailySeries {
            time: timestamps
                .iter()
                .map(|ts| format_local(*ts, offset, "%Y-%m-%d"))
                .collect::<Result<_>>()?,
            sunrise: clock("sunrise")?,
            sunset: clock("sunset")?,
        },
        location: response.location,
    })
}
