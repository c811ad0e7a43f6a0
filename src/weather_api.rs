//! Rutas HTTP del proxy meteorológico (`/api/v1/weather/...`).

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    app_state::WeatherState,
    dms::{parse_dms_pair, DMS_EXAMPLE},
    error::{ApiError, ApiResult},
    models::{CurrentWeather, DailyWeather, HourlyWeather},
    open_meteo::Elevation,
};

pub const API_V1_PREFIX: &str = "/api/v1";

#[derive(Debug, Deserialize)]
pub struct CoordinatesQuery {
    lat: f64,
    lon: f64,
    /// Metros; `nan` desactiva el downscaling, ausente usa el DEM.
    elevation: Option<f64>,
}

impl CoordinatesQuery {
    fn elevation(&self) -> Elevation {
        Elevation::from_query(self.elevation)
    }
}

#[derive(Debug, Deserialize)]
pub struct CityQuery {
    city: String,
}

#[derive(Debug, Deserialize)]
pub struct DmsQuery {
    coordinates: String,
}

pub fn create_router(state: WeatherState) -> Router {
    let weather = Router::new()
        .route("/weather/current", get(current_handler))
        .route("/weather/hourly", get(hourly_handler))
        .route("/weather/daily", get(daily_handler))
        .route("/weather/city", get(city_handler))
        .route("/weather/current/dms", get(current_dms_handler));

    Router::new()
        .nest(API_V1_PREFIX, weather)
        .route("/health", get(health_handler))
        .with_state(state)
}

#[axum::debug_handler]
async fn current_handler(
    State(state): State<WeatherState>,
    query: Result<Query<CoordinatesQuery>, QueryRejection>,
) -> ApiResult<Json<CurrentWeather>> {
    let Query(q) = query?;
    let weather = state.weather.get_current_weather(q.lat, q.lon, q.elevation()).await?;
    Ok(Json(weather))
}

#[axum::debug_handler]
async fn hourly_handler(
    State(state): State<WeatherState>,
    query: Result<Query<CoordinatesQuery>, QueryRejection>,
) -> ApiResult<Json<HourlyWeather>> {
    let Query(q) = query?;
    let weather = state.weather.get_hourly_weather(q.lat, q.lon, q.elevation()).await?;
    Ok(Json(weather))
}

#[axum::debug_handler]
async fn daily_handler(
    State(state): State<WeatherState>,
    query: Result<Query<CoordinatesQuery>, QueryRejection>,
) -> ApiResult<Json<DailyWeather>> {
    let Query(q) = query?;
    let weather = state.weather.get_daily_weather(q.lat, q.lon, q.elevation()).await?;
    Ok(Json(weather))
}

#[axum::debug_handler]
async fn city_handler(
    State(state): State<WeatherState>,
    query: Result<Query<CityQuery>, QueryRejection>,
) -> ApiResult<Json<CurrentWeather>> {
    let Query(q) = query?;
    let weather = state.weather.get_weather_by_city(&q.city).await?;
    Ok(Json(weather))
}

#[axum::debug_handler]
async fn current_dms_handler(
    State(state): State<WeatherState>,
    query: Result<Query<DmsQuery>, QueryRejection>,
) -> ApiResult<Json<CurrentWeather>> {
    let Query(q) = query.map_err(|e| {
        warn!("Petición DMS sin coordenadas válidas: {e}");
        invalid_dms()
    })?;
    let (lat, lon) = parse_dms_pair(&q.coordinates).map_err(|e| {
        warn!("Coordenadas DMS inválidas: {e}");
        invalid_dms()
    })?;
    let weather = state.weather.get_current_weather(lat, lon, Elevation::Auto).await?;
    Ok(Json(weather))
}

fn invalid_dms() -> ApiError {
    ApiError::InvalidInput(format!(
        "Invalid coordinates format. Please use format like: {DMS_EXAMPLE}"
    ))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_dms_message_names_the_example() {
        let err = invalid_dms();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains(r#"35°52'59.9"N 76°30'48.4"E"#));
    }

    #[test]
    fn nan_elevation_query_maps_to_disabled() {
        let q: CoordinatesQuery =
            serde_json::from_value(json!({"lat": 1.0, "lon": 2.0})).unwrap();
        assert_eq!(q.elevation(), Elevation::Auto);

        let q = CoordinatesQuery { lat: 1.0, lon: 2.0, elevation: Some(f64::NAN) };
        assert_eq!(q.elevation(), Elevation::Disabled);
    }
}
