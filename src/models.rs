//! Modelos de dominio: respuestas del proxy meteorológico y estructuras de
//! documentos, chunks y resultados de búsqueda de la base de conocimiento.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------
// METEOROLOGÍA
// ---------------------------------------------------------------------

/// Ubicación resuelta por la API de previsión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub rain: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_gusts: Option<f64>,
    /// Hora local ISO-8601 sin desplazamiento.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub location: Location,
    pub current: CurrentReading,
}

/// Series horarias paralelas: el índice N de cada vector corresponde a `time[N]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    pub temperature: Vec<Option<f64>>,
    pub humidity: Vec<Option<f64>>,
    pub apparent_temperature: Vec<Option<f64>>,
    pub precipitation: Vec<Option<f64>>,
    pub rain: Vec<Option<f64>>,
    pub showers: Vec<Option<f64>>,
    pub weather_code: Vec<Option<f64>>,
    pub cloud_cover: Vec<Option<f64>>,
    pub wind_speed_10m: Vec<Option<f64>>,
    pub wind_speed_80m: Vec<Option<f64>>,
    pub wind_speed_120m: Vec<Option<f64>>,
    pub wind_direction_180m: Vec<Option<f64>>,
    pub wind_gusts_10m: Vec<Option<f64>>,
    pub uv_index: Vec<Option<f64>>,
    pub uv_index_clear_sky: Vec<Option<f64>>,
    pub is_day: Vec<Option<f64>>,
    pub weather_description: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyWeather {
    pub location: Location,
    pub hourly: HourlySeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub time: Vec<String>,
    /// Hora local HH:MM; `None` cuando no hay orto/ocaso (latitudes polares).
    pub sunrise: Vec<Option<String>>,
    pub sunset: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWeather {
    pub location: Location,
    pub daily: DailySeries,
}

// ---------------------------------------------------------------------
// BASE DE CONOCIMIENTO
// ---------------------------------------------------------------------

/// Metadatos que acompañan a cada chunk en el vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub chunk_index: usize,
    pub chunk_id: String,
}

/// Trozo de texto de un documento con su embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            filename: self.filename.clone(),
            chunk_index: self.chunk_index,
            chunk_id: self.id.clone(),
        }
    }
}

/// Chunk recuperado por similitud vectorial, antes del reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// Resultado de búsqueda devuelto al cliente, ya reordenado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub relevance_score: f64,
}

/// Vista de un chunk sin el vector, para el listado del frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkView {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl From<DocumentChunk> for ChunkView {
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            metadata: chunk.metadata(),
            content: chunk.text,
        }
    }
}

/// Documento persistido en el directorio de subidas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub chunks: usize,
}

/// Número de chunks por nombre de fichero.
pub type ChunkCounts = BTreeMap<String, usize>;
