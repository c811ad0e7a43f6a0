//! Carga y gestión de configuración de los dos servicios (meteorología y
//! base de conocimiento) a partir de variables de entorno.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Lee una variable de entorno y la parsea, usando `default` si no existe.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Orígenes permitidos por CORS.
#[derive(Clone, Debug, PartialEq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    pub fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }
}

/// Parámetros comunes del servidor HTTP.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub server_addr: String,
    pub http_timeout: Duration,
    pub cors_origins: CorsOrigins,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_addr: env_string("SERVER_ADDR", "0.0.0.0:8000"),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 30u64)?),
            cors_origins: CorsOrigins::parse(&env_string("CORS_ALLOW_ORIGINS", "*")),
        })
    }
}

/// Configuración del proxy meteorológico.
#[derive(Clone, Debug)]
pub struct WeatherConfig {
    pub server: ServerConfig,
    pub forecast_url: Url,
    pub timezone: String,
    pub past_days: u32,
    pub forecast_days: u32,
}

impl WeatherConfig {
    pub fn from_env() -> Result<Self> {
        let raw_url = env_string("OPEN_METEO_URL", "https://api.open-meteo.com/v1/forecast");
        let forecast_url =
            Url::parse(&raw_url).with_context(|| format!("OPEN_METEO_URL inválida: {raw_url}"))?;

        Ok(Self {
            server: ServerConfig::from_env()?,
            forecast_url,
            timezone: env_string("WEATHER_TIMEZONE", "Asia/Singapore"),
            past_days: env_or("WEATHER_PAST_DAYS", 5)?,
            forecast_days: env_or("WEATHER_FORECAST_DAYS", 3)?,
        })
    }
}

/// Motor de almacenamiento vectorial.
#[derive(Clone, Debug, PartialEq)]
pub enum VectorBackend {
    Local,
    Neo4j,
}

impl FromStr for VectorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" | "memory" => Ok(Self::Local),
            "neo4j" => Ok(Self::Neo4j),
            other => Err(anyhow!("Vector store no soportado: {other}")),
        }
    }
}

/// Credenciales de Neo4j, sólo necesarias con `VECTOR_STORE=neo4j`.
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub embedding_dimensions: usize,
}

/// Tamaño y solapamiento de los chunks. Se toma una copia por cada subida,
/// así que cambiarlo sólo afecta a las ingestas posteriores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("chunkSize must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(anyhow!(
                "chunkOverlap ({}) must be smaller than chunkSize ({})",
                self.chunk_overlap,
                self.chunk_size
            ));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Límites de la búsqueda semántica.
#[derive(Clone, Copy, Debug)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_initial_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
            max_initial_results: 20,
        }
    }
}

/// Configuración completa de la base de conocimiento.
#[derive(Clone, Debug)]
pub struct KnowledgeBaseConfig {
    pub server: ServerConfig,

    pub cohere_api_key: String,
    pub cohere_base_url: Url,
    pub embed_model: String,
    pub rerank_model: String,

    pub chunking: ChunkingConfig,
    pub search: SearchConfig,

    pub upload_dir: PathBuf,
    pub db_path: PathBuf,
    pub static_dir: PathBuf,

    pub vector_backend: VectorBackend,
    pub neo4j: Option<Neo4jConfig>,
}

impl KnowledgeBaseConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let cohere_api_key = env::var("COHERE_API_KEY")
            .map_err(|_| anyhow!("Falta COHERE_API_KEY en el entorno"))?;
        let raw_base = env_string("COHERE_BASE_URL", "https://api.cohere.com");
        let cohere_base_url =
            Url::parse(&raw_base).with_context(|| format!("COHERE_BASE_URL inválida: {raw_base}"))?;

        let chunking = ChunkingConfig {
            chunk_size: env_or("CHUNK_SIZE", 1000)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", 200)?,
        };
        chunking.validate()?;

        let search = SearchConfig {
            default_limit: env_or("DEFAULT_SEARCH_LIMIT", 5)?,
            max_limit: env_or("MAX_SEARCH_LIMIT", 50)?,
            max_initial_results: env_or("MAX_INITIAL_RESULTS", 20)?,
        };
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            return Err(anyhow!(
                "DEFAULT_SEARCH_LIMIT debe estar entre 1 y MAX_SEARCH_LIMIT ({})",
                search.max_limit
            ));
        }

        let vector_backend: VectorBackend = env_string("VECTOR_STORE", "local").parse()?;
        let neo4j = match vector_backend {
            VectorBackend::Neo4j => Some(Neo4jConfig {
                uri: env::var("NEO4J_URI").map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
                embedding_dimensions: env_or("EMBEDDING_DIMENSIONS", 1024)?,
            }),
            VectorBackend::Local => None,
        };

        Ok(Self {
            server: ServerConfig::from_env()?,
            cohere_api_key,
            cohere_base_url,
            embed_model: env_string("COHERE_EMBED_MODEL", "embed-multilingual-v3.0"),
            rerank_model: env_string("COHERE_RERANK_MODEL", "rerank-v3.5"),
            chunking,
            search,
            upload_dir: PathBuf::from(env_string("UPLOAD_DIR", "uploads")),
            db_path: PathBuf::from(env_string("DB_PATH", "lancedb")),
            static_dir: PathBuf::from(env_string("STATIC_DIR", "static")),
            vector_backend,
            neo4j,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_wildcard_and_lists() {
        assert_eq!(CorsOrigins::parse("*"), CorsOrigins::Any);
        assert_eq!(CorsOrigins::parse(""), CorsOrigins::Any);
        assert_eq!(
            CorsOrigins::parse("http://a.test, http://b.test"),
            CorsOrigins::List(vec!["http://a.test".into(), "http://b.test".into()])
        );
    }

    #[test]
    fn chunking_overlap_must_be_smaller_than_size() {
        assert!(ChunkingConfig::default().validate().is_ok());
        let bad = ChunkingConfig { chunk_size: 100, chunk_overlap: 100 };
        assert!(bad.validate().is_err());
        let zero = ChunkingConfig { chunk_size: 0, chunk_overlap: 0 };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn vector_backend_parsing() {
        assert_eq!("NEO4J".parse::<VectorBackend>().unwrap(), VectorBackend::Neo4j);
        assert_eq!("local".parse::<VectorBackend>().unwrap(), VectorBackend::Local);
        assert!("lancedb".parse::<VectorBackend>().is_err());
    }

    #[test]
    fn chunking_settings_use_camel_case() {
        let json = serde_json::to_value(ChunkingConfig::default()).unwrap();
        assert_eq!(json["chunkSize"], 1000);
        assert_eq!(json["chunkOverlap"], 200);
    }
}
