use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{ChunkingConfig, KnowledgeBaseConfig, WeatherConfig};
use crate::ingest::KnowledgeBase;
use crate::weather_service::WeatherService;

#[derive(Clone)]
pub struct WeatherState {
    pub config: WeatherConfig,
    pub weather: WeatherService,
}

#[derive(Clone)]
pub struct KnowledgeState {
    pub config: KnowledgeBaseConfig,
    pub kb: KnowledgeBase,
    /// Ajustes de troceado vigentes; cada subida se queda con una copia.
    pub chunking: Arc<RwLock<ChunkingConfig>>,
}

impl KnowledgeState {
    pub fn new(config: KnowledgeBaseConfig, kb: KnowledgeBase) -> Self {
        let chunking = Arc::new(RwLock::new(config.chunking));
        Self { config, kb, chunking }
    }
}
