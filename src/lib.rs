//! Proxy meteorológico sobre Open-Meteo y base de conocimiento con búsqueda
//! semántica (embeddings + reranking).

pub mod api;
pub mod app_state;
pub mod chunking;
pub mod config;
pub mod dms;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod open_meteo;
pub mod search;
pub mod vector_store;
pub mod weather_api;
pub mod weather_service;
