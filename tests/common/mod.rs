//! Dobles de prueba para los servicios externos de embeddings y reranking.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use meteo_kb::config::{
    ChunkingConfig, CorsOrigins, KnowledgeBaseConfig, SearchConfig, ServerConfig, VectorBackend,
};
use meteo_kb::ingest::KnowledgeBase;
use meteo_kb::llm::{Embedder, RerankHit, Reranker};
use meteo_kb::vector_store::LocalVectorStore;
use url::Url;

const DIMENSIONS: usize = 64;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Bolsa de palabras con hashing: textos con palabras comunes quedan cerca.
#[derive(Default)]
pub struct HashingEmbedder {
    pub document_batches: Mutex<Vec<usize>>,
}

impl HashingEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSIONS];
        for word in words(text) {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % DIMENSIONS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.document_batches.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }
}

/// Puntúa por proporción de palabras de la consulta presentes en el documento.
#[derive(Default)]
pub struct OverlapReranker {
    pub calls: Mutex<usize>,
}

#[async_trait]
impl Reranker for OverlapReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>> {
        *self.calls.lock().unwrap() += 1;
        let query_words: HashSet<String> = words(query).collect();

        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_words: HashSet<String> = words(doc).collect();
                let shared = query_words.intersection(&doc_words).count();
                RerankHit {
                    index,
                    relevance_score: shared as f64 / query_words.len().max(1) as f64,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
        hits.truncate(top_n);
        Ok(hits)
    }
}

pub struct Harness {
    pub kb: KnowledgeBase,
    pub store: Arc<LocalVectorStore>,
    pub embedder: Arc<HashingEmbedder>,
    pub reranker: Arc<OverlapReranker>,
}

pub fn harness(upload_dir: &Path) -> Harness {
    harness_with_store(upload_dir, Arc::new(LocalVectorStore::in_memory()))
}

pub fn harness_with_store(upload_dir: &Path, store: Arc<LocalVectorStore>) -> Harness {
    let embedder = Arc::new(HashingEmbedder::default());
    let reranker = Arc::new(OverlapReranker::default());
    let kb = KnowledgeBase::new(
        store.clone(),
        embedder.clone(),
        reranker.clone(),
        upload_dir,
        SearchConfig::default(),
    );
    Harness { kb, store, embedder, reranker }
}

/// Configuración mínima para montar el router en tests.
pub fn kb_config(upload_dir: &Path) -> KnowledgeBaseConfig {
    KnowledgeBaseConfig {
        server: ServerConfig {
            server_addr: "127.0.0.1:0".to_string(),
            http_timeout: Duration::from_secs(5),
            cors_origins: CorsOrigins::Any,
        },
        cohere_api_key: "test-key".to_string(),
        cohere_base_url: Url::parse("http://127.0.0.1:9").unwrap(),
        embed_model: "embed-multilingual-v3.0".to_string(),
        rerank_model: "rerank-v3.5".to_string(),
        chunking: ChunkingConfig::default(),
        search: SearchConfig::default(),
        upload_dir: upload_dir.to_path_buf(),
        db_path: upload_dir.join("db"),
        static_dir: upload_dir.join("static"),
        vector_backend: VectorBackend::Local,
        neo4j: None,
    }
}
