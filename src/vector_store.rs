//! Vector store para los chunks de documentos.
//!
//! API pública:
//!   - trait `VectorStore` (insertar, buscar, borrar por fichero, listar).
//!   - `LocalVectorStore`: almacén en memoria con instantánea JSON en disco.
//!
//! La implementación sobre Neo4j vive en `neo4j_client`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{ChunkCounts, DocumentChunk, ScoredChunk};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserta chunks con su embedding ya calculado.
    async fn insert(&self, chunks: &[DocumentChunk]) -> Result<()>;

    /// Los `top_k` chunks más similares, por puntuación descendente.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Borra todos los chunks cuyo `filename` coincide exactamente.
    /// Devuelve cuántos se eliminaron.
    async fn delete_by_filename(&self, filename: &str) -> Result<usize>;

    /// Chunks de un fichero (o de todos), ordenados por fichero e índice.
    async fn list(&self, filename: Option<&str>) -> Result<Vec<DocumentChunk>>;

    /// Número de chunks por fichero.
    async fn chunk_counts(&self) -> Result<ChunkCounts>;
}

/// Similitud coseno; 0.0 si alguno de los vectores es nulo.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sort_chunks(chunks: &mut [DocumentChunk]) {
    chunks.sort_by(|a, b| {
        a.filename
            .cmp(&b.filename)
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

/// Almacén local: chunks indexados por id en memoria, persistidos como JSON
/// en `<db_path>/chunks.json` tras cada escritura. Una escritura sólo se
/// aplica en memoria si la instantánea se guardó.
#[derive(Debug, Default)]
pub struct LocalVectorStore {
    chunks: RwLock<HashMap<String, DocumentChunk>>,
    snapshot: Option<PathBuf>,
}

impl LocalVectorStore {
    /// Almacén sin persistencia (tests y desarrollo).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Abre (o crea) el almacén persistido en `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("No se pudo crear {}", dir.display()))?;
        let snapshot = dir.join("chunks.json");

        let chunks: Vec<DocumentChunk> = match tokio::fs::read(&snapshot).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Instantánea corrupta: {}", snapshot.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("No se pudo leer la instantánea del vector store"),
        };
        info!("Vector store local cargado con {} chunks desde {}", chunks.len(), snapshot.display());

        Ok(Self {
            chunks: RwLock::new(chunks.into_iter().map(|c| (c.id.clone(), c)).collect()),
            snapshot: Some(snapshot),
        })
    }

    /// Escritura atómica: fichero temporal + rename.
    async fn persist(&self, chunks: &HashMap<String, DocumentChunk>) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let mut all: Vec<&DocumentChunk> = chunks.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        let data = serde_json::to_vec(&all)?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("No se pudo escribir {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("No se pudo reemplazar {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn insert(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut store = self.chunks.write().await;
        let mut next = store.clone();
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                warn!("Chunk {} de {} sin embedding", chunk.id, chunk.filename);
            }
            next.insert(chunk.id.clone(), chunk.clone());
        }
        self.persist(&next).await?;
        *store = next;
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let store = self.chunks.read().await;
        let mut scored: Vec<ScoredChunk> = store
            .values()
            .map(|chunk| ScoredChunk {
                score: f64::from(cosine_similarity(&chunk.embedding, embedding)),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let mut store = self.chunks.write().await;
        let mut next = store.clone();
        next.retain(|_, chunk| chunk.filename != filename);
        let deleted = store.len() - next.len();
        if deleted > 0 {
            self.persist(&next).await?;
            *store = next;
        }
        Ok(deleted)
    }

    async fn list(&self, filename: Option<&str>) -> Result<Vec<DocumentChunk>> {
        let store = self.chunks.read().await;
        let mut chunks: Vec<DocumentChunk> = store
            .values()
            .filter(|c| filename.map_or(true, |f| c.filename == f))
            .cloned()
            .collect();
        sort_chunks(&mut chunks);
        Ok(chunks)
    }

    async fn chunk_counts(&self) -> Result<ChunkCounts> {
        let store = self.chunks.read().await;
        let mut counts = ChunkCounts::new();
        for chunk in store.values() {
            *counts.entry(chunk.filename.clone()).or_default() += 1;
        }
        Ok(counts)
    }
}
