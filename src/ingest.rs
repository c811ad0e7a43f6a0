//! Ingesta de documentos subidos en la base de conocimiento.
//!
//! Flujo de una subida:
//!   1. Validar nombre y tipo (antes de tocar disco o vector store).
//!   2. Volcar los bytes a un temporal en `<upload_dir>/.incoming`.
//!   3. Extraer texto, trocear y calcular embeddings en un único lote.
//!   4. Sustituir los chunks previos del mismo fichero e insertar los nuevos.
//!   5. Mover el temporal a `<upload_dir>/<filename>` (último paso).
//!
//! Cualquier fallo elimina el temporal. El borrado va en orden inverso:
//! primero los vectores, después el fichero. `reconcile` repara al arrancar
//! lo que haya quedado a medias.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::TextSplitter;
use crate::config::{ChunkingConfig, SearchConfig};
use crate::error::{ApiError, ApiResult};
use crate::extract::DocumentKind;
use crate::llm::{Embedder, Reranker};
use crate::models::{ChunkView, DocumentChunk, DocumentInfo};
use crate::vector_store::VectorStore;

/// Subdirectorio de temporales dentro del directorio de subidas.
pub const INCOMING_DIR: &str = ".incoming";

pub const UNSUPPORTED_TYPE: &str = "File type not supported";
pub const FILE_NOT_FOUND: &str = "File not found";
pub const EMPTY_DOCUMENT: &str = "No text could be extracted from the file";

/// Resumen de la reconciliación de arranque.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stale_temp_files: usize,
    /// Ficheros cuyos chunks se borraron por no existir el fichero.
    pub orphaned_documents: Vec<String>,
    /// Ficheros presentes en disco pero sin chunks.
    pub unindexed_files: Vec<String>,
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reconciliación: {} temporales eliminados, {} documentos huérfanos limpiados, {} ficheros sin indexar.",
            self.stale_temp_files,
            self.orphaned_documents.len(),
            self.unindexed_files.len()
        )
    }
}

/// Servicio de la base de conocimiento: ingesta, borrado, listados y
/// búsqueda (en `search`).
#[derive(Clone)]
pub struct KnowledgeBase {
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) reranker: Arc<dyn Reranker>,
    pub(crate) limits: SearchConfig,
    upload_dir: PathBuf,
}

/// Valida el nombre recibido y se queda sólo con el último componente.
pub fn sanitize_filename(raw: &str) -> ApiResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name.starts_with('.') || name.chars().any(char::is_control) {
        return Err(ApiError::InvalidInput(format!("Invalid filename: {raw:?}")));
    }
    Ok(name.to_string())
}

/// Ficheros durables (sin temporales ni ocultos) con su tamaño.
fn stored_files(dir: &Path) -> Result<Vec<(String, u64)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("No se pudo recorrer {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push((name, size));
    }
    files.sort();
    Ok(files)
}

fn upstream<'a>(
    operation: &'static str,
    filename: &'a str,
) -> impl FnOnce(anyhow::Error) -> ApiError + 'a {
    move |err| {
        error!("Error en {operation} de '{filename}': {err:#}");
        ApiError::from(err)
    }
}

impl KnowledgeBase {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        upload_dir: impl Into<PathBuf>,
        limits: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            limits,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Procesa un fichero subido y devuelve el nombre con el que quedó guardado.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        raw_filename: &str,
        chunking: ChunkingConfig,
    ) -> ApiResult<String> {
        let filename = sanitize_filename(raw_filename)?;
        let kind = DocumentKind::from_filename(&filename).ok_or_else(|| {
            warn!("Tipo de fichero no soportado: {filename}");
            ApiError::InvalidInput(UNSUPPORTED_TYPE.to_string())
        })?;
        info!("Subida de '{filename}' ({} bytes, {kind:?})", bytes.len());

        let incoming = self.upload_dir.join(INCOMING_DIR);
        tokio::fs::create_dir_all(&incoming)
            .await
            .with_context(|| format!("No se pudo crear {}", incoming.display()))
            .map_err(upstream("preparación", &filename))?;

        // El temporal se borra al soltarse, en cualquier camino de error.
        let extraction = tokio::task::spawn_blocking(move || -> Result<(NamedTempFile, String)> {
            let mut temp = NamedTempFile::new_in(&incoming)
                .with_context(|| format!("No se pudo crear un temporal en {}", incoming.display()))?;
            temp.write_all(&bytes).context("No se pudo escribir el temporal")?;
            temp.flush()?;
            let text = kind.extract(temp.path())?;
            Ok((temp, text))
        })
        .await
        .map_err(|e| anyhow!("La extracción de texto se interrumpió: {e}"))
        .and_then(|result| result);
        let (temp, text) = extraction.map_err(upstream("extracción", &filename))?;

        let pieces = TextSplitter::new(chunking).split(&text);
        if pieces.is_empty() {
            warn!("'{filename}' no contiene texto útil");
            return Err(ApiError::InvalidInput(EMPTY_DOCUMENT.to_string()));
        }

        let embeddings = self
            .embedder
            .embed_documents(&pieces)
            .await
            .map_err(upstream("embeddings", &filename))?;
        if embeddings.len() != pieces.len() {
            return Err(upstream("embeddings", &filename)(anyhow!(
                "Se esperaban {} embeddings y llegaron {}",
                pieces.len(),
                embeddings.len()
            )));
        }

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| DocumentChunk {
                id: Uuid::new_v4().to_string(),
                filename: filename.clone(),
                chunk_index,
                text,
                embedding,
            })
            .collect();

        let replaced = self
            .store
            .delete_by_filename(&filename)
            .await
            .map_err(upstream("sustitución", &filename))?;
        if replaced > 0 {
            info!("'{filename}' ya existía: {replaced} chunks antiguos sustituidos");
        }
        self.store
            .insert(&chunks)
            .await
            .map_err(upstream("indexación", &filename))?;

        let destination = self.upload_dir.join(&filename);
        if let Err(err) = temp.persist(&destination) {
            // Sin fichero durable los chunks quedarían huérfanos.
            if let Err(rollback) = self.store.delete_by_filename(&filename).await {
                error!("No se pudieron revertir los chunks de '{filename}': {rollback:#}");
            }
            return Err(upstream("guardado", &filename)(
                anyhow!(err.error).context(format!("No se pudo guardar {}", destination.display())),
            ));
        }

        info!("Ingerido '{filename}' con {} chunks", chunks.len());
        Ok(filename)
    }

    /// Borra un documento y todos sus vectores. Devuelve los chunks eliminados.
    pub async fn delete_document(&self, raw_filename: &str) -> ApiResult<usize> {
        // Sólo se aceptan nombres tal y como se guardaron: "a/b.txt" no es "b.txt".
        let filename = match sanitize_filename(raw_filename) {
            Ok(name) if name == raw_filename => name,
            _ => {
                warn!("Borrado con nombre no válido: {raw_filename:?}");
                return Err(ApiError::NotFound(FILE_NOT_FOUND.to_string()));
            }
        };
        let path = self.upload_dir.join(&filename);

        let exists = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !exists {
            warn!("Borrado de documento inexistente: {filename}");
            return Err(ApiError::NotFound(FILE_NOT_FOUND.to_string()));
        }

        let deleted = self
            .store
            .delete_by_filename(&filename)
            .await
            .map_err(upstream("borrado de vectores", &filename))?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("No se pudo borrar {}", path.display()))
            .map_err(upstream("borrado", &filename))?;

        info!("Documento '{filename}' borrado junto con {deleted} chunks");
        Ok(deleted)
    }

    /// Documentos guardados, con su tamaño y número de chunks.
    pub async fn list_documents(&self) -> ApiResult<Vec<DocumentInfo>> {
        let files = self.files().await?;
        let counts = self.store.chunk_counts().await?;

        Ok(files
            .into_iter()
            .map(|(filename, size_bytes)| DocumentInfo {
                chunks: counts.get(&filename).copied().unwrap_or(0),
                filename,
                size_bytes,
            })
            .collect())
    }

    /// Chunks (sin vector) de un documento o de todos.
    pub async fn list_chunks(&self, filename: Option<&str>) -> ApiResult<Vec<ChunkView>> {
        let chunks = self.store.list(filename).await?;
        Ok(chunks.into_iter().map(ChunkView::from).collect())
    }

    async fn files(&self) -> Result<Vec<(String, u64)>> {
        let dir = self.upload_dir.clone();
        tokio::task::spawn_blocking(move || stored_files(&dir))
            .await
            .map_err(|e| anyhow!("Listado de ficheros interrumpido: {e}"))?
    }

    /// Repara el estado tras una parada a mitad de subida o borrado.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", self.upload_dir.display()))?;

        let mut report = ReconcileReport::default();

        let incoming = self.upload_dir.join(INCOMING_DIR);
        if incoming.is_dir() {
            for entry in WalkDir::new(&incoming).min_depth(1).max_depth(1) {
                let entry = entry?;
                if entry.file_type().is_file() {
                    tokio::fs::remove_file(entry.path())
                        .await
                        .with_context(|| format!("No se pudo borrar {}", entry.path().display()))?;
                    report.stale_temp_files += 1;
                }
            }
        }

        let files: BTreeSet<String> = self.files().await?.into_iter().map(|(name, _)| name).collect();
        let counts = self.store.chunk_counts().await?;

        for filename in counts.keys() {
            if !files.contains(filename) {
                let deleted = self.store.delete_by_filename(filename).await?;
                warn!("'{filename}' no existe en disco: {deleted} chunks huérfanos eliminados");
                report.orphaned_documents.push(filename.clone());
            }
        }
        for filename in &files {
            if !counts.contains_key(filename) {
                warn!("'{filename}' está en disco pero no tiene chunks; vuelva a subirlo o bórrelo");
                report.unindexed_files.push(filename.clone());
            }
        }

        info!("{report}");
        Ok(report)
    }
}
