//! Búsqueda semántica en dos fases:
//!   1. Recuperación vectorial de un conjunto amplio de candidatos.
//!   2. Reranking de esos candidatos con el modelo de relevancia.
//!
//! Cada acierto del reranker se casa con su candidato por índice, y el id
//! del chunk viaja hasta la respuesta en `metadata.chunk_id`.

use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::ingest::KnowledgeBase;
use crate::models::SearchResult;

impl KnowledgeBase {
    /// Número de candidatos a recuperar antes del reranking.
    pub fn candidate_count(&self, limit: usize) -> usize {
        limit.saturating_mul(3).max(self.limits.max_initial_results)
    }

    /// Resultados ordenados de mayor a menor relevancia; como mucho `limit`.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> ApiResult<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::InvalidInput("Query must not be empty".to_string()));
        }
        let limit = limit.unwrap_or(self.limits.default_limit);
        if limit == 0 || limit > self.limits.max_limit {
            return Err(ApiError::InvalidInput(format!(
                "limit must be between 1 and {}",
                self.limits.max_limit
            )));
        }

        let top_k = self.candidate_count(limit);
        info!("Búsqueda '{query}' (limit={limit}, candidatos={top_k})");

        let embedding = self.embedder.embed_query(query).await.map_err(|err| {
            error!("Error generando el embedding de la búsqueda: {err:#}");
            ApiError::from(err)
        })?;
        let candidates = self.store.search(&embedding, top_k).await.map_err(|err| {
            error!("Error consultando el vector store: {err:#}");
            ApiError::from(err)
        })?;

        if candidates.is_empty() {
            info!("Sin candidatos para '{query}'");
            return Ok(Vec::new());
        }

        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let hits = self
            .reranker
            .rerank(query, &documents, limit)
            .await
            .map_err(|err| {
                error!("Error en el reranking: {err:#}");
                ApiError::from(err)
            })?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let candidate = candidates.get(hit.index).ok_or_else(|| {
                error!("El reranker devolvió un índice inexistente: {}", hit.index);
                ApiError::Upstream(format!("Rerank index {} out of range", hit.index))
            })?;
            results.push(SearchResult {
                content: candidate.chunk.text.clone(),
                metadata: candidate.chunk.metadata(),
                relevance_score: hit.relevance_score,
            });
        }
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        info!("Búsqueda '{query}': {} resultados", results.len());
        Ok(results)
    }
}
