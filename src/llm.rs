//! Abstracción sobre los servicios de embeddings y reranking alojados.
//! De momento se implementa Cohere (API v2) sobre `reqwest`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::config::KnowledgeBaseConfig;

/// Máximo de textos que Cohere acepta en una llamada a `/v2/embed`.
pub const EMBED_BATCH_SIZE: usize = 96;

/// Cálculo de embeddings para documentos y consultas.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeddings de un lote de textos a indexar, en el mismo orden.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Posición de un candidato tras el reranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    /// Índice en la lista de documentos enviada.
    pub index: usize,
    pub relevance_score: f64,
}

/// Reordenación de candidatos con un modelo de relevancia.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Devuelve como mucho `top_n` aciertos, del más relevante al menos.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>>;
}

/// Cliente de la API de Cohere.
#[derive(Debug, Clone)]
pub struct CohereClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    embed_model: String,
    rerank_model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
    embedding_types: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: EmbedVectors,
}

#[derive(Deserialize)]
struct EmbedVectors {
    float: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

impl CohereClient {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        api_key: impl Into<String>,
        embed_model: impl Into<String>,
        rerank_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.into(),
            embed_model: embed_model.into(),
            rerank_model: rerank_model.into(),
        }
    }

    pub fn from_config(client: reqwest::Client, cfg: &KnowledgeBaseConfig) -> Self {
        Self::new(
            client,
            cfg.cohere_base_url.clone(),
            cfg.cohere_api_key.clone(),
            cfg.embed_model.clone(),
            cfg.rerank_model.clone(),
        )
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Ruta de Cohere inválida: {path}"))?;

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Fallo llamando a Cohere {path}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Cohere {path} respondió {status}: {body}");
            return Err(anyhow!("Cohere {path} respondió {status}: {body}"));
        }

        resp.json::<R>()
            .await
            .with_context(|| format!("Respuesta de Cohere {path} no reconocida"))
    }

    /// Embeddings en lotes de como mucho `EMBED_BATCH_SIZE` textos,
    /// concatenados en el orden de entrada.
    async fn embed(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let request = EmbedRequest {
                model: &self.embed_model,
                texts: batch,
                input_type,
                embedding_types: ["float"],
            };
            let response: EmbedResponse = self.post("/v2/embed", &request).await?;
            let batch_vectors = response.embeddings.float;

            if batch_vectors.len() != batch.len() {
                return Err(anyhow!(
                    "Número de embeddings ({}) distinto al número de textos ({})",
                    batch_vectors.len(),
                    batch.len()
                ));
            }
            vectors.extend(batch_vectors);
        }

        debug!("Cohere devolvió {} embeddings ({input_type})", vectors.len());
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for CohereClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, "search_document").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()], "search_query")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la query"))
    }
}

#[async_trait]
impl Reranker for CohereClient {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>> {
        if documents.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            model: &self.rerank_model,
            query,
            documents,
            top_n: top_n.min(documents.len()),
        };
        let response: RerankResponse = self.post("/v2/rerank", &request).await?;

        response
            .results
            .into_iter()
            .map(|r| {
                if r.index >= documents.len() {
                    return Err(anyhow!(
                        "Cohere devolvió un índice de rerank fuera de rango: {}",
                        r.index
                    ));
                }
                Ok(RerankHit {
                    index: r.index,
                    relevance_score: r.relevance_score,
                })
            })
            .collect()
    }
}
