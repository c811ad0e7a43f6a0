//! Integración con Neo4j como vector store para los `:Chunk`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

use crate::config::Neo4jConfig;
use crate::models::{ChunkCounts, DocumentChunk, ScoredChunk};
use crate::vector_store::VectorStore;

const INDEX_NAME: &str = "chunkEmbeddingIndex";

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea el constraint de unicidad de `Chunk.id` y el índice por fichero.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
        "CREATE INDEX chunk_filename IF NOT EXISTS
         FOR (c:Chunk)
         ON (c.filename)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado.");
    Ok(())
}

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph, dimensions: usize) -> Result<()> {
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{INDEX_NAME}' creado ({dimensions} dimensiones).");
    Ok(())
}

/// Vector store respaldado por el índice vectorial de Neo4j.
#[derive(Clone)]
pub struct Neo4jVectorStore {
    graph: Arc<Graph>,
}

impl Neo4jVectorStore {
    /// Conecta y prepara esquema e índice.
    pub async fn connect(cfg: &Neo4jConfig) -> Result<Self> {
        let graph = connect_from_config(cfg).await?;
        ensure_schema(&graph).await?;
        ensure_chunk_vector_index(&graph, cfg.embedding_dimensions).await?;
        Ok(Self { graph: Arc::new(graph) })
    }

    fn row_to_chunk(row: &neo4rs::Row) -> Result<DocumentChunk> {
        let field = |name: &str| anyhow!("Falta campo '{name}' en resultado de Neo4j");
        let id: String = row.get("id").ok_or_else(|| field("id"))?;
        let filename: String = row.get("filename").ok_or_else(|| field("filename"))?;
        let chunk_index: i64 = row.get("chunk_index").ok_or_else(|| field("chunk_index"))?;
        let text: String = row.get("text").ok_or_else(|| field("text"))?;

        Ok(DocumentChunk {
            id,
            filename,
            chunk_index: usize::try_from(chunk_index)?,
            text,
            // El vector no se devuelve en las consultas de lectura.
            embedding: Vec::new(),
        })
    }
}

#[async_trait]
impl VectorStore for Neo4jVectorStore {
    async fn insert(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let tx = self.graph.start_txn().await?;
        for chunk in chunks {
            let embedding: Vec<f64> = chunk.embedding.iter().map(|v| f64::from(*v)).collect();
            tx.run(
                query(
                    "MERGE (c:Chunk {id: $id})
                     SET c.filename = $filename, c.chunk_index = $chunk_index,
                         c.text = $text, c.embedding = $embedding",
                )
                .param("id", chunk.id.clone())
                .param("filename", chunk.filename.clone())
                .param("chunk_index", chunk.chunk_index as i64)
                .param("text", chunk.text.clone())
                .param("embedding", embedding),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vec: Vec<f64> = embedding.iter().map(|v| f64::from(*v)).collect();
        let mut cursor = self
            .graph
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     RETURN node.id AS id, node.filename AS filename,
                            node.chunk_index AS chunk_index, node.text AS text, score
                     ORDER BY score DESC",
                )
                .param("index_name", INDEX_NAME)
                .param("k", top_k as i64)
                .param("embedding", query_vec),
            )
            .await?;

        let mut output = Vec::new();
        while let Some(row) = cursor.next().await? {
            let score: f64 = row
                .get("score")
                .ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?;
            output.push(ScoredChunk {
                chunk: Self::row_to_chunk(&row)?,
                score,
            });
        }
        Ok(output)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (c:Chunk {filename: $filename})
                     WITH collect(c) AS chunks
                     FOREACH (c IN chunks | DETACH DELETE c)
                     RETURN size(chunks) AS deleted",
                )
                .param("filename", filename),
            )
            .await?;

        let deleted: i64 = match cursor.next().await? {
            Some(row) => row.get("deleted").unwrap_or(0),
            None => 0,
        };
        Ok(usize::try_from(deleted)?)
    }

    async fn list(&self, filename: Option<&str>) -> Result<Vec<DocumentChunk>> {
        let q = match filename {
            Some(f) => query(
                "MATCH (c:Chunk {filename: $filename})
                 RETURN c.id AS id, c.filename AS filename, c.chunk_index AS chunk_index, c.text AS text
                 ORDER BY filename, chunk_index",
            )
            .param("filename", f),
            None => query(
                "MATCH (c:Chunk)
                 RETURN c.id AS id, c.filename AS filename, c.chunk_index AS chunk_index, c.text AS text
                 ORDER BY filename, chunk_index",
            ),
        };

        let mut cursor = self.graph.execute(q).await?;
        let mut chunks = Vec::new();
        while let Some(row) = cursor.next().await? {
            chunks.push(Self::row_to_chunk(&row)?);
        }
        Ok(chunks)
    }

    async fn chunk_counts(&self) -> Result<ChunkCounts> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (c:Chunk) RETURN c.filename AS filename, count(c) AS chunks",
            ))
            .await?;

        let mut counts = ChunkCounts::new();
        while let Some(row) = cursor.next().await? {
            if let (Some(filename), Some(n)) = (row.get::<String>("filename"), row.get::<i64>("chunks")) {
                counts.insert(filename, usize::try_from(n)?);
            }
        }
        Ok(counts)
    }
}
