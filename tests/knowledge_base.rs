mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use meteo_kb::config::ChunkingConfig;
use meteo_kb::error::ApiError;
use meteo_kb::ingest::{ReconcileReport, FILE_NOT_FOUND, INCOMING_DIR, UNSUPPORTED_TYPE};
use meteo_kb::models::DocumentChunk;
use meteo_kb::vector_store::{LocalVectorStore, VectorStore};

use common::{harness, harness_with_store};

const RUST_DOC: &str = "Rust ownership rules and the borrow checker keep memory safe.\n\n\
                        Lifetimes describe how long references stay valid.";
const COOKING_DOC: &str = "Boil the pasta in salted water.\n\n\
                           Simmer the tomato sauce with garlic and basil.";

fn incoming_is_empty(dir: &std::path::Path) -> bool {
    let incoming = dir.join(INCOMING_DIR);
    !incoming.exists() || std::fs::read_dir(incoming).unwrap().next().is_none()
}

#[tokio::test]
async fn upload_then_search_returns_relevant_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let stored = h
        .kb
        .ingest(RUST_DOC.as_bytes().to_vec(), "rust.txt", ChunkingConfig::default())
        .await
        .unwrap();
    assert_eq!(stored, "rust.txt");
    h.kb
        .ingest(COOKING_DOC.as_bytes().to_vec(), "cooking.txt", ChunkingConfig::default())
        .await
        .unwrap();

    // Un único lote de embeddings por documento.
    assert_eq!(*h.embedder.document_batches.lock().unwrap(), vec![1, 1]);
    assert!(dir.path().join("rust.txt").is_file());
    assert!(incoming_is_empty(dir.path()));

    let results = h.kb.search("tomato sauce pasta", Some(1)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.filename, "cooking.txt");
    assert_eq!(results[0].metadata.chunk_index, 0);
    assert!(results[0].content.contains("tomato sauce"));

    let chunk_ids: Vec<String> = h
        .store
        .list(Some("cooking.txt"))
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert!(chunk_ids.contains(&results[0].metadata.chunk_id));
}

#[tokio::test]
async fn upload_then_delete_removes_file_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.kb
        .ingest(RUST_DOC.as_bytes().to_vec(), "rust.txt", ChunkingConfig::default())
        .await
        .unwrap();

    let deleted = h.kb.delete_document("rust.txt").await.unwrap();
    assert_eq!(deleted, 1);
    assert!(!dir.path().join("rust.txt").exists());
    assert!(h.kb.search("borrow checker", None).await.unwrap().is_empty());
    assert!(h.kb.list_documents().await.unwrap().is_empty());

    let err = h.kb.delete_document("rust.txt").await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_of_unknown_document_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let err = h.kb.delete_document("nunca-subido.pdf").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(ref msg) if msg == FILE_NOT_FOUND));
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_any_change() {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploads");
    let h = harness(&upload_dir);

    let err = h
        .kb
        .ingest(b"MZ\x90\x00".to_vec(), "setup.exe", ChunkingConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InvalidInput(ref msg) if msg == UNSUPPORTED_TYPE));
    assert!(!upload_dir.exists());
    assert!(h.store.list(None).await.unwrap().is_empty());
    assert!(h.embedder.document_batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn search_on_empty_store_is_empty_without_rerank() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let results = h.kb.search("anything at all", None).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(*h.reranker.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn reupload_replaces_previous_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let small = ChunkingConfig { chunk_size: 40, chunk_overlap: 0 };

    h.kb
        .ingest(RUST_DOC.as_bytes().to_vec(), "notes.txt", small)
        .await
        .unwrap();
    assert!(h.store.chunk_counts().await.unwrap()["notes.txt"] > 1);

    h.kb
        .ingest(b"Short replacement text.".to_vec(), "notes.txt", small)
        .await
        .unwrap();

    let chunks = h.kb.list_chunks(Some("notes.txt")).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Short replacement text.");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "Short replacement text."
    );
}

#[tokio::test]
async fn document_without_text_is_rejected_and_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let err = h
        .kb
        .ingest(b"  \n\n  ".to_vec(), "blank.txt", ChunkingConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(!dir.path().join("blank.txt").exists());
    assert!(incoming_is_empty(dir.path()));
}

#[tokio::test]
async fn path_components_are_stripped_from_uploaded_names() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let stored = h
        .kb
        .ingest(COOKING_DOC.as_bytes().to_vec(), "../../recetas.txt", ChunkingConfig::default())
        .await
        .unwrap();

    assert_eq!(stored, "recetas.txt");
    assert!(dir.path().join("recetas.txt").is_file());
    let docs = h.kb.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].filename, "recetas.txt");
    assert_eq!(docs[0].size_bytes, COOKING_DOC.len() as u64);
    assert_eq!(docs[0].chunks, 1);
}

#[tokio::test]
async fn reconcile_repairs_interrupted_operations() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(INCOMING_DIR)).unwrap();
    std::fs::write(dir.path().join(INCOMING_DIR).join(".tmpA1b2"), "partial").unwrap();
    std::fs::write(dir.path().join("lonely.txt"), "sin vectores").unwrap();

    let store = Arc::new(LocalVectorStore::in_memory());
    store
        .insert(&[DocumentChunk {
            id: "ghost-0".to_string(),
            filename: "ghost.txt".to_string(),
            chunk_index: 0,
            text: "chunk sin fichero".to_string(),
            embedding: vec![1.0, 0.0],
        }])
        .await
        .unwrap();
    let h = harness_with_store(dir.path(), store);

    let report = h.kb.reconcile().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            stale_temp_files: 1,
            orphaned_documents: vec!["ghost.txt".to_string()],
            unindexed_files: vec!["lonely.txt".to_string()],
        }
    );
    assert!(h.store.list(None).await.unwrap().is_empty());
    assert!(incoming_is_empty(dir.path()));
    // El fichero sin vectores se conserva para que el usuario decida.
    assert!(dir.path().join("lonely.txt").is_file());
}

#[tokio::test]
async fn upload_is_not_searchable_when_snapshot_cannot_be_written() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("db");
    let store = Arc::new(LocalVectorStore::open(&db).await.unwrap());
    // Un directorio en la ruta temporal impide escribir la instantánea.
    std::fs::create_dir_all(db.join("chunks.json.tmp")).unwrap();
    let uploads = dir.path().join("uploads");
    let h = harness_with_store(&uploads, store);

    let err = h
        .kb
        .ingest(b"Tomato sauce with basil.".to_vec(), "sauce.txt", ChunkingConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!uploads.join("sauce.txt").exists());
    assert!(h.kb.search("tomato sauce", None).await.unwrap().is_empty());
    assert!(h.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_needs_the_stored_name_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.kb
        .ingest(RUST_DOC.as_bytes().to_vec(), "b.txt", ChunkingConfig::default())
        .await
        .unwrap();

    for name in ["a/b.txt", "../b.txt", "dir\\b.txt"] {
        let err = h.kb.delete_document(name).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(ref msg) if msg == FILE_NOT_FOUND), "{name}");
    }
    assert!(dir.path().join("b.txt").is_file());
    assert_eq!(h.store.chunk_counts().await.unwrap()["b.txt"], 1);
}
