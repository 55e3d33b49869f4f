//! BM25 service adapter wire behavior.

use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

use millstone::error::CorpusError;
use millstone::model::{
    Chunk, ChunkStatus, ChunkingMethod, Document, EnrichedChunk, SearchQuery, UploadOrigin,
};
use millstone::stores::{ContentStore, LexicalStore, sanitize_index_name};

fn document() -> Document {
    Document::new(
        "My Report.pdf",
        Some("https://example.com/report".into()),
        UploadOrigin::Url,
    )
}

fn enriched_for(document: &Document) -> EnrichedChunk {
    let chunk = Chunk {
        id: Uuid::new_v4(),
        document_id: document.id,
        index: 0,
        start: 0,
        end: 12,
        text: "body of text".into(),
        method: ChunkingMethod::Semantic,
        boundary: None,
        section_title: Some("Intro".into()),
        section_level: Some(1),
        target_size: 2000,
        overlap: 200,
    };
    let mut e = EnrichedChunk::pending(chunk);
    e.status = ChunkStatus::Analyzed;
    e
}

#[tokio::test]
async fn registering_a_document_resets_its_index() {
    let server = MockServer::start();
    let name = sanitize_index_name("https://example.com/report");
    let reset = server.mock(|when, then| {
        when.method(DELETE).path(format!("/index/{name}"));
        then.status(404);
    });

    let store = LexicalStore::new(server.base_url()).unwrap();
    store.upsert_document(&document()).await.unwrap();
    reset.assert();
}

#[tokio::test]
async fn chunks_land_in_the_registered_index() {
    let server = MockServer::start();
    let name = sanitize_index_name("https://example.com/report");
    server.mock(|when, then| {
        when.method(DELETE).path(format!("/index/{name}"));
        then.status(200);
    });
    let index = server.mock(|when, then| {
        when.method(POST).path(format!("/index/{name}"));
        then.status(200).json_body(json!({ "indexed": 1 }));
    });

    let store = LexicalStore::new(server.base_url()).unwrap();
    let doc = document();
    store.upsert_document(&doc).await.unwrap();
    store.upsert_chunk(&enriched_for(&doc)).await.unwrap();
    index.assert();
}

#[tokio::test]
async fn unregistered_document_is_an_error() {
    let server = MockServer::start();
    let store = LexicalStore::new(server.base_url()).unwrap();
    let doc = document();
    let err = store.upsert_chunk(&enriched_for(&doc)).await.unwrap_err();
    assert!(matches!(err, CorpusError::InvalidInput(_)));
}

#[tokio::test]
async fn search_parses_service_hits() {
    let server = MockServer::start();
    let chunk_id = Uuid::new_v4();
    server.mock(|when, then| {
        when.method(POST).path("/search");
        then.status(200).json_body(json!({
            "results": [
                { "id": chunk_id, "score": 12.5, "metadata": { "chunk_index": 3 } },
                { "id": "not-a-uuid", "score": 1.0, "metadata": {} }
            ]
        }));
    });

    let store = LexicalStore::new(server.base_url()).unwrap();
    let hits = store.search(&SearchQuery::new("term", 10)).await.unwrap();
    // The malformed id is dropped, the good one survives.
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, chunk_id);
    assert!((hits[0].score - 12.5).abs() < 1e-6);
}

#[tokio::test]
async fn health_reflects_service_state() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200).json_body(json!({ "status": "ok" }));
    });

    let store = LexicalStore::new(server.base_url()).unwrap();
    assert!(store.health().await);

    let dead = LexicalStore::new("http://127.0.0.1:1").unwrap();
    assert!(!dead.health().await);
}
