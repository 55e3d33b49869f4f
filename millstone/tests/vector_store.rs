//! Qdrant adapter wire behavior against a mock server.

use std::sync::Arc;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

use millstone::error::CorpusError;
use millstone::llm::EmbeddingModel;
use millstone::model::{
    Chunk, ChunkStatus, ChunkingMethod, EmbeddingStatus, EnrichedChunk, SearchQuery,
};
use millstone::stores::ContentStore;
use millstone::stores::vector::{VectorStore, VectorStoreConfig};

struct FixedEmbedder;

#[async_trait]
impl EmbeddingModel for FixedEmbedder {
    async fn embed(&self, _: &str) -> Result<Vec<f32>, CorpusError> {
        Ok(vec![0.25; 4])
    }

    fn dimensions(&self) -> usize {
        4
    }
}

fn store_for(server: &MockServer) -> VectorStore {
    VectorStore::new(
        VectorStoreConfig::new(server.base_url(), "chunks_test", 4),
        Arc::new(FixedEmbedder),
    )
    .unwrap()
}

fn enriched_chunk() -> EnrichedChunk {
    let chunk = Chunk {
        id: Uuid::new_v4(),
        document_id: Uuid::new_v4(),
        index: 0,
        start: 0,
        end: 9,
        text: "chunk one".into(),
        method: ChunkingMethod::Semantic,
        boundary: None,
        section_title: None,
        section_level: None,
        target_size: 2000,
        overlap: 200,
    };
    let mut e = EnrichedChunk::pending(chunk);
    e.status = ChunkStatus::Embedded;
    e.embedding = Some(vec![0.1, 0.2, 0.3, 0.4]);
    e.embedding_status = EmbeddingStatus::Completed;
    e
}

#[tokio::test]
async fn collection_is_created_on_first_write() {
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(GET).path("/collections/chunks_test");
        then.status(404);
    });
    let create = server.mock(|when, then| {
        when.method(PUT).path("/collections/chunks_test");
        then.status(200).json_body(json!({ "result": true }));
    });
    let upsert = server.mock(|when, then| {
        when.method(PUT).path("/collections/chunks_test/points");
        then.status(200).json_body(json!({ "result": { "status": "acknowledged" } }));
    });

    let store = store_for(&server);
    store.upsert_chunk(&enriched_chunk()).await.unwrap();

    missing.assert();
    create.assert();
    upsert.assert();
}

#[tokio::test]
async fn chunk_without_embedding_is_rejected_locally() {
    let server = MockServer::start();
    let store = store_for(&server);
    let mut chunk = enriched_chunk();
    chunk.embedding = None;

    let err = store.upsert_chunk(&chunk).await.unwrap_err();
    assert!(matches!(err, CorpusError::EmbeddingFailed(_)));
}

#[tokio::test]
async fn dimension_mismatch_is_rejected_locally() {
    let server = MockServer::start();
    let store = store_for(&server);
    let mut chunk = enriched_chunk();
    chunk.embedding = Some(vec![0.1; 8]);

    let err = store.upsert_chunk(&chunk).await.unwrap_err();
    assert!(matches!(err, CorpusError::EmbeddingFailed(_)));
}

#[tokio::test]
async fn search_embeds_the_query_and_parses_hits() {
    let server = MockServer::start();
    let chunk_id = Uuid::new_v4();
    let document_id = Uuid::new_v4();
    server.mock(|when, then| {
        when.method(POST).path("/collections/chunks_test/points/search");
        then.status(200).json_body(json!({
            "result": [{
                "id": chunk_id,
                "score": 0.87,
                "payload": { "document_id": document_id, "chunk_index": 1 }
            }]
        }));
    });

    let store = store_for(&server);
    let hits = store
        .search(&SearchQuery::new("what is millrace", 5).with_threshold(0.5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, chunk_id);
    assert_eq!(hits[0].document_id, Some(document_id));
    assert!((hits[0].score - 0.87).abs() < 1e-6);
}

#[tokio::test]
async fn delete_document_targets_the_filter_endpoint() {
    let server = MockServer::start();
    let delete = server.mock(|when, then| {
        when.method(POST).path("/collections/chunks_test/points/delete");
        then.status(200).json_body(json!({ "result": { "status": "acknowledged" } }));
    });

    let store = store_for(&server);
    store.delete_document(Uuid::new_v4()).await.unwrap();
    delete.assert();
}
