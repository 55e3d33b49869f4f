//! Postgres adapter: the mandatory store and lexical fallback.
//!
//! Documents and chunks share the `processed_content` table, discriminated
//! by `record_type`. Chunk writes are `INSERT … ON CONFLICT (chunk_id) DO
//! UPDATE`, document writes conflict on `id`; replaying a partially
//! ingested document therefore converges. Full-text search runs over a
//! stored tsvector with rank ordering and doubles as the lexical baseline
//! when the BM25 service is down.
//!
//! Schema is applied by the embedding application's migrations; this
//! module is database I/O only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CorpusError, classify_sqlx};
use crate::model::{
    Document, DocumentKind, DocumentStatus, HitSource, SearchHit, SearchQuery, UploadOrigin,
};
use crate::stores::ContentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter and pagination for the document listing surface.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// One of the allow-listed sort columns; anything else falls back to
    /// `created_time`.
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    /// Case-insensitive substring match on title/url.
    pub q: Option<String>,
}

/// Pagination metadata for listing queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub total_count: u64,
    pub page_size: u32,
    pub offset: u32,
    pub has_next_page: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub page_info: PageInfo,
}

/// Chunk projection returned by the per-document listing.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub status: String,
    pub embedding_status: Option<String>,
    pub section_title: Option<String>,
    pub contextual_summary: Option<String>,
}

const SORT_COLUMNS: &[&str] = &["created_time", "updated_at", "title", "processing_status"];

pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch one document record.
    #[instrument(skip(self), err)]
    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>, CorpusError> {
        let row = sqlx::query(
            r#"
            SELECT id, url, title, upload_origin, document_type, processing_status,
                   total_chunks, created_time, updated_at, completed_at
            FROM processed_content
            WHERE id = $1 AND record_type = 'document'
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Paginated document listing with sort allow-list and substring filter.
    #[instrument(skip(self), err)]
    pub async fn list_documents(&self, query: DocumentQuery) -> Result<DocumentPage, CorpusError> {
        let limit = query.limit.unwrap_or(50).min(500);
        let offset = query.offset.unwrap_or(0);
        let sort_by = query
            .sort_by
            .as_deref()
            .filter(|c| SORT_COLUMNS.contains(c))
            .unwrap_or("created_time");
        let order = query.sort_order.sql();
        let pattern = query.q.as_ref().map(|q| format!("%{q}%"));

        let where_clause = if pattern.is_some() {
            "record_type = 'document' AND (title ILIKE $1 OR url ILIKE $1)"
        } else {
            "record_type = 'document'"
        };

        let count_sql = format!("SELECT COUNT(*) AS total FROM processed_content WHERE {where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(p) = &pattern {
            count_query = count_query.bind(p);
        }
        let total_count: i64 = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx)?
            .get("total");

        let select_sql = format!(
            r#"SELECT id, url, title, upload_origin, document_type, processing_status,
                      total_chunks, created_time, updated_at, completed_at
               FROM processed_content
               WHERE {where_clause}
               ORDER BY {sort_by} {order}
               LIMIT {limit} OFFSET {offset}"#
        );
        let mut select_query = sqlx::query(&select_sql);
        if let Some(p) = &pattern {
            select_query = select_query.bind(p);
        }
        let rows = select_query
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        let documents = rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let page_info = PageInfo {
            total_count: total_count as u64,
            page_size: documents.len() as u32,
            offset,
            has_next_page: u64::from(offset + limit) < total_count as u64,
        };
        Ok(DocumentPage {
            documents,
            page_info,
        })
    }

    /// Chunks of one document, ordered by index.
    #[instrument(skip(self), err)]
    pub async fn list_chunks(
        &self,
        document_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredChunk>, CorpusError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, chunk_index, chunk_text, processing_status,
                   embedding_status, section_title, contextual_summary
            FROM processed_content
            WHERE record_type = 'chunk' AND parent_document_id = $1
            ORDER BY chunk_index ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(document_id)
        .bind(i64::from(limit.min(1000)))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| StoredChunk {
                chunk_id: row.get("chunk_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get::<Option<String>, _>("chunk_text").unwrap_or_default(),
                status: row.get("processing_status"),
                embedding_status: row.get("embedding_status"),
                section_title: row.get("section_title"),
                contextual_summary: row.get("contextual_summary"),
            })
            .collect())
    }

    /// Number of chunk rows currently stored for a document.
    pub async fn chunk_count(&self, document_id: Uuid) -> Result<u64, CorpusError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processed_content WHERE record_type = 'chunk' AND parent_document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(count as u64)
    }

    /// Transition a document's lifecycle status.
    #[instrument(skip(self), err)]
    pub async fn set_document_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        total_chunks: Option<u32>,
    ) -> Result<(), CorpusError> {
        sqlx::query(
            r#"
            UPDATE processed_content
            SET processing_status = $2,
                total_chunks = COALESCE($3, total_chunks),
                completed_at = CASE WHEN $4 THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE id = $1 AND record_type = 'document'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(total_chunks.map(|n| n as i32))
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    /// Mark every non-terminal chunk of a document with `status`.
    pub async fn mark_pending_chunks(
        &self,
        document_id: Uuid,
        status: &str,
    ) -> Result<u64, CorpusError> {
        let result = sqlx::query(
            r#"
            UPDATE processed_content
            SET processing_status = $2, updated_at = now()
            WHERE record_type = 'chunk'
              AND parent_document_id = $1
              AND processing_status IN ('pending', 'analyzed', 'embedded')
            "#,
        )
        .bind(document_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(result.rows_affected())
    }
}

fn document_from_row(row: &PgRow) -> Result<Document, CorpusError> {
    let status_raw: String = row.get("processing_status");
    let status = DocumentStatus::parse(&status_raw)
        .ok_or_else(|| CorpusError::FatalDatabase(format!("unknown status '{status_raw}'")))?;
    let origin_raw: Option<String> = row.get("upload_origin");
    let origin = match origin_raw.as_deref() {
        Some("file_upload") => UploadOrigin::FileUpload,
        _ => UploadOrigin::Url,
    };
    let kind: Option<String> = row.get("document_type");
    Ok(Document {
        id: row.get("id"),
        source_url: row.get("url"),
        title: row.get::<Option<String>, _>("title").unwrap_or_default(),
        origin,
        document_type: kind.as_deref().and_then(DocumentKind::parse),
        status,
        total_chunks: row
            .get::<Option<i32>, _>("total_chunks")
            .map(|n| n.max(0) as u32),
        created_at: row.get::<DateTime<Utc>, _>("created_time"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

#[async_trait]
impl ContentStore for RelationalStore {
    #[instrument(skip(self, document), fields(document_id = %document.id), err)]
    async fn upsert_document(&self, document: &Document) -> Result<(), CorpusError> {
        let origin = match document.origin {
            UploadOrigin::Url => "url",
            UploadOrigin::FileUpload => "file_upload",
        };
        sqlx::query(
            r#"
            INSERT INTO processed_content (
                id, record_type, url, title, upload_origin, document_type,
                processing_status, total_chunks, created_time, updated_at, completed_at
            ) VALUES ($1, 'document', $2, $3, $4, $5, $6, $7, $8, now(), $9)
            ON CONFLICT (id) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                document_type = EXCLUDED.document_type,
                processing_status = EXCLUDED.processing_status,
                total_chunks = EXCLUDED.total_chunks,
                completed_at = EXCLUDED.completed_at,
                updated_at = now()
            "#,
        )
        .bind(document.id)
        .bind(&document.source_url)
        .bind(&document.title)
        .bind(origin)
        .bind(document.document_type.map(|k| k.as_str()))
        .bind(document.status.as_str())
        .bind(document.total_chunks.map(|n| n as i32))
        .bind(document.created_at)
        .bind(document.completed_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    #[instrument(
        skip(self, chunk),
        fields(document_id = %chunk.chunk.document_id, chunk_index = chunk.chunk.index),
        err
    )]
    async fn upsert_chunk(&self, chunk: &crate::model::EnrichedChunk) -> Result<(), CorpusError> {
        let analysis = chunk.analysis.clone().unwrap_or_default();
        let key_entities = serde_json::to_value(&analysis.key_entities)?;
        let boundaries: Vec<String> = chunk
            .chunk
            .boundary
            .iter()
            .map(|b| b.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO processed_content (
                id, record_type, parent_document_id, chunk_id, chunk_index,
                chunk_text, span_start, span_end, title, summary, category,
                content_type, technical_level, sentiment, emotions, tags,
                key_concepts, main_topics, key_entities, contextual_summary,
                uses_contextual_embedding, processing_status, embedding_status,
                chunking_method, boundaries_respected, section_title, section_level,
                created_time, updated_at
            ) VALUES (
                $1, 'chunk', $2, $1, $3,
                $4, $5, $6, $7, $8, $9,
                $10, $11, $12, $13, $14,
                $15, $16, $17, $18,
                $19, $20, $21,
                $22, $23, $24, $25,
                now(), now()
            )
            ON CONFLICT (chunk_id) DO UPDATE SET
                chunk_text = EXCLUDED.chunk_text,
                span_start = EXCLUDED.span_start,
                span_end = EXCLUDED.span_end,
                title = EXCLUDED.title,
                summary = EXCLUDED.summary,
                category = EXCLUDED.category,
                content_type = EXCLUDED.content_type,
                technical_level = EXCLUDED.technical_level,
                sentiment = EXCLUDED.sentiment,
                emotions = EXCLUDED.emotions,
                tags = EXCLUDED.tags,
                key_concepts = EXCLUDED.key_concepts,
                main_topics = EXCLUDED.main_topics,
                key_entities = EXCLUDED.key_entities,
                contextual_summary = EXCLUDED.contextual_summary,
                uses_contextual_embedding = EXCLUDED.uses_contextual_embedding,
                processing_status = EXCLUDED.processing_status,
                embedding_status = EXCLUDED.embedding_status,
                chunking_method = EXCLUDED.chunking_method,
                boundaries_respected = EXCLUDED.boundaries_respected,
                section_title = EXCLUDED.section_title,
                section_level = EXCLUDED.section_level,
                updated_at = now()
            "#,
        )
        .bind(chunk.chunk.id)
        .bind(chunk.chunk.document_id)
        .bind(chunk.chunk.index as i32)
        .bind(&chunk.chunk.text)
        .bind(chunk.chunk.start as i32)
        .bind(chunk.chunk.end as i32)
        .bind(&analysis.title)
        .bind(&analysis.summary)
        .bind(&analysis.category)
        .bind(analysis.content_type.as_str())
        .bind(analysis.technical_level.as_str())
        .bind(analysis.sentiment.as_str())
        .bind(&analysis.emotions)
        .bind(&analysis.tags)
        .bind(&analysis.key_concepts)
        .bind(&analysis.main_topics)
        .bind(key_entities)
        .bind(&chunk.contextual_summary)
        .bind(chunk.uses_contextual_embedding)
        .bind(chunk.status.as_str())
        .bind(chunk.embedding_status.as_str())
        .bind(chunk.chunk.method.as_str())
        .bind(&boundaries)
        .bind(&chunk.chunk.section_title)
        .bind(chunk.chunk.section_level.map(i32::from))
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_document(&self, document_id: Uuid) -> Result<u64, CorpusError> {
        let result = sqlx::query(
            "DELETE FROM processed_content WHERE id = $1 OR parent_document_id = $1",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, query), fields(q = %query.query), err)]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, CorpusError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, parent_document_id, chunk_text,
                   ts_rank(content_tsv, plainto_tsquery('english', $1)) AS rank
            FROM processed_content
            WHERE record_type = 'chunk'
              AND content_tsv @@ plainto_tsquery('english', $1)
              AND ($3::uuid IS NULL OR parent_document_id = $3)
            ORDER BY rank DESC
            LIMIT $2
            "#,
        )
        .bind(&query.query)
        .bind(query.limit.min(1000) as i64)
        .bind(query.document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("parent_document_id"),
                score: row.get::<f32, _>("rank"),
                text: row.get::<Option<String>, _>("chunk_text").unwrap_or_default(),
                source: HitSource::Relational,
                metadata: serde_json::Value::Null,
            })
            .collect())
    }
}
