//! Content fetching boundary.
//!
//! Format extraction (PDF/HTML/EPUB) is an external collaborator; the
//! pipeline only needs *some* implementation that turns a job payload
//! into text. [`HttpTextFetcher`] is the default: plain-text GET for URL
//! jobs, a UTF-8 read of the staged blob for file jobs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::PipelineError;
use crate::queue::JobPayload;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub text: String,
    pub title: Option<String>,
}

/// Boundary seam the orchestrator fetches through.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, payload: &JobPayload) -> Result<FetchedContent, PipelineError>;
}

pub struct HttpTextFetcher {
    http: Client,
}

impl HttpTextFetcher {
    pub fn new() -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("http client: {e}")))?;
        Ok(Self { http })
    }
}

/// Last path segment, for document titles when the page supplies none.
fn title_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.starts_with("http"))
        .map(|s| s.to_string())
}

#[async_trait]
impl ContentFetcher for HttpTextFetcher {
    async fn fetch(&self, payload: &JobPayload) -> Result<FetchedContent, PipelineError> {
        match payload {
            JobPayload::Url { url } => {
                let response = self.http.get(url).send().await.map_err(|e| {
                    PipelineError::UpstreamUnavailable(format!("fetch {url}: {e}"))
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(if status.as_u16() == 404 {
                        PipelineError::NotFound(format!("fetch {url}: {status}"))
                    } else {
                        PipelineError::UpstreamUnavailable(format!("fetch {url}: {status}"))
                    });
                }
                let text = response.text().await.map_err(|e| {
                    PipelineError::UpstreamUnavailable(format!("fetch {url}: {e}"))
                })?;
                Ok(FetchedContent {
                    text,
                    title: title_from_url(url),
                })
            }
            JobPayload::File {
                filename,
                bytes_ref,
                ..
            } => {
                let text = tokio::fs::read_to_string(bytes_ref).await.map_err(|e| {
                    PipelineError::InvalidInput(format!("staged upload {bytes_ref}: {e}"))
                })?;
                Ok(FetchedContent {
                    text,
                    title: Some(filename.clone()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_titles() {
        assert_eq!(
            title_from_url("https://example.com/docs/guide"),
            Some("guide".to_string())
        );
        assert_eq!(
            title_from_url("https://example.com/docs/guide/"),
            Some("guide".to_string())
        );
        assert_eq!(title_from_url("https://"), None);
    }

    #[tokio::test]
    async fn file_payloads_read_the_staged_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        tokio::fs::write(&path, "staged content").await.unwrap();

        let fetcher = HttpTextFetcher::new().unwrap();
        let fetched = fetcher
            .fetch(&JobPayload::File {
                filename: "upload.txt".into(),
                mime: "text/plain".into(),
                bytes_ref: path.to_string_lossy().into_owned(),
            })
            .await
            .unwrap();
        assert_eq!(fetched.text, "staged content");
        assert_eq!(fetched.title.as_deref(), Some("upload.txt"));
    }

    #[tokio::test]
    async fn missing_blob_is_invalid_input() {
        let fetcher = HttpTextFetcher::new().unwrap();
        let err = fetcher
            .fetch(&JobPayload::File {
                filename: "gone.txt".into(),
                mime: "text/plain".into(),
                bytes_ref: "/nonexistent/blob".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
