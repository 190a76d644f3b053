//! Material upload ingestion handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use studiora_core::{JobType, Result};
use studiora_limits::{artifact_prefix, ResultCache};

use crate::handler::{JobContext, JobHandler, Outcome};

/// Expected payload for a material upload job.
#[derive(Debug, Deserialize)]
struct UploadPayload {
    material_id: String,
    /// Pre-extracted page texts; binary extraction happens upstream.
    pages: Vec<String>,
}

/// Counts produced by ingesting one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub page_count: usize,
    pub chunk_count: usize,
    pub section_count: usize,
}

/// Collaborator that persists chunks and detects sections.
///
/// Ingestion must be idempotent per material id: re-running for the same
/// material replaces prior chunks rather than duplicating them.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(
        &self,
        tenant_id: Uuid,
        material_id: &str,
        pages: &[String],
    ) -> Result<IngestSummary>;
}

/// Default ingestor: paragraph chunking with heading-marker sections.
///
/// A chunk is a blank-line separated paragraph; a section is a paragraph
/// whose first line starts with `#`. Deliberately simple, no persistence
/// of its own.
#[derive(Default)]
pub struct ParagraphIngestor;

#[async_trait]
impl Ingestor for ParagraphIngestor {
    async fn ingest(
        &self,
        _tenant_id: Uuid,
        _material_id: &str,
        pages: &[String],
    ) -> Result<IngestSummary> {
        let mut chunk_count = 0;
        let mut section_count = 0;
        for page in pages {
            for paragraph in page.split("\n\n").filter(|p| !p.trim().is_empty()) {
                chunk_count += 1;
                if paragraph.trim_start().starts_with('#') {
                    section_count += 1;
                }
            }
        }
        Ok(IngestSummary {
            page_count: pages.len(),
            chunk_count,
            section_count,
        })
    }
}

/// Handler for [`JobType::MaterialUpload`].
pub struct MaterialUploadHandler {
    ingestor: Arc<dyn Ingestor>,
    cache: ResultCache,
}

impl MaterialUploadHandler {
    pub fn new(ingestor: Arc<dyn Ingestor>, cache: ResultCache) -> Self {
        Self { ingestor, cache }
    }
}

#[async_trait]
impl JobHandler for MaterialUploadHandler {
    fn job_type(&self) -> JobType {
        JobType::MaterialUpload
    }

    async fn execute(&self, ctx: JobContext) -> Outcome {
        let payload: UploadPayload = match ctx
            .payload()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(p)) => p,
            Ok(None) => return Outcome::Failed("missing upload payload".into()),
            Err(e) => return Outcome::Failed(format!("malformed upload payload: {e}")),
        };
        if payload.pages.is_empty() {
            return Outcome::Failed("upload has no pages".into());
        }

        let tenant_id = ctx.tenant_id();
        ctx.report_progress(10, Some(json!({"phase": "ingesting"})));

        let summary = match self
            .ingestor
            .ingest(tenant_id, &payload.material_id, &payload.pages)
            .await
        {
            Ok(s) => s,
            Err(e) if e.is_transient() => return Outcome::Retry(e.to_string()),
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        ctx.report_progress(
            80,
            Some(json!({
                "phase": "invalidating",
                "chunk_count": summary.chunk_count,
            })),
        );

        // A re-uploaded material obsoletes every artifact derived from it.
        let prefix = artifact_prefix(tenant_id, &payload.material_id);
        if !self.cache.invalidate_prefix(&prefix).await {
            warn!(
                subsystem = "worker",
                %tenant_id,
                material_id = %payload.material_id,
                "Artifact invalidation incomplete; stale entries expire via TTL"
            );
        }

        info!(
            subsystem = "worker",
            %tenant_id,
            material_id = %payload.material_id,
            page_count = summary.page_count,
            chunk_count = summary.chunk_count,
            "Material ingested"
        );

        Outcome::Success(json!({
            "page_count": summary.page_count,
            "chunk_count": summary.chunk_count,
            "section_count": summary.section_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use studiora_core::{Error, Job, JobStatus};

    fn upload_job(payload: JsonValue) -> Job {
        Job {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            job_type: JobType::MaterialUpload,
            status: JobStatus::Processing,
            payload: Some(payload),
            result: None,
            error_message: None,
            progress_percent: 0,
            progress_metadata: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn handler() -> MaterialUploadHandler {
        MaterialUploadHandler::new(Arc::new(ParagraphIngestor), ResultCache::in_memory())
    }

    #[tokio::test]
    async fn ingests_pages_and_returns_counts() {
        let job = upload_job(json!({
            "material_id": "m1",
            "pages": [
                "# Intro\n\nFirst paragraph.\n\nSecond paragraph.",
                "# Chapter 1\n\nBody text.",
            ],
        }));

        let outcome = handler().execute(JobContext::new(job)).await;
        let Outcome::Success(result) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(result["page_count"], 2);
        assert_eq!(result["chunk_count"], 5);
        assert_eq!(result["section_count"], 2);
    }

    #[tokio::test]
    async fn malformed_payload_is_permanent() {
        let outcome = handler()
            .execute(JobContext::new(upload_job(json!({"material_id": "m1"}))))
            .await;
        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn empty_upload_is_permanent() {
        let outcome = handler()
            .execute(JobContext::new(upload_job(
                json!({"material_id": "m1", "pages": []}),
            )))
            .await;
        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn transient_ingest_error_requests_retry() {
        struct FlakyIngestor;

        #[async_trait]
        impl Ingestor for FlakyIngestor {
            async fn ingest(&self, _: Uuid, _: &str, _: &[String]) -> Result<IngestSummary> {
                Err(Error::Transient("storage busy".into()))
            }
        }

        let handler =
            MaterialUploadHandler::new(Arc::new(FlakyIngestor), ResultCache::in_memory());
        let outcome = handler
            .execute(JobContext::new(upload_job(
                json!({"material_id": "m1", "pages": ["text"]}),
            )))
            .await;
        assert!(matches!(outcome, Outcome::Retry(_)));
    }

    #[tokio::test]
    async fn reingest_purges_dependent_artifacts() {
        let cache = ResultCache::in_memory();
        let tenant = Uuid::new_v4();
        let key = studiora_limits::artifact_key(tenant, "m1", "full", &json!({}));
        assert!(cache.set(&key, &json!({"lesson": "stale"})).await);

        let handler = MaterialUploadHandler::new(Arc::new(ParagraphIngestor), cache.clone());
        let mut job = upload_job(json!({"material_id": "m1", "pages": ["text"]}));
        job.tenant_id = tenant;

        let outcome = handler.execute(JobContext::new(job)).await;
        assert!(matches!(outcome, Outcome::Success(_)));
        assert_eq!(cache.get::<JsonValue>(&key).await, None);
    }
}
