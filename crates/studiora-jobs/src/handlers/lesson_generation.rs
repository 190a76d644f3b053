//! Lesson generation handler.
//!
//! Generation is the expensive path: one provider call per cache miss.
//! The artifact cache is keyed by tenant, source material, scope, and
//! generation options, so identical requests within the TTL are served
//! without touching the provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};
use uuid::Uuid;

use studiora_core::JobType;
use studiora_limits::{artifact_key, ResultCache};

use crate::handler::{JobContext, JobHandler, Outcome};
use crate::provider::{GenerationProvider, GenerationRequest};

/// Expected payload for a lesson generation job.
#[derive(Debug, Deserialize)]
struct LessonPayload {
    material_id: String,
    /// Which part of the material to teach ("full", a section id, ...).
    scope: String,
    /// Generation options (difficulty, language); part of the cache key.
    #[serde(default)]
    options: JsonValue,
}

/// Handler for [`JobType::LessonGeneration`].
pub struct LessonGenerationHandler {
    provider: Arc<dyn GenerationProvider>,
    cache: ResultCache,
}

impl LessonGenerationHandler {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: ResultCache) -> Self {
        Self { provider, cache }
    }

    fn build_request(tenant_id: Uuid, payload: &LessonPayload) -> GenerationRequest {
        GenerationRequest::new(
            "Write a structured lesson for the given material scope. \
             Respond with JSON: {\"title\": string, \"sections\": [...]}.",
        )
        .with_context(json!({
            "tenant_id": tenant_id,
            "material_id": payload.material_id,
            "scope": payload.scope,
            "options": payload.options,
        }))
    }

    /// A usable lesson has a title and at least one section.
    fn validate(content: &JsonValue) -> std::result::Result<(), String> {
        let title_ok = content
            .get("title")
            .and_then(JsonValue::as_str)
            .is_some_and(|t| !t.is_empty());
        let sections_ok = content
            .get("sections")
            .and_then(JsonValue::as_array)
            .is_some_and(|s| !s.is_empty());
        if title_ok && sections_ok {
            Ok(())
        } else {
            Err("generation response is not a lesson (title/sections missing)".into())
        }
    }
}

#[async_trait]
impl JobHandler for LessonGenerationHandler {
    fn job_type(&self) -> JobType {
        JobType::LessonGeneration
    }

    async fn execute(&self, ctx: JobContext) -> Outcome {
        let payload: LessonPayload = match ctx
            .payload()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(p)) => p,
            Ok(None) => return Outcome::Failed("missing lesson payload".into()),
            Err(e) => return Outcome::Failed(format!("malformed lesson payload: {e}")),
        };

        let tenant_id = ctx.tenant_id();
        let key = artifact_key(
            tenant_id,
            &payload.material_id,
            &payload.scope,
            &payload.options,
        );

        ctx.report_progress(10, Some(json!({"phase": "cache_lookup"})));
        if let Some(lesson) = self.cache.get::<JsonValue>(&key).await {
            debug!(
                subsystem = "worker",
                %tenant_id,
                material_id = %payload.material_id,
                "Lesson served from artifact cache"
            );
            return Outcome::Success(lesson);
        }

        ctx.report_progress(30, Some(json!({"phase": "generating"})));
        let response = match self
            .provider
            .generate(Self::build_request(tenant_id, &payload))
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_transient() => return Outcome::Retry(e.to_string()),
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Err(reason) = Self::validate(&response.content) {
            return Outcome::Failed(reason);
        }

        ctx.report_progress(90, Some(json!({"phase": "caching", "model": response.model})));
        self.cache.set(&key, &response.content).await;

        info!(
            subsystem = "worker",
            %tenant_id,
            material_id = %payload.material_id,
            scope = %payload.scope,
            model = %response.model,
            "Lesson generated"
        );
        Outcome::Success(response.content)
    }
}
