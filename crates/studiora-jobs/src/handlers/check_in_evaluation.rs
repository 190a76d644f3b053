//! Check-in evaluation handler.
//!
//! Grades a learner's submitted answers through the generation provider.
//! Evaluations are learner-specific and never cached.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use studiora_core::JobType;

use crate::handler::{JobContext, JobHandler, Outcome};
use crate::provider::{GenerationProvider, GenerationRequest};

/// One submitted answer to grade.
#[derive(Debug, Deserialize)]
struct SubmittedAnswer {
    question_id: String,
    question: String,
    answer: String,
}

/// Expected payload for a check-in evaluation job.
#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    check_in_id: String,
    answers: Vec<SubmittedAnswer>,
}

/// Handler for [`JobType::CheckInEvaluation`].
pub struct CheckInEvaluationHandler {
    provider: Arc<dyn GenerationProvider>,
}

impl CheckInEvaluationHandler {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// Scores must cover every submitted question, each on a 0..=100 scale.
    fn validate(content: &JsonValue, expected: usize) -> std::result::Result<(), String> {
        let Some(scores) = content.get("scores").and_then(JsonValue::as_array) else {
            return Err("evaluation response has no scores array".into());
        };
        if scores.len() != expected {
            return Err(format!(
                "evaluation returned {} scores for {} questions",
                scores.len(),
                expected
            ));
        }
        for score in scores {
            let in_range = score
                .get("score")
                .and_then(JsonValue::as_i64)
                .is_some_and(|s| (0..=100).contains(&s));
            if !in_range {
                return Err("evaluation score missing or out of range".into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CheckInEvaluationHandler {
    fn job_type(&self) -> JobType {
        JobType::CheckInEvaluation
    }

    async fn execute(&self, ctx: JobContext) -> Outcome {
        let payload: EvaluationPayload = match ctx
            .payload()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(p)) => p,
            Ok(None) => return Outcome::Failed("missing evaluation payload".into()),
            Err(e) => return Outcome::Failed(format!("malformed evaluation payload: {e}")),
        };
        if payload.answers.is_empty() {
            return Outcome::Failed("check-in has no answers to grade".into());
        }

        let tenant_id = ctx.tenant_id();
        ctx.report_progress(20, Some(json!({"phase": "grading"})));

        let answers: Vec<JsonValue> = payload
            .answers
            .iter()
            .map(|a| {
                json!({
                    "question_id": a.question_id,
                    "question": a.question,
                    "answer": a.answer,
                })
            })
            .collect();
        let request = GenerationRequest::new(
            "Grade each answer against its question. Respond with JSON: \
             {\"scores\": [{\"question_id\": string, \"score\": 0-100, \
             \"feedback\": string}]}.",
        )
        .with_context(json!({
            "check_in_id": payload.check_in_id,
            "answers": answers,
        }));

        let response = match self.provider.generate(request).await {
            Ok(r) => r,
            Err(e) if e.is_transient() => return Outcome::Retry(e.to_string()),
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Err(reason) = Self::validate(&response.content, payload.answers.len()) {
            return Outcome::Failed(reason);
        }

        info!(
            subsystem = "worker",
            %tenant_id,
            check_in_id = %payload.check_in_id,
            answers = payload.answers.len(),
            "Check-in graded"
        );
        Outcome::Success(response.content)
    }
}
