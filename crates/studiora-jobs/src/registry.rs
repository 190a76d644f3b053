//! Exhaustive handler registry.

use std::sync::Arc;

use studiora_core::{Error, JobType, Result};

use crate::handler::JobHandler;

/// Registry mapping every job type to its handler.
///
/// Construction takes one handler per variant of the closed [`JobType`]
/// enum, so adding a job type is a compile error until every call site
/// supplies a handler for it. No string-keyed lookup, no runtime gaps.
#[derive(Clone)]
pub struct HandlerRegistry {
    material_upload: Arc<dyn JobHandler>,
    lesson_generation: Arc<dyn JobHandler>,
    check_in_evaluation: Arc<dyn JobHandler>,
}

impl HandlerRegistry {
    /// Build a registry from one handler per job type.
    ///
    /// Each handler must report the job type of its slot; a mismatch is a
    /// wiring bug caught at startup rather than at first delivery.
    pub fn new(
        material_upload: Arc<dyn JobHandler>,
        lesson_generation: Arc<dyn JobHandler>,
        check_in_evaluation: Arc<dyn JobHandler>,
    ) -> Result<Self> {
        for (slot, handler) in [
            (JobType::MaterialUpload, &material_upload),
            (JobType::LessonGeneration, &lesson_generation),
            (JobType::CheckInEvaluation, &check_in_evaluation),
        ] {
            if handler.job_type() != slot {
                return Err(Error::Config(format!(
                    "handler for {} registered in the {} slot",
                    handler.job_type(),
                    slot
                )));
            }
        }

        Ok(Self {
            material_upload,
            lesson_generation,
            check_in_evaluation,
        })
    }

    /// Get the handler for a job type.
    pub fn get(&self, job_type: JobType) -> Arc<dyn JobHandler> {
        match job_type {
            JobType::MaterialUpload => self.material_upload.clone(),
            JobType::LessonGeneration => self.lesson_generation.clone(),
            JobType::CheckInEvaluation => self.check_in_evaluation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;

    fn noop_registry() -> HandlerRegistry {
        HandlerRegistry::new(
            Arc::new(NoOpHandler::new(JobType::MaterialUpload)),
            Arc::new(NoOpHandler::new(JobType::LessonGeneration)),
            Arc::new(NoOpHandler::new(JobType::CheckInEvaluation)),
        )
        .expect("registry")
    }

    #[test]
    fn every_type_resolves_to_its_handler() {
        let registry = noop_registry();
        for job_type in JobType::ALL {
            assert_eq!(registry.get(job_type).job_type(), job_type);
        }
    }

    #[test]
    fn mismatched_slot_is_rejected() {
        let result = HandlerRegistry::new(
            Arc::new(NoOpHandler::new(JobType::LessonGeneration)),
            Arc::new(NoOpHandler::new(JobType::LessonGeneration)),
            Arc::new(NoOpHandler::new(JobType::CheckInEvaluation)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
