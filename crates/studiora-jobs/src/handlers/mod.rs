//! Job handlers for the platform's three asynchronous job types.

pub mod check_in_evaluation;
pub mod lesson_generation;
pub mod material_upload;

pub use check_in_evaluation::CheckInEvaluationHandler;
pub use lesson_generation::LessonGenerationHandler;
pub use material_upload::{IngestSummary, Ingestor, MaterialUploadHandler, ParagraphIngestor};
