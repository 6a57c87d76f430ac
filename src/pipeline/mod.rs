//! Ingestion pipeline: the per-document state machine, session tracking, and
//! batch coordination.

pub mod batch;
pub mod clean;
pub mod orchestrator;
pub mod session;
pub mod types;

pub use batch::BatchCoordinator;
pub use clean::{clean_pages, clean_text};
pub use orchestrator::PipelineOrchestrator;
pub use session::SessionStore;
pub use types::{
    BatchStats, CancelFlag, DocumentFailure, PipelineError, ProcessOutcome, SessionProgress,
    SessionStatus,
};
