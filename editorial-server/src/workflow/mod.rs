//! Manuscript workflow.
//!
//! The design separates:
//! - **Rules**: pure checks and status changes over a loaded aggregate
//!   (`transition`), returning the records to store and the effects to run
//! - **Persistence**: the `repository` traits, in memory and on SQLite
//! - **Effects**: notifications and log lines, executed by the `interpreter`
//!   only after the write they belong to has been stored
//!
//! `WorkflowService` strings these together per handler and `dispatch`
//! gates every user request through the permission table first.

pub mod dispatcher;
pub mod effect;
pub mod error;
pub mod interpreter;
pub mod repository;
pub mod service;
pub mod transition;

pub use dispatcher::{ActionRequest, DispatchOutcome};
pub use effect::{Effect, LogLevel};
pub use error::{RuleViolation, WorkflowError};
pub use interpreter::{execute_effects, InterpreterContext};
pub use repository::{
    DeletedParties, Directory, InMemoryRepository, InviteResponse, Party, RepositoryError,
    SqliteRepository, SweepCandidate, WorkflowRepository,
};
pub use service::{
    ContentDraft, ManuscriptDraft, ReviewDraft, ReviewEdit, RevisionDraft, TimelineEntry, Upload,
    WorkflowService,
};
pub use transition::ProductionStep;
