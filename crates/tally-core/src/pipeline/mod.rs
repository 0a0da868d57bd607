//! Statement pipeline
//!
//! - `state`: the stage machine and its legal transitions
//! - `queue`: the `JobDispatcher` seam and the in-process tokio queue
//! - `orchestrator`: the jobs themselves, with retries, guards, and dead letters

mod orchestrator;
mod queue;
mod state;

pub use orchestrator::{
    JobOutcome, Orchestrator, RecoveryReport, StatementStatus, NO_ACCOUNT_KEYWORDS,
    NO_ACCOUNT_TRANSACTIONS, NO_KEYWORDS, NO_TRANSACTIONS,
};
pub use queue::{
    InProcessQueue, Job, JobDispatcher, JobHandler, QueueReceivers, QueueWorkers,
    RecordingDispatcher,
};
pub use state::{transition, StageEvent, StatementStage};
