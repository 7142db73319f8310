pub mod task;

pub use task::{
    CreateTaskInput, Metadata, OutcomeStatus, StatusCounts, StepOutcome, StepRecord, StepResults,
    Task, TaskStatus, UpdateTaskInput,
};
