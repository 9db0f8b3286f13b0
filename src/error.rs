use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    /// A job execution for the same job instance is still running.
    #[error("Job execution already running: {0}")]
    JobExecutionAlreadyRunning(String),

    /// The job instance cannot be restarted (e.g. its last execution ended in `UNKNOWN`).
    #[error("Job restart refused: {0}")]
    JobRestart(String),

    /// A job instance with the same identifying parameters already completed.
    #[error("Job instance already complete: {0}")]
    JobInstanceAlreadyComplete(String),

    /// A required argument or identifier is missing or invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The persisted state contradicts the requested operation.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("No job configured with the name: {0}")]
    NoSuchJob(String),

    #[error("No job execution with id: {0}")]
    NoSuchJobExecution(i64),

    /// A row was modified concurrently since it was read.
    #[error("Optimistic locking failure: {0}")]
    OptimisticLockingFailure(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Start limit exceeded for step: {0}")]
    StartLimitExceeded(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("Step failed: {0}")]
    Step(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "rdbc")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}
