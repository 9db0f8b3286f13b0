//! Data access contracts of the job repository.
//!
//! The repository never talks to a store directly: it composes the four entity
//! DAOs, plus a [`JobLaunchDao`] when the store can create executions atomically.
//! Implementations must be `Send + Sync` and assign identifiers and versions on
//! save. Updates are versioned: a stale version must be rejected with
//! [`BatchError::OptimisticLockingFailure`].

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        job::{JobExecution, JobInstance},
        parameters::JobParameters,
        status::BatchStatus,
        step::StepExecution,
    },
};

pub mod memory;

#[cfg(feature = "rdbc-sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "rdbc-sqlite")))]
pub mod sqlite;

pub use memory::InMemoryJobStore;

#[cfg(feature = "rdbc-sqlite")]
pub use sqlite::SqliteJobStore;

/// Default maximum length of a persisted exit description.
pub const DEFAULT_MAX_EXIT_DESCRIPTION_LENGTH: usize = 2500;

type DaoResult<T> = Result<T, BatchError>;

pub trait JobInstanceDao: Send + Sync {
    /// Creates an instance. Fails when one already exists for the same name and
    /// identifying parameters.
    fn create_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobInstance>;

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<Option<JobInstance>>;

    fn get_job_instance_by_id(&self, instance_id: i64) -> DaoResult<Option<JobInstance>>;

    fn get_job_names(&self) -> DaoResult<Vec<String>>;

    /// Instances of a job, newest first.
    fn get_job_instances(
        &self,
        job_name: &str,
        start: usize,
        count: usize,
    ) -> DaoResult<Vec<JobInstance>>;

    fn get_last_job_instance(&self, job_name: &str) -> DaoResult<Option<JobInstance>>;

    fn get_job_instance_count(&self, job_name: &str) -> DaoResult<usize>;

    fn delete_job_instance(&self, job_instance: &JobInstance) -> DaoResult<()>;
}

/// Executions returned by this DAO carry neither their context nor their steps.
pub trait JobExecutionDao: Send + Sync {
    /// Saves a new execution, assigning its id and initial version.
    fn save_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()>;

    /// Updates a saved execution and increments its version.
    fn update_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()>;

    /// Executions of an instance, newest first.
    fn find_job_executions(&self, job_instance: &JobInstance) -> DaoResult<Vec<JobExecution>>;

    fn get_last_job_execution(&self, job_instance: &JobInstance) -> DaoResult<Option<JobExecution>>;

    fn get_job_execution(&self, execution_id: i64) -> DaoResult<Option<JobExecution>>;

    fn find_running_job_executions(&self, job_name: &str) -> DaoResult<Vec<JobExecution>>;

    /// Upgrades the in-memory status with the persisted one when the persisted row
    /// has a different version, and adopts that version.
    fn synchronize_status(&self, job_execution: &mut JobExecution) -> DaoResult<()>;

    fn delete_job_execution(&self, job_execution: &JobExecution) -> DaoResult<()>;

    fn delete_job_execution_parameters(&self, job_execution: &JobExecution) -> DaoResult<()>;
}

/// Step executions returned by this DAO do not carry their context.
pub trait StepExecutionDao: Send + Sync {
    fn save_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()>;

    fn save_step_executions(&self, step_executions: &mut [StepExecution]) -> DaoResult<()>;

    fn update_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()>;

    fn get_step_execution(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> DaoResult<Option<StepExecution>>;

    /// Step executions of a job execution, in creation order.
    fn get_step_executions(&self, job_execution_id: i64) -> DaoResult<Vec<StepExecution>>;

    fn delete_step_execution(&self, step_execution: &StepExecution) -> DaoResult<()>;
}

/// Contexts of unknown executions are returned empty.
pub trait ExecutionContextDao: Send + Sync {
    fn get_job_execution_context(&self, job_execution: &JobExecution)
    -> DaoResult<ExecutionContext>;

    fn get_step_execution_context(
        &self,
        step_execution: &StepExecution,
    ) -> DaoResult<ExecutionContext>;

    fn save_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()>;

    fn save_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()>;

    fn save_step_execution_contexts(&self, step_executions: &[StepExecution]) -> DaoResult<()>;

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()>;

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()>;

    fn delete_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()>;

    fn delete_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()>;
}

/// Creation of job executions as one atomic unit of the store.
///
/// Stores shared between processes implement it so that the instance lookup,
/// the restart checks and the inserts run in a single transaction. Without it
/// the repository composes the other DAOs under its in-process launch guard.
pub trait JobLaunchDao: Send + Sync {
    /// Finds or creates the instance of `job_name` for `job_parameters`, checks
    /// it with [`check_restart`] and saves a new execution carrying the context
    /// of the last one.
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobExecution>;
}

/// Checks that an existing instance, with its executions newest first, may get
/// a new execution.
pub(crate) fn check_restart(
    job_instance: &JobInstance,
    executions: &[JobExecution],
) -> DaoResult<()> {
    if executions.is_empty() {
        return Err(BatchError::IllegalState(format!(
            "Cannot find any job execution for job instance: {:?}",
            job_instance
        )));
    }

    for execution in executions {
        if execution.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning(format!(
                "A job execution for this job is already running: {:?}",
                job_instance
            )));
        }

        if execution.status == BatchStatus::Unknown {
            return Err(BatchError::JobRestart(
                "Cannot restart job from UNKNOWN status. The last execution ended with a failure that could not be rolled back, so it may be dangerous to proceed. Manual intervention is probably necessary.".to_string(),
            ));
        }

        let identifying_parameters = execution.job_parameters.identifying_parameters();
        if !identifying_parameters.is_empty()
            && (execution.status == BatchStatus::Completed
                || execution.status == BatchStatus::Abandoned)
        {
            return Err(BatchError::JobInstanceAlreadyComplete(format!(
                "A job instance already exists and is complete for identifying parameters={}. If you want to run this job again, change the parameters.",
                identifying_parameters
            )));
        }
    }
    Ok(())
}

/// Returns the id of a persisted entity or an `InvalidArgument` error.
pub(crate) fn require_id(id: Option<i64>, entity: &str) -> DaoResult<i64> {
    id.ok_or_else(|| BatchError::InvalidArgument(format!("{} must be saved (have an id)", entity)))
}

pub(crate) fn require_version(version: Option<i32>, entity: &str) -> DaoResult<i32> {
    version.ok_or_else(|| {
        BatchError::InvalidArgument(format!("{} must have a version to be updated", entity))
    })
}

pub(crate) fn stale_version_error(entity: &str, id: i64, version: i32, current: i32) -> BatchError {
    BatchError::OptimisticLockingFailure(format!(
        "Attempt to update {} id={} with wrong version ({}), where current version is {}",
        entity, id, version, current
    ))
}
