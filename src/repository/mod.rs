//! # Job repository
//!
//! The job repository persists the state machine of batch runs:
//!
//! - a [`JobInstance`] per job name and identifying [`JobParameters`],
//! - a [`JobExecution`] per attempt to run an instance,
//! - a [`StepExecution`] per attempt to run a step,
//! - an [`ExecutionContext`](crate::core::context::ExecutionContext) per job and
//!   step execution, used to resume on restart.
//!
//! [`SimpleJobRepository`] implements the creation, update and deletion protocols
//! on top of the DAO contracts of the [`dao`] module. Two stores are provided: an
//! in-memory one and, with the `rdbc-sqlite` feature, an SQLite one.
//!
//! ## Example
//!
//! ```
//! use spring_batch_repository::core::parameters::JobParametersBuilder;
//! use spring_batch_repository::core::status::BatchStatus;
//! use spring_batch_repository::repository::{JobRepository, JobRepositoryBuilder};
//! use spring_batch_repository::BatchError;
//!
//! # fn main() -> Result<(), BatchError> {
//! let repository = JobRepositoryBuilder::new().in_memory().build()?;
//! let parameters = JobParametersBuilder::new().add_string("file", "persons.csv").build();
//!
//! let execution = repository.create_job_execution("import", &parameters)?;
//! assert_eq!(execution.status, BatchStatus::Starting);
//!
//! // The first execution is still running: a second launch is refused.
//! let second = repository.create_job_execution("import", &parameters);
//! assert!(matches!(second, Err(BatchError::JobExecutionAlreadyRunning(_))));
//! # Ok(())
//! # }
//! ```

use crate::{
    BatchError,
    core::{
        job::{JobExecution, JobInstance},
        parameters::JobParameters,
        step::StepExecution,
    },
};

pub mod builder;

pub mod dao;

pub mod simple;

pub use builder::JobRepositoryBuilder;
pub use simple::SimpleJobRepository;

type RepositoryResult<T> = Result<T, BatchError>;

/// Read-only access to the batch metadata.
///
/// Executions returned by the explorer are fully hydrated: they carry their
/// execution context and their step executions with their own contexts.
pub trait JobExplorer: Send + Sync {
    /// Names of all jobs having at least one instance, sorted.
    fn get_job_names(&self) -> RepositoryResult<Vec<String>>;

    /// Instances of a job, newest first, paged by `start` and `count`.
    fn get_job_instances(
        &self,
        job_name: &str,
        start: usize,
        count: usize,
    ) -> RepositoryResult<Vec<JobInstance>>;

    fn get_job_instance(&self, instance_id: i64) -> RepositoryResult<Option<JobInstance>>;

    /// Instance identified by the job name and the identifying parameters.
    fn get_job_instance_for(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<Option<JobInstance>>;

    fn get_last_job_instance(&self, job_name: &str) -> RepositoryResult<Option<JobInstance>>;

    /// Number of instances of a job. Fails with [`BatchError::NoSuchJob`] for an unknown job.
    fn get_job_instance_count(&self, job_name: &str) -> RepositoryResult<usize>;

    fn is_job_instance_exists(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<bool> {
        Ok(self.get_job_instance_for(job_name, job_parameters)?.is_some())
    }

    /// Executions of an instance, newest first.
    fn get_job_executions(&self, job_instance: &JobInstance) -> RepositoryResult<Vec<JobExecution>>;

    fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> RepositoryResult<Option<JobExecution>>;

    fn get_last_job_execution_for(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<Option<JobExecution>> {
        match self.get_job_instance_for(job_name, job_parameters)? {
            Some(job_instance) => self.get_last_job_execution(&job_instance),
            None => Ok(None),
        }
    }

    fn get_job_execution(&self, execution_id: i64) -> RepositoryResult<Option<JobExecution>>;

    /// Executions of a job whose status is running.
    fn find_running_job_executions(&self, job_name: &str) -> RepositoryResult<Vec<JobExecution>>;

    fn get_step_execution(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> RepositoryResult<Option<StepExecution>>;

    /// Most recent execution of a step across all executions of an instance.
    fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>>;

    /// Number of times a step was started for an instance.
    fn get_step_execution_count(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<usize>;
}

/// Persistence of the batch state machine.
///
/// Every mutation assumes a single writer per execution row; concurrent writers
/// are detected through optimistic locking and reported as
/// [`BatchError::OptimisticLockingFailure`].
pub trait JobRepository: JobExplorer {
    fn create_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<JobInstance>;

    /// Creates and persists a new execution for the instance identified by the
    /// job name and parameters, creating the instance when needed.
    ///
    /// Fails with:
    /// - [`BatchError::JobExecutionAlreadyRunning`] when an execution of the
    ///   instance is running,
    /// - [`BatchError::JobRestart`] when an execution ended in `UNKNOWN` status,
    /// - [`BatchError::JobInstanceAlreadyComplete`] when the identifying
    ///   parameters are not empty and an execution completed or was abandoned.
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<JobExecution>;

    /// Persists the execution after synchronizing its status with the stored row.
    fn update_job_execution(&self, job_execution: &mut JobExecution) -> RepositoryResult<()>;

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> RepositoryResult<()>;

    fn add_step_execution(&self, step_execution: &mut StepExecution) -> RepositoryResult<()>;

    fn add_step_executions(&self, step_executions: &mut [StepExecution]) -> RepositoryResult<()>;

    /// Persists the step execution, then flags it for termination when its job
    /// execution is stopping.
    fn update_step_execution(&self, step_execution: &mut StepExecution) -> RepositoryResult<()>;

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> RepositoryResult<()>;

    fn delete_step_execution(&self, step_execution: &StepExecution) -> RepositoryResult<()>;

    /// Deletes the execution with its context, parameters and step executions.
    fn delete_job_execution(&self, job_execution: &JobExecution) -> RepositoryResult<()>;

    /// Deletes the instance with all its executions.
    fn delete_job_instance(&self, job_instance: &JobInstance) -> RepositoryResult<()>;
}
