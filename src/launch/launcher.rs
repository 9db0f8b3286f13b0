use std::sync::Arc;

use log::{info, warn};

use crate::{
    BatchError,
    core::{
        job::{Job, JobExecution},
        parameters::JobParameters,
        status::BatchStatus,
    },
    repository::{JobExplorer, JobRepository},
};

/// Launches jobs synchronously in the calling thread.
///
/// # Examples
///
/// ```
/// use spring_batch_repository::core::{
///     job::JobBuilder,
///     parameters::JobParametersBuilder,
///     status::BatchStatus,
///     step::{StepBuilder, StepExecution},
///     tasklet::{RepeatStatus, Tasklet},
/// };
/// use spring_batch_repository::launch::SimpleJobLauncher;
/// use spring_batch_repository::repository::JobRepositoryBuilder;
/// use spring_batch_repository::BatchError;
///
/// struct Hello;
///
/// impl Tasklet for Hello {
///     fn execute(&self, _step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
///         Ok(RepeatStatus::Finished)
///     }
/// }
///
/// # fn main() -> Result<(), BatchError> {
/// let repository = JobRepositoryBuilder::new().build()?;
/// let launcher = SimpleJobLauncher::new(repository);
///
/// let tasklet = Hello;
/// let step = StepBuilder::new("hello").tasklet(&tasklet).build()?;
/// let job = JobBuilder::new().name("greetings").start(&step).build();
///
/// let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();
/// let execution = launcher.run(&job, &parameters)?;
/// assert_eq!(execution.status, BatchStatus::Completed);
/// # Ok(())
/// # }
/// ```
pub struct SimpleJobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl SimpleJobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Creates an execution of `job` for `job_parameters` and runs it to the end.
    ///
    /// The returned execution carries the final status. An error means no
    /// execution could be created, or the repository failed while the job ran.
    pub fn run(
        &self,
        job: &dyn Job,
        job_parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        if let Some(last_execution) = self
            .repository
            .get_last_job_execution_for(job.name(), job_parameters)?
        {
            if !job.is_restartable() {
                return Err(BatchError::JobRestart(format!(
                    "JobInstance already exists and is not restartable: {}",
                    job.name()
                )));
            }

            if let Some(step_execution) = last_execution
                .step_executions
                .iter()
                .find(|step_execution| step_execution.status == BatchStatus::Unknown)
            {
                return Err(BatchError::JobRestart(format!(
                    "Cannot restart step [{}] from UNKNOWN status. The last execution ended with a failure that could not be rolled back, so it may be dangerous to proceed. Manual intervention is probably necessary.",
                    step_execution.step_name
                )));
            }
        }

        let mut execution = self
            .repository
            .create_job_execution(job.name(), job_parameters)?;

        info!(
            "Job: [{}] launched with the following parameters: [{}]",
            job.name(),
            job_parameters
        );

        if let Err(error) = job.execute(&mut execution, self.repository.as_ref()) {
            warn!(
                "Job: [{}] aborted, execution {:?} may be left in status {}: {}",
                job.name(),
                execution.id,
                execution.status,
                error
            );
            return Err(error);
        }

        info!(
            "Job: [{}] completed with the following parameters: [{}] and the following status: [{}]",
            job.name(),
            job_parameters,
            execution.status
        );

        Ok(execution)
    }
}
