use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::{
    BatchError,
    core::{job::{Job, JobExecution}, status::BatchStatus},
    repository::{JobExplorer, JobRepository},
};

use super::SimpleJobLauncher;

/// Control over existing job executions: stop, abandon and restart.
///
/// The operator only talks to the job repository. A job running in another
/// thread learns about a stop request at its next checkpoint, when its step
/// execution is persisted.
pub struct JobOperator {
    repository: Arc<dyn JobRepository>,
}

impl JobOperator {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    fn job_execution(&self, execution_id: i64) -> Result<JobExecution, BatchError> {
        self.repository
            .get_job_execution(execution_id)?
            .ok_or(BatchError::NoSuchJobExecution(execution_id))
    }

    /// Requests a running execution to stop.
    ///
    /// The execution is marked `STOPPING`. Its steps end at their next
    /// checkpoint and the job then ends `STOPPED`.
    pub fn stop(&self, execution_id: i64) -> Result<JobExecution, BatchError> {
        let mut execution = self.job_execution(execution_id)?;

        if !execution.is_running() {
            return Err(BatchError::IllegalState(format!(
                "JobExecution must be running so that it can be stopped: id={}, status={}",
                execution_id, execution.status
            )));
        }

        info!("Stopping job execution {}", execution_id);
        execution.stop();
        self.repository.update_job_execution(&mut execution)?;
        Ok(execution)
    }

    /// Marks an execution that is no longer running as `ABANDONED`, so that its
    /// instance is never restarted.
    pub fn abandon(&self, execution_id: i64) -> Result<JobExecution, BatchError> {
        let mut execution = self.job_execution(execution_id)?;

        if execution.status.is_less_than(BatchStatus::Stopping) {
            return Err(BatchError::JobExecutionAlreadyRunning(format!(
                "JobExecution is running or complete and therefore cannot be aborted: id={}, status={}",
                execution_id, execution.status
            )));
        }

        info!("Aborting job execution {}", execution_id);
        // Assigned rather than upgraded: UNKNOWN ranks above ABANDONED.
        execution.status = BatchStatus::Abandoned;
        execution.end_time = Some(Utc::now());
        self.repository.update_job_execution(&mut execution)?;
        Ok(execution)
    }

    /// Launches a new execution of the instance of a failed or stopped
    /// execution, with the same parameters.
    pub fn restart(&self, execution_id: i64, job: &dyn Job) -> Result<JobExecution, BatchError> {
        let execution = self.job_execution(execution_id)?;

        if execution.job_name() != job.name() {
            return Err(BatchError::InvalidArgument(format!(
                "JobExecution {} belongs to job {}, not {}",
                execution_id,
                execution.job_name(),
                job.name()
            )));
        }

        info!("Restarting job execution {}", execution_id);
        SimpleJobLauncher::new(self.repository.clone()).run(job, &execution.job_parameters)
    }

    /// Executions of a job that are currently running.
    pub fn running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, BatchError> {
        self.repository.find_running_job_executions(job_name)
    }
}
