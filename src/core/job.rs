use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    BatchError,
    repository::{JobExplorer, JobRepository},
};

use super::{
    build_name,
    context::ExecutionContext,
    parameters::JobParameters,
    status::{BatchStatus, ExitStatus},
    step::{Step, StepExecution, mark_unknown},
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// One logical run of a named job for one set of identifying parameters.
///
/// A `JobInstance` is created by the job repository and never changes afterwards.
/// Restarting a failed or stopped run creates a new [`JobExecution`] for the same
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobInstance {
    /// Identifier assigned by the store
    pub id: i64,
    /// Version of the persisted row
    pub version: i32,
    /// Name of the job this instance belongs to
    pub job_name: String,
}

impl JobInstance {
    pub fn new(id: i64, job_name: &str) -> Self {
        Self {
            id,
            version: 0,
            job_name: job_name.to_string(),
        }
    }
}

/// One attempt to run a [`JobInstance`].
///
/// A `JobExecution` tracks the lifecycle status, timing information, the
/// resumable [`ExecutionContext`] and the step executions of the attempt. The
/// identifier and version are assigned by the job repository when the execution
/// is persisted.
#[derive(Debug, Clone)]
pub struct JobExecution {
    /// Identifier assigned on first save, `None` before
    pub id: Option<i64>,
    /// Optimistic locking version, `None` before first save
    pub version: Option<i32>,
    pub job_instance: JobInstance,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    pub step_executions: Vec<StepExecution>,
    /// Messages of the errors that made this execution fail
    pub failure_exceptions: Vec<String>,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: None,
            version: None,
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            failure_exceptions: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    /// Moves the status towards `status` following [`BatchStatus::upgrade_to`].
    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Signals the execution to stop: running steps are flagged so that they end
    /// at their next checkpoint.
    pub fn stop(&mut self) {
        for step_execution in self.step_executions.iter_mut() {
            if step_execution.status.is_running() {
                step_execution.set_terminate_only();
            }
        }
        self.status = BatchStatus::Stopping;
    }

    /// Registers a new step execution belonging to this job execution.
    pub fn create_step_execution(&mut self, step_name: &str) -> &mut StepExecution {
        let index = self.step_executions.len();
        self.step_executions
            .push(StepExecution::new(step_name, self.id));
        &mut self.step_executions[index]
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.step_name == step_name)
    }

    pub fn add_failure_exception(&mut self, error: &BatchError) {
        self.failure_exceptions.push(error.to_string());
    }

    /// Failures of this execution followed by those of its steps.
    pub fn all_failure_exceptions(&self) -> Vec<String> {
        let mut failures = self.failure_exceptions.clone();
        for step_execution in &self.step_executions {
            failures.extend(step_execution.failure_exceptions.iter().cloned());
        }
        failures
    }
}

/// Represents a job that can be executed.
///
/// A job is a container for a sequence of steps. It receives a [`JobExecution`]
/// already persisted by the repository and records its progress through that
/// repository. Step failures are recorded in the execution status; an `Err` is
/// only returned when the repository itself fails.
pub trait Job {
    fn name(&self) -> &str;

    /// Whether a new execution may be created for an instance that already has one.
    fn is_restartable(&self) -> bool {
        true
    }

    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository)
    -> JobResult<()>;
}

enum StepOutcome {
    Skipped,
    Executed(BatchStatus),
}

/// A job running its steps sequentially.
///
/// On restart, steps whose last execution completed are skipped (unless they
/// allow a start when complete) and an incomplete step resumes from the
/// execution context of its previous attempt.
pub struct SimpleJob<'a> {
    /// Human-readable name for the job
    name: String,
    restartable: bool,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    /// Exit codes of the steps after which the job stops, by step name
    stop_points: HashMap<String, String>,
}

impl Job for SimpleJob<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository) -> JobResult<()> {
        info!("Start of job: {}, execution id: {:?}", self.name, execution.id);

        if execution.is_stopping() {
            info!("Job {} was stopped before it started", self.name);
            execution.status = BatchStatus::Stopped;
            execution.exit_status = ExitStatus::noop()
                .add_exit_description("Job execution was stopped before it started");
            execution.end_time = Some(Utc::now());
            return repository.update_job_execution(execution);
        }

        execution.start_time = Some(Utc::now());
        execution.status = BatchStatus::Started;
        repository.update_job_execution(execution)?;

        let mut status = BatchStatus::Completed;
        let mut executed_steps = 0;
        let mut stop_exit_status = None;

        for step in &self.steps {
            if execution.is_stopping() {
                info!("Job {} stopped before step {}", self.name, step.name());
                status = BatchStatus::Stopped;
                break;
            }

            match self.handle_step(*step, execution, repository) {
                Ok(StepOutcome::Skipped) => {}
                Ok(StepOutcome::Executed(step_status)) => {
                    executed_steps += 1;
                    repository.update_job_execution_context(execution)?;

                    if step_status == BatchStatus::Unknown {
                        status = BatchStatus::Unknown;
                        break;
                    }
                    if step_status == BatchStatus::Stopped || step_status == BatchStatus::Stopping {
                        status = BatchStatus::Stopped;
                        break;
                    }
                    if step_status.is_unsuccessful() {
                        status = BatchStatus::Failed;
                        break;
                    }
                    if let Some(exit_code) = self.stop_points.get(step.name()) {
                        info!(
                            "Job {} stopped after step {} with exit code {}",
                            self.name,
                            step.name(),
                            exit_code
                        );
                        status = BatchStatus::Stopped;
                        stop_exit_status = Some(ExitStatus::with_description(
                            exit_code,
                            format!("Job stopped after step {}", step.name()),
                        ));
                        break;
                    }
                    // Persist progress and pick up stop requests issued meanwhile.
                    repository.update_job_execution(execution)?;
                }
                Err(error) => {
                    warn!("Job {} failed on step {}: {}", self.name, step.name(), error);
                    execution.add_failure_exception(&error);
                    status = BatchStatus::Failed;
                    break;
                }
            }
        }

        execution.end_time = Some(Utc::now());
        execution.upgrade_status(status);
        execution.exit_status = match execution.status {
            BatchStatus::Completed if executed_steps == 0 => ExitStatus::noop().add_exit_description(
                "All steps already completed or no steps configured for this job.",
            ),
            BatchStatus::Failed => {
                let description = execution.all_failure_exceptions().join("; ");
                ExitStatus::failed().add_exit_description(&description)
            }
            BatchStatus::Unknown => {
                let description = execution.all_failure_exceptions().join("; ");
                ExitStatus::unknown().add_exit_description(&description)
            }
            BatchStatus::Stopped => stop_exit_status.unwrap_or_else(ExitStatus::stopped),
            other => ExitStatus::from(other),
        };

        repository.update_job_execution(execution)?;

        info!(
            "End of job: {}, execution id: {:?}, status: {}",
            self.name, execution.id, execution.status
        );

        Ok(())
    }
}

impl SimpleJob<'_> {
    fn handle_step(
        &self,
        step: &dyn Step,
        execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> JobResult<StepOutcome> {
        let last_step_execution =
            repository.get_last_step_execution(&execution.job_instance, step.name())?;

        let is_restart = last_step_execution
            .as_ref()
            .is_some_and(|last| last.job_execution_id != execution.id);

        if let Some(last) = last_step_execution.as_ref().filter(|_| is_restart) {
            match last.status {
                BatchStatus::Unknown => {
                    return Err(BatchError::JobRestart(format!(
                        "Cannot restart step [{}] from UNKNOWN status",
                        step.name()
                    )));
                }
                BatchStatus::Completed if !step.allow_start_if_complete() => {
                    info!("Step already complete or not restartable, so no action to execute: {}", step.name());
                    return Ok(StepOutcome::Skipped);
                }
                BatchStatus::Abandoned => {
                    info!("Step was abandoned, so no action to execute: {}", step.name());
                    return Ok(StepOutcome::Skipped);
                }
                _ => {}
            }
        }

        let start_count =
            repository.get_step_execution_count(&execution.job_instance, step.name())?;
        if start_count >= step.start_limit() {
            return Err(BatchError::StartLimitExceeded(format!(
                "{} (limit: {})",
                step.name(),
                step.start_limit()
            )));
        }

        let step_execution = execution.create_step_execution(step.name());
        if let Some(last) = last_step_execution.filter(|last| {
            is_restart && last.status != BatchStatus::Completed
        }) {
            step_execution.execution_context = last.execution_context;
        }

        repository.add_step_execution(step_execution)?;

        if let Err(error) = step.execute(step_execution, repository) {
            warn!("Step {} ended with error: {}", step.name(), error);
            if step_execution.status.is_running() {
                step_execution.status = BatchStatus::Failed;
                step_execution.exit_status = step_execution
                    .exit_status
                    .and(&ExitStatus::failed().add_exit_description(&error.to_string()));
                step_execution.add_failure_exception(&error);
                step_execution.end_time = Some(Utc::now());
                if let Err(save_error) = repository.update_step_execution(step_execution) {
                    mark_unknown(step_execution, &save_error, repository);
                }
            }
        }

        Ok(StepOutcome::Executed(step_execution.status))
    }
}

/// Builder for creating a [`SimpleJob`].
///
/// # Example
///
/// ```ignore
/// use spring_batch_repository::core::job::JobBuilder;
///
/// let job = JobBuilder::new()
///     .name("import-customers")
///     .start(&read_step)
///     .next(&write_step)
///     .build();
/// ```
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    restartable: bool,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    stop_points: HashMap<String, String>,
}

impl Default for JobBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            restartable: true,
            steps: Vec::new(),
            stop_points: HashMap::new(),
        }
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Refuses any new execution once the job instance has been run.
    pub fn prevent_restart(mut self) -> JobBuilder<'a> {
        self.restartable = false;
        self
    }

    /// Sets the first step of the job.
    ///
    /// This method is semantically identical to `next()` but provides better readability
    /// when constructing the initial step of a job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps are executed in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Stops the job once `step` completes, with `exit_code` as job exit code.
    ///
    /// The execution ends STOPPED, so the instance can be restarted: the
    /// completed step is skipped and the job resumes at the step after it.
    pub fn stop_after(mut self, step: &dyn Step, exit_code: &str) -> JobBuilder<'a> {
        self.stop_points
            .insert(step.name().to_string(), exit_code.to_string());
        self
    }

    /// Builds the job. If no name has been provided, a random name is generated.
    pub fn build(self) -> SimpleJob<'a> {
        SimpleJob {
            name: self.name.unwrap_or_else(build_name),
            restartable: self.restartable,
            steps: self.steps,
            stop_points: self.stop_points,
        }
    }
}
