use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info};

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

use super::{
    JobExplorer, JobRepository, RepositoryResult,
    dao::{
        ExecutionContextDao, JobExecutionDao, JobInstanceDao, JobLaunchDao, StepExecutionDao,
        check_restart, require_id,
    },
};

/// Job repository storing instances, executions and contexts through DAOs.
///
/// Instance lookup and execution creation happen under a launch guard, so that
/// two launches of the same job instance are serialized: the second one sees the
/// running execution of the first and is rejected. The guard only covers this
/// process; stores shared between processes provide a [`JobLaunchDao`] that
/// creates the execution in one transaction.
pub struct SimpleJobRepository {
    job_instance_dao: Arc<dyn JobInstanceDao>,
    job_execution_dao: Arc<dyn JobExecutionDao>,
    step_execution_dao: Arc<dyn StepExecutionDao>,
    execution_context_dao: Arc<dyn ExecutionContextDao>,
    launch_dao: Option<Arc<dyn JobLaunchDao>>,
    launch_guard: Mutex<()>,
}

impl SimpleJobRepository {
    pub fn new(
        job_instance_dao: Arc<dyn JobInstanceDao>,
        job_execution_dao: Arc<dyn JobExecutionDao>,
        step_execution_dao: Arc<dyn StepExecutionDao>,
        execution_context_dao: Arc<dyn ExecutionContextDao>,
    ) -> Self {
        Self {
            job_instance_dao,
            job_execution_dao,
            step_execution_dao,
            execution_context_dao,
            launch_dao: None,
            launch_guard: Mutex::new(()),
        }
    }

    /// Delegates execution creation to `launch_dao`.
    pub fn with_launch_dao(mut self, launch_dao: Arc<dyn JobLaunchDao>) -> Self {
        self.launch_dao = Some(launch_dao);
        self
    }

    /// Builds a repository whose four DAOs are backed by the same store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: JobInstanceDao + JobExecutionDao + StepExecutionDao + ExecutionContextDao + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    /// Loads the context and the step executions (with their contexts) of an execution.
    fn hydrate(&self, job_execution: &mut JobExecution) -> RepositoryResult<()> {
        job_execution.execution_context = self
            .execution_context_dao
            .get_job_execution_context(job_execution)?;

        let job_execution_id = require_id(job_execution.id, "JobExecution")?;
        let mut step_executions = self.step_execution_dao.get_step_executions(job_execution_id)?;
        for step_execution in step_executions.iter_mut() {
            step_execution.execution_context = self
                .execution_context_dao
                .get_step_execution_context(step_execution)?;
        }
        job_execution.step_executions = step_executions;
        Ok(())
    }

    fn hydrated(&self, mut job_execution: JobExecution) -> RepositoryResult<JobExecution> {
        self.hydrate(&mut job_execution)?;
        Ok(job_execution)
    }

    /// Step executions of every execution of an instance, newest execution first.
    fn step_executions_of(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<Vec<StepExecution>> {
        let mut step_executions = Vec::new();
        for job_execution in self.job_execution_dao.find_job_executions(job_instance)? {
            let job_execution_id = require_id(job_execution.id, "JobExecution")?;
            step_executions.extend(
                self.step_execution_dao
                    .get_step_executions(job_execution_id)?
                    .into_iter()
                    .filter(|step_execution| step_execution.step_name == step_name),
            );
        }
        Ok(step_executions)
    }

    /// Checks that an existing instance can get a new execution and returns the
    /// context to carry forward.
    fn check_restart(&self, job_instance: &JobInstance) -> RepositoryResult<ExecutionContext> {
        let executions = self.job_execution_dao.find_job_executions(job_instance)?;
        check_restart(job_instance, &executions)?;

        match self.job_execution_dao.get_last_job_execution(job_instance)? {
            Some(last_execution) => self
                .execution_context_dao
                .get_job_execution_context(&last_execution),
            None => Ok(ExecutionContext::new()),
        }
    }

    fn validate_step_execution(step_execution: &StepExecution) -> RepositoryResult<()> {
        if step_execution.step_name.is_empty() {
            return Err(BatchError::InvalidArgument(
                "StepExecution's step name cannot be empty".to_string(),
            ));
        }
        if step_execution.job_execution_id.is_none() {
            return Err(BatchError::InvalidArgument(
                "StepExecution must belong to persisted JobExecution".to_string(),
            ));
        }
        Ok(())
    }

    /// Flags the step for termination when its job execution is stopping.
    fn check_for_interruption(&self, step_execution: &mut StepExecution) -> RepositoryResult<()> {
        let job_execution_id = require_id(step_execution.job_execution_id, "JobExecution")?;
        let job_execution = self
            .job_execution_dao
            .get_job_execution(job_execution_id)?
            .ok_or(BatchError::NoSuchJobExecution(job_execution_id))?;

        if job_execution.is_stopping() {
            info!("Parent JobExecution is stopped, so passing message on to StepExecution");
            step_execution.set_terminate_only();
        }
        Ok(())
    }
}

impl JobExplorer for SimpleJobRepository {
    fn get_job_names(&self) -> RepositoryResult<Vec<String>> {
        self.job_instance_dao.get_job_names()
    }

    fn get_job_instances(
        &self,
        job_name: &str,
        start: usize,
        count: usize,
    ) -> RepositoryResult<Vec<JobInstance>> {
        self.job_instance_dao
            .get_job_instances(job_name, start, count)
    }

    fn get_job_instance(&self, instance_id: i64) -> RepositoryResult<Option<JobInstance>> {
        self.job_instance_dao.get_job_instance_by_id(instance_id)
    }

    fn get_job_instance_for(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<Option<JobInstance>> {
        self.job_instance_dao
            .get_job_instance(job_name, job_parameters)
    }

    fn get_last_job_instance(&self, job_name: &str) -> RepositoryResult<Option<JobInstance>> {
        self.job_instance_dao.get_last_job_instance(job_name)
    }

    fn get_job_instance_count(&self, job_name: &str) -> RepositoryResult<usize> {
        self.job_instance_dao.get_job_instance_count(job_name)
    }

    fn get_job_executions(&self, job_instance: &JobInstance) -> RepositoryResult<Vec<JobExecution>> {
        self.job_execution_dao
            .find_job_executions(job_instance)?
            .into_iter()
            .map(|job_execution| self.hydrated(job_execution))
            .collect()
    }

    fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> RepositoryResult<Option<JobExecution>> {
        self.job_execution_dao
            .get_last_job_execution(job_instance)?
            .map(|job_execution| self.hydrated(job_execution))
            .transpose()
    }

    fn get_job_execution(&self, execution_id: i64) -> RepositoryResult<Option<JobExecution>> {
        self.job_execution_dao
            .get_job_execution(execution_id)?
            .map(|job_execution| self.hydrated(job_execution))
            .transpose()
    }

    fn find_running_job_executions(&self, job_name: &str) -> RepositoryResult<Vec<JobExecution>> {
        self.job_execution_dao
            .find_running_job_executions(job_name)?
            .into_iter()
            .map(|job_execution| self.hydrated(job_execution))
            .collect()
    }

    fn get_step_execution(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> RepositoryResult<Option<StepExecution>> {
        match self
            .step_execution_dao
            .get_step_execution(job_execution_id, step_execution_id)?
        {
            Some(mut step_execution) => {
                step_execution.execution_context = self
                    .execution_context_dao
                    .get_step_execution_context(&step_execution)?;
                Ok(Some(step_execution))
            }
            None => Ok(None),
        }
    }

    fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>> {
        let last = self
            .step_executions_of(job_instance, step_name)?
            .into_iter()
            .max_by_key(|step_execution| (step_execution.start_time, step_execution.id));

        match last {
            Some(mut step_execution) => {
                step_execution.execution_context = self
                    .execution_context_dao
                    .get_step_execution_context(&step_execution)?;
                Ok(Some(step_execution))
            }
            None => Ok(None),
        }
    }

    fn get_step_execution_count(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> RepositoryResult<usize> {
        Ok(self.step_executions_of(job_instance, step_name)?.len())
    }
}

impl JobRepository for SimpleJobRepository {
    fn create_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<JobInstance> {
        if job_name.is_empty() {
            return Err(BatchError::InvalidArgument(
                "A job name is required to create a JobInstance".to_string(),
            ));
        }
        self.job_instance_dao
            .create_job_instance(job_name, job_parameters)
    }

    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> RepositoryResult<JobExecution> {
        if job_name.is_empty() {
            return Err(BatchError::InvalidArgument(
                "Job name must not be empty".to_string(),
            ));
        }

        let _guard = self
            .launch_guard
            .lock()
            .map_err(|error| BatchError::IllegalState(format!("Poisoned launch guard: {}", error)))?;

        if let Some(launch_dao) = &self.launch_dao {
            let job_execution = launch_dao.create_job_execution(job_name, job_parameters)?;
            info!(
                "Created job execution {:?} for job {} with parameters {}",
                job_execution.id, job_name, job_parameters
            );
            return Ok(job_execution);
        }

        let (job_instance, execution_context) = match self
            .job_instance_dao
            .get_job_instance(job_name, job_parameters)?
        {
            Some(job_instance) => {
                let execution_context = self.check_restart(&job_instance)?;
                debug!("Restarting job instance {} of job {}", job_instance.id, job_name);
                (job_instance, execution_context)
            }
            None => (
                self.job_instance_dao
                    .create_job_instance(job_name, job_parameters)?,
                ExecutionContext::new(),
            ),
        };

        let mut job_execution = JobExecution::new(job_instance, job_parameters.clone());
        job_execution.execution_context = execution_context;
        job_execution.last_updated = Some(Utc::now());

        // Persisted before it is returned.
        self.job_execution_dao.save_job_execution(&mut job_execution)?;
        self.execution_context_dao
            .save_job_execution_context(&job_execution)?;
        job_execution.execution_context.clear_dirty_flag();

        info!(
            "Created job execution {:?} for job {} with parameters {}",
            job_execution.id, job_name, job_parameters
        );

        Ok(job_execution)
    }

    fn update_job_execution(&self, job_execution: &mut JobExecution) -> RepositoryResult<()> {
        require_id(job_execution.id, "JobExecution")?;

        job_execution.last_updated = Some(Utc::now());

        self.job_execution_dao.synchronize_status(job_execution)?;
        if job_execution.status == BatchStatus::Stopping && job_execution.end_time.is_some() {
            info!("Upgrading job execution status from STOPPING to STOPPED since it has already ended.");
            job_execution.upgrade_status(BatchStatus::Stopped);
        }
        self.job_execution_dao.update_job_execution(job_execution)
    }

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> RepositoryResult<()> {
        require_id(job_execution.id, "JobExecution")?;
        self.execution_context_dao
            .update_job_execution_context(job_execution)
    }

    fn add_step_execution(&self, step_execution: &mut StepExecution) -> RepositoryResult<()> {
        Self::validate_step_execution(step_execution)?;

        step_execution.last_updated = Some(Utc::now());
        self.step_execution_dao.save_step_execution(step_execution)?;
        self.execution_context_dao
            .save_step_execution_context(step_execution)
    }

    fn add_step_executions(&self, step_executions: &mut [StepExecution]) -> RepositoryResult<()> {
        let now = Utc::now();
        for step_execution in step_executions.iter_mut() {
            Self::validate_step_execution(step_execution)?;
            step_execution.last_updated = Some(now);
        }
        self.step_execution_dao.save_step_executions(step_executions)?;
        self.execution_context_dao
            .save_step_execution_contexts(step_executions)
    }

    fn update_step_execution(&self, step_execution: &mut StepExecution) -> RepositoryResult<()> {
        Self::validate_step_execution(step_execution)?;
        require_id(step_execution.id, "StepExecution")?;

        step_execution.last_updated = Some(Utc::now());
        self.step_execution_dao.update_step_execution(step_execution)?;
        self.check_for_interruption(step_execution)
    }

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> RepositoryResult<()> {
        Self::validate_step_execution(step_execution)?;
        require_id(step_execution.id, "StepExecution")?;
        self.execution_context_dao
            .update_step_execution_context(step_execution)
    }

    fn delete_step_execution(&self, step_execution: &StepExecution) -> RepositoryResult<()> {
        self.execution_context_dao
            .delete_step_execution_context(step_execution)?;
        self.step_execution_dao.delete_step_execution(step_execution)
    }

    fn delete_job_execution(&self, job_execution: &JobExecution) -> RepositoryResult<()> {
        self.execution_context_dao
            .delete_job_execution_context(job_execution)?;
        self.job_execution_dao
            .delete_job_execution_parameters(job_execution)?;

        let job_execution_id = require_id(job_execution.id, "JobExecution")?;
        // The persisted steps are authoritative: the in-memory list may be partial.
        for step_execution in self.step_execution_dao.get_step_executions(job_execution_id)? {
            self.delete_step_execution(&step_execution)?;
        }
        self.job_execution_dao.delete_job_execution(job_execution)
    }

    fn delete_job_instance(&self, job_instance: &JobInstance) -> RepositoryResult<()> {
        for job_execution in self.job_execution_dao.find_job_executions(job_instance)? {
            self.delete_job_execution(&job_execution)?;
        }
        info!("Deleting job instance {} of job {}", job_instance.id, job_instance.job_name);
        self.job_instance_dao.delete_job_instance(job_instance)
    }
}
