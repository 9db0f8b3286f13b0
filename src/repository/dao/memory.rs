use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicI64, Ordering},
    },
};

use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        job::{JobExecution, JobInstance},
        parameters::{DefaultJobKeyGenerator, JobKeyGenerator, JobParameters},
        step::StepExecution,
    },
};

use super::{
    DEFAULT_MAX_EXIT_DESCRIPTION_LENGTH, DaoResult, ExecutionContextDao, JobExecutionDao,
    JobInstanceDao, StepExecutionDao, require_id, require_version, stale_version_error,
};

struct InstanceRow {
    instance: JobInstance,
    job_key: String,
}

/// Store keeping every table in memory.
///
/// Each table sits behind its own `RwLock`, so the store can be shared between
/// threads. Rows are deep copies: executions are stored without their context and
/// steps, which live in their own tables as they would in a database.
pub struct InMemoryJobStore {
    instances: RwLock<BTreeMap<i64, InstanceRow>>,
    job_executions: RwLock<BTreeMap<i64, JobExecution>>,
    step_executions: RwLock<BTreeMap<i64, StepExecution>>,
    job_contexts: RwLock<HashMap<i64, ExecutionContext>>,
    step_contexts: RwLock<HashMap<i64, ExecutionContext>>,
    instance_sequence: AtomicI64,
    job_execution_sequence: AtomicI64,
    step_execution_sequence: AtomicI64,
    key_generator: Box<dyn JobKeyGenerator>,
    max_exit_description_length: usize,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXIT_DESCRIPTION_LENGTH)
    }
}

impl InMemoryJobStore {
    pub fn new(max_exit_description_length: usize) -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            job_executions: RwLock::new(BTreeMap::new()),
            step_executions: RwLock::new(BTreeMap::new()),
            job_contexts: RwLock::new(HashMap::new()),
            step_contexts: RwLock::new(HashMap::new()),
            instance_sequence: AtomicI64::new(0),
            job_execution_sequence: AtomicI64::new(0),
            step_execution_sequence: AtomicI64::new(0),
            key_generator: Box::new(DefaultJobKeyGenerator),
            max_exit_description_length,
        }
    }

    /// Replaces the generator deriving job keys from identifying parameters.
    pub fn with_key_generator(mut self, key_generator: Box<dyn JobKeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn job_instance_count(&self) -> usize {
        self.instances.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn job_execution_count(&self) -> usize {
        self.job_executions.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn step_execution_count(&self) -> usize {
        self.step_executions.read().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Number of stored contexts, job and step ones together.
    pub fn execution_context_count(&self) -> usize {
        let job_contexts = self.job_contexts.read().map(|rows| rows.len()).unwrap_or(0);
        let step_contexts = self.step_contexts.read().map(|rows| rows.len()).unwrap_or(0);
        job_contexts + step_contexts
    }

    fn next_id(sequence: &AtomicI64) -> i64 {
        sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn job_execution_row(&self, job_execution: &JobExecution) -> JobExecution {
        let mut row = job_execution.clone();
        row.execution_context = ExecutionContext::new();
        row.step_executions = Vec::new();
        row.exit_status = row.exit_status.truncated(self.max_exit_description_length);
        row
    }

    fn step_execution_row(&self, step_execution: &StepExecution) -> StepExecution {
        let mut row = step_execution.clone();
        row.execution_context = ExecutionContext::new();
        row.terminate_only = false;
        row.exit_status = row.exit_status.truncated(self.max_exit_description_length);
        row
    }
}

fn read<T>(lock: &RwLock<T>) -> DaoResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|error| BatchError::DataAccess(format!("Poisoned store lock: {}", error)))
}

fn write<T>(lock: &RwLock<T>) -> DaoResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|error| BatchError::DataAccess(format!("Poisoned store lock: {}", error)))
}

impl JobInstanceDao for InMemoryJobStore {
    fn create_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobInstance> {
        let job_key = self.key_generator.generate_key(job_parameters);
        let mut instances = write(&self.instances)?;

        if instances
            .values()
            .any(|row| row.instance.job_name == job_name && row.job_key == job_key)
        {
            return Err(BatchError::DataAccess(format!(
                "A job instance already exists for job {} and key {}",
                job_name, job_key
            )));
        }

        let instance = JobInstance::new(Self::next_id(&self.instance_sequence), job_name);
        debug!("Created job instance {} for job {}", instance.id, job_name);
        instances.insert(
            instance.id,
            InstanceRow {
                instance: instance.clone(),
                job_key,
            },
        );
        Ok(instance)
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<Option<JobInstance>> {
        let job_key = self.key_generator.generate_key(job_parameters);
        Ok(read(&self.instances)?
            .values()
            .find(|row| row.instance.job_name == job_name && row.job_key == job_key)
            .map(|row| row.instance.clone()))
    }

    fn get_job_instance_by_id(&self, instance_id: i64) -> DaoResult<Option<JobInstance>> {
        Ok(read(&self.instances)?
            .get(&instance_id)
            .map(|row| row.instance.clone()))
    }

    fn get_job_names(&self) -> DaoResult<Vec<String>> {
        let mut names: Vec<String> = read(&self.instances)?
            .values()
            .map(|row| row.instance.job_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn get_job_instances(
        &self,
        job_name: &str,
        start: usize,
        count: usize,
    ) -> DaoResult<Vec<JobInstance>> {
        Ok(read(&self.instances)?
            .values()
            .rev()
            .filter(|row| row.instance.job_name == job_name)
            .skip(start)
            .take(count)
            .map(|row| row.instance.clone())
            .collect())
    }

    fn get_last_job_instance(&self, job_name: &str) -> DaoResult<Option<JobInstance>> {
        Ok(self.get_job_instances(job_name, 0, 1)?.into_iter().next())
    }

    fn get_job_instance_count(&self, job_name: &str) -> DaoResult<usize> {
        let count = read(&self.instances)?
            .values()
            .filter(|row| row.instance.job_name == job_name)
            .count();
        if count == 0 {
            return Err(BatchError::NoSuchJob(job_name.to_string()));
        }
        Ok(count)
    }

    fn delete_job_instance(&self, job_instance: &JobInstance) -> DaoResult<()> {
        write(&self.instances)?.remove(&job_instance.id);
        Ok(())
    }
}

impl JobExecutionDao for InMemoryJobStore {
    fn save_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        if job_execution.id.is_some() {
            return Err(BatchError::InvalidArgument(
                "JobExecution is already saved (has an id)".to_string(),
            ));
        }
        job_execution.id = Some(Self::next_id(&self.job_execution_sequence));
        job_execution.version = Some(0);

        let row = self.job_execution_row(job_execution);
        write(&self.job_executions)?.insert(row.id.unwrap_or_default(), row);
        Ok(())
    }

    fn update_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        let version = require_version(job_execution.version, "JobExecution")?;

        let mut rows = write(&self.job_executions)?;
        let current = rows
            .get(&id)
            .ok_or(BatchError::NoSuchJobExecution(id))?
            .version
            .unwrap_or_default();
        if current != version {
            return Err(stale_version_error("JobExecution", id, version, current));
        }

        job_execution.version = Some(version + 1);
        rows.insert(id, self.job_execution_row(job_execution));
        Ok(())
    }

    fn find_job_executions(&self, job_instance: &JobInstance) -> DaoResult<Vec<JobExecution>> {
        Ok(read(&self.job_executions)?
            .values()
            .rev()
            .filter(|row| row.job_instance.id == job_instance.id)
            .cloned()
            .collect())
    }

    fn get_last_job_execution(&self, job_instance: &JobInstance) -> DaoResult<Option<JobExecution>> {
        Ok(self.find_job_executions(job_instance)?.into_iter().next())
    }

    fn get_job_execution(&self, execution_id: i64) -> DaoResult<Option<JobExecution>> {
        Ok(read(&self.job_executions)?.get(&execution_id).cloned())
    }

    fn find_running_job_executions(&self, job_name: &str) -> DaoResult<Vec<JobExecution>> {
        Ok(read(&self.job_executions)?
            .values()
            .rev()
            .filter(|row| row.job_instance.job_name == job_name && row.is_running())
            .cloned()
            .collect())
    }

    fn synchronize_status(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        let rows = read(&self.job_executions)?;
        let row = rows.get(&id).ok_or(BatchError::NoSuchJobExecution(id))?;
        if row.version != job_execution.version {
            job_execution.upgrade_status(row.status);
            job_execution.version = row.version;
        }
        Ok(())
    }

    fn delete_job_execution(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        write(&self.job_executions)?.remove(&id);
        Ok(())
    }

    fn delete_job_execution_parameters(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        if let Some(row) = write(&self.job_executions)?.get_mut(&id) {
            row.job_parameters = JobParameters::new();
        }
        Ok(())
    }
}

impl StepExecutionDao for InMemoryJobStore {
    fn save_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()> {
        if step_execution.id.is_some() {
            return Err(BatchError::InvalidArgument(
                "StepExecution is already saved (has an id)".to_string(),
            ));
        }
        step_execution.id = Some(Self::next_id(&self.step_execution_sequence));
        step_execution.version = Some(0);

        let row = self.step_execution_row(step_execution);
        write(&self.step_executions)?.insert(row.id.unwrap_or_default(), row);
        Ok(())
    }

    fn save_step_executions(&self, step_executions: &mut [StepExecution]) -> DaoResult<()> {
        for step_execution in step_executions.iter_mut() {
            self.save_step_execution(step_execution)?;
        }
        Ok(())
    }

    fn update_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        let version = require_version(step_execution.version, "StepExecution")?;

        let mut rows = write(&self.step_executions)?;
        let current = rows
            .get(&id)
            .ok_or_else(|| BatchError::IllegalState(format!("No step execution with id: {}", id)))?
            .version
            .unwrap_or_default();
        if current != version {
            return Err(stale_version_error("StepExecution", id, version, current));
        }

        step_execution.version = Some(version + 1);
        rows.insert(id, self.step_execution_row(step_execution));
        Ok(())
    }

    fn get_step_execution(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> DaoResult<Option<StepExecution>> {
        Ok(read(&self.step_executions)?
            .get(&step_execution_id)
            .filter(|row| row.job_execution_id == Some(job_execution_id))
            .cloned())
    }

    fn get_step_executions(&self, job_execution_id: i64) -> DaoResult<Vec<StepExecution>> {
        Ok(read(&self.step_executions)?
            .values()
            .filter(|row| row.job_execution_id == Some(job_execution_id))
            .cloned()
            .collect())
    }

    fn delete_step_execution(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        write(&self.step_executions)?.remove(&id);
        Ok(())
    }
}

impl ExecutionContextDao for InMemoryJobStore {
    fn get_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<ExecutionContext> {
        let id = require_id(job_execution.id, "JobExecution")?;
        Ok(read(&self.job_contexts)?
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_step_execution_context(
        &self,
        step_execution: &StepExecution,
    ) -> DaoResult<ExecutionContext> {
        let id = require_id(step_execution.id, "StepExecution")?;
        Ok(read(&self.step_contexts)?
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        let mut context = job_execution.execution_context.clone();
        context.clear_dirty_flag();
        write(&self.job_contexts)?.insert(id, context);
        Ok(())
    }

    fn save_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        let mut context = step_execution.execution_context.clone();
        context.clear_dirty_flag();
        write(&self.step_contexts)?.insert(id, context);
        Ok(())
    }

    fn save_step_execution_contexts(&self, step_executions: &[StepExecution]) -> DaoResult<()> {
        for step_execution in step_executions {
            self.save_step_execution_context(step_execution)?;
        }
        Ok(())
    }

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        self.save_job_execution_context(job_execution)
    }

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        self.save_step_execution_context(step_execution)
    }

    fn delete_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        write(&self.job_contexts)?.remove(&id);
        Ok(())
    }

    fn delete_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        write(&self.step_contexts)?.remove(&id);
        Ok(())
    }
}
