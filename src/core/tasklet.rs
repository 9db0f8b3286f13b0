use log::info;

use crate::{BatchError, repository::JobRepository};

use super::{
    status::BatchStatus,
    step::{Step, StepExecution, checkpoint, complete_step, start_step},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet can continue to execute.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single task run repeatedly until it reports [`RepeatStatus::Finished`].
///
/// The tasklet may keep its progress in the step execution context; the context is
/// persisted after every iteration.
pub trait Tasklet {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<(), BatchError> {
        start_step(step_execution, repository)?;
        let outcome = self.repeat(step_execution, repository);
        complete_step(step_execution, outcome, repository)
    }
}

impl TaskletStep<'_> {
    fn repeat(
        &self,
        step_execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if step_execution.terminate_only {
                return Ok(BatchStatus::Stopped);
            }

            let repeat_status = self.tasklet.execute(step_execution)?;
            checkpoint(step_execution, repository)?;

            if step_execution.terminate_only {
                info!(
                    "Tasklet step {} stopped after iteration {}",
                    self.name, step_execution.commit_count
                );
                return Ok(BatchStatus::Stopped);
            }

            if repeat_status == RepeatStatus::Finished {
                return Ok(BatchStatus::Completed);
            }
        }
    }
}

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: Option<&'a dyn Tasklet>,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasklet: None,
            start_limit: usize::MAX,
            allow_start_if_complete: false,
        }
    }

    pub fn tasklet(mut self, tasklet: &'a dyn Tasklet) -> Self {
        self.tasklet = Some(tasklet);
        self
    }

    pub fn start_limit(mut self, start_limit: usize) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build(self) -> Result<TaskletStep<'a>, BatchError> {
        Ok(TaskletStep {
            name: self.name,
            tasklet: self.tasklet.ok_or_else(|| {
                BatchError::InvalidArgument("Tasklet is required for building a step".to_string())
            })?,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        core::{parameters::JobParameters, step::StepBuilder},
        repository::JobRepositoryBuilder,
    };

    struct CountingTasklet {
        iterations: Cell<usize>,
        until: usize,
    }

    impl Tasklet for CountingTasklet {
        fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
            let iteration = self.iterations.get() + 1;
            self.iterations.set(iteration);
            step_execution
                .execution_context
                .put_long("iteration", iteration as i64);
            if iteration >= self.until {
                Ok(RepeatStatus::Finished)
            } else {
                Ok(RepeatStatus::Continuable)
            }
        }
    }

    #[test]
    fn tasklet_repeats_until_finished() -> Result<(), BatchError> {
        let repository = JobRepositoryBuilder::new().in_memory().build()?;
        let execution = repository.create_job_execution("tasklet-job", &JobParameters::new())?;

        let tasklet = CountingTasklet {
            iterations: Cell::new(0),
            until: 3,
        };
        let step = StepBuilder::new("count").tasklet(&tasklet).build()?;

        let mut step_execution = StepExecution::new("count", execution.id);
        repository.add_step_execution(&mut step_execution)?;
        step.execute(&mut step_execution, repository.as_ref())?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(step_execution.execution_context.get_long("iteration"), Some(3));
        Ok(())
    }

    #[test]
    fn builder_requires_tasklet() {
        let result = TaskletStepBuilder::new("empty").build();
        assert!(matches!(result, Err(BatchError::InvalidArgument(_))));
    }
}
