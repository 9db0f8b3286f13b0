mod common;

use std::{cell::Cell, sync::Arc};

use common::{daily_parameters, init_logger};

use spring_batch_repository::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::{Job, JobBuilder},
        status::BatchStatus,
        step::{StepBuilder, StepExecution},
        tasklet::{RepeatStatus, Tasklet},
    },
    item::memory::{ListItemReader, VecItemWriter},
    launch::{JobOperator, SimpleJobLauncher},
    repository::{JobExplorer, JobRepository, JobRepositoryBuilder},
};

struct CountingTasklet {
    runs: Cell<usize>,
}

impl Tasklet for CountingTasklet {
    fn execute(&self, _step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        self.runs.set(self.runs.get() + 1);
        Ok(RepeatStatus::Finished)
    }
}

/// Asks the operator to stop the running execution when it meets a given item.
struct StopOnItem {
    operator: Arc<JobOperator>,
    job_name: String,
    item: u32,
}

impl ItemProcessor<u32, u32> for StopOnItem {
    fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
        if *item == self.item {
            let running = self.operator.running_executions(&self.job_name)?;
            for execution in running {
                if let Some(id) = execution.id {
                    self.operator.stop(id)?;
                }
            }
        }
        Ok(Some(*item))
    }
}

fn items() -> Vec<u32> {
    (1..=10).collect()
}

#[test]
fn stopped_job_restarts_where_it_stopped() -> Result<(), BatchError> {
    init_logger();
    let repository: Arc<dyn JobRepository> = JobRepositoryBuilder::new().in_memory().build()?;
    let launcher = SimpleJobLauncher::new(repository.clone());
    let operator = Arc::new(JobOperator::new(repository.clone()));
    let parameters = daily_parameters();

    let prepare = CountingTasklet { runs: Cell::new(0) };
    let prepare_step = StepBuilder::new("prepare").tasklet(&prepare).build()?;

    // First run: stopped while the second chunk is processed.
    let first_execution = {
        let reader = ListItemReader::new(items());
        let processor = StopOnItem {
            operator: operator.clone(),
            job_name: "import".to_string(),
            item: 3,
        };
        let writer = VecItemWriter::default();
        let load_step = StepBuilder::new("load")
            .chunk(2)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()?;
        let job = JobBuilder::new()
            .name("import")
            .start(&prepare_step)
            .next(&load_step)
            .build();

        let execution = launcher.run(&job, &parameters)?;
        assert_eq!(writer.items(), vec![1, 2, 3, 4]);
        execution
    };

    assert_eq!(first_execution.status, BatchStatus::Stopped);
    assert_eq!(first_execution.exit_status.exit_code(), "STOPPED");
    assert!(first_execution.end_time.is_some());

    let stopped_step = first_execution
        .step_execution("load")
        .expect("load step execution");
    assert_eq!(stopped_step.status, BatchStatus::Stopped);
    assert_eq!(stopped_step.read_count, 4);
    assert_eq!(stopped_step.commit_count, 2);

    let persisted = repository
        .get_job_execution(first_execution.id.unwrap_or_default())?
        .expect("persisted execution");
    assert_eq!(persisted.status, BatchStatus::Stopped);
    assert_eq!(persisted.step_executions.len(), 2);
    assert!(operator.running_executions("import")?.is_empty());

    // Second run: the completed step is skipped and the reader resumes.
    let reader = ListItemReader::new(items());
    let processor = StopOnItem {
        operator: operator.clone(),
        job_name: "import".to_string(),
        item: 0,
    };
    let writer = VecItemWriter::default();
    let load_step = StepBuilder::new("load")
        .chunk(2)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new()
        .name("import")
        .start(&prepare_step)
        .next(&load_step)
        .build();

    let second_execution = operator.restart(first_execution.id.unwrap_or_default(), &job)?;

    assert_eq!(second_execution.status, BatchStatus::Completed);
    assert_eq!(second_execution.job_instance, first_execution.job_instance);
    assert_eq!(prepare.runs.get(), 1);
    assert_eq!(writer.items(), vec![5, 6, 7, 8, 9, 10]);

    let resumed_step = second_execution
        .step_execution("load")
        .expect("load step execution");
    assert_eq!(resumed_step.read_count, 6);
    assert!(second_execution.step_execution("prepare").is_none());

    let instance = &second_execution.job_instance;
    assert_eq!(repository.get_step_execution_count(instance, "load")?, 2);
    assert_eq!(repository.get_step_execution_count(instance, "prepare")?, 1);
    assert_eq!(repository.get_job_executions(instance)?.len(), 2);

    assert!(matches!(
        launcher.run(&job, &parameters),
        Err(BatchError::JobInstanceAlreadyComplete(_))
    ));
    Ok(())
}

#[test]
fn execution_stopped_before_start_ends_without_running_steps() -> Result<(), BatchError> {
    let repository: Arc<dyn JobRepository> = JobRepositoryBuilder::new().build()?;
    let operator = JobOperator::new(repository.clone());

    let tasklet = CountingTasklet { runs: Cell::new(0) };
    let step = StepBuilder::new("work").tasklet(&tasklet).build()?;
    let job = JobBuilder::new().name("import").start(&step).build();

    let mut execution = repository.create_job_execution("import", &daily_parameters())?;
    operator.stop(execution.id.unwrap_or_default())?;
    execution = repository
        .get_job_execution(execution.id.unwrap_or_default())?
        .expect("persisted execution");

    job.execute(&mut execution, repository.as_ref())?;

    assert_eq!(execution.status, BatchStatus::Stopped);
    assert_eq!(execution.exit_status.exit_code(), "NOOP");
    assert_eq!(tasklet.runs.get(), 0);
    Ok(())
}

#[test]
fn start_limit_fails_the_job() -> Result<(), BatchError> {
    let repository: Arc<dyn JobRepository> = JobRepositoryBuilder::new().build()?;
    let launcher = SimpleJobLauncher::new(repository);

    struct Failing;

    impl Tasklet for Failing {
        fn execute(&self, _step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
            Err(BatchError::Step("remote system unavailable".to_string()))
        }
    }

    let tasklet = Failing;
    let step = StepBuilder::new("call")
        .tasklet(&tasklet)
        .start_limit(1)
        .build()?;
    let job = JobBuilder::new().name("sync").start(&step).build();

    let first = launcher.run(&job, &daily_parameters())?;
    assert_eq!(first.status, BatchStatus::Failed);

    let second = launcher.run(&job, &daily_parameters())?;
    assert_eq!(second.status, BatchStatus::Failed);
    assert!(
        second
            .failure_exceptions
            .iter()
            .any(|failure| failure.contains("call"))
    );
    assert!(second.step_executions.is_empty());
    Ok(())
}

#[test]
fn job_stopped_after_step_resumes_at_next_step() -> Result<(), BatchError> {
    init_logger();
    let repository: Arc<dyn JobRepository> = JobRepositoryBuilder::new().in_memory().build()?;
    let launcher = SimpleJobLauncher::new(repository.clone());

    let extract = CountingTasklet { runs: Cell::new(0) };
    let publish = CountingTasklet { runs: Cell::new(0) };
    let extract_step = StepBuilder::new("extract").tasklet(&extract).build()?;
    let publish_step = StepBuilder::new("publish").tasklet(&publish).build()?;
    let job = JobBuilder::new()
        .name("review-then-publish")
        .start(&extract_step)
        .next(&publish_step)
        .stop_after(&extract_step, "AWAITING_REVIEW")
        .build();

    let first = launcher.run(&job, &daily_parameters())?;
    assert_eq!(first.status, BatchStatus::Stopped);
    assert_eq!(first.exit_status.exit_code(), "AWAITING_REVIEW");
    assert_eq!(extract.runs.get(), 1);
    assert_eq!(publish.runs.get(), 0);
    assert_eq!(
        first
            .step_execution("extract")
            .map(|step_execution| step_execution.status),
        Some(BatchStatus::Completed)
    );

    let second = launcher.run(&job, &daily_parameters())?;
    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.exit_status.exit_code(), "COMPLETED");
    assert_eq!(second.job_instance, first.job_instance);
    assert_eq!(extract.runs.get(), 1);
    assert_eq!(publish.runs.get(), 1);
    assert!(second.step_execution("extract").is_none());

    let instance = &second.job_instance;
    assert_eq!(repository.get_job_executions(instance)?.len(), 2);
    assert_eq!(repository.get_step_execution_count(instance, "extract")?, 1);
    Ok(())
}
