use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::{BatchError, repository::JobRepository};

use super::{
    build_name,
    context::ExecutionContext,
    item::{ItemProcessor, ItemReader, ItemWriter},
    status::{BatchStatus, ExitStatus},
    tasklet::{Tasklet, TaskletStepBuilder},
};

/// One attempt to run a named step within a job execution.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Identifier assigned on first save, `None` before
    pub id: Option<i64>,
    /// Optimistic locking version, `None` before first save
    pub version: Option<i32>,
    /// Name of the step
    pub step_name: String,
    /// Identifier of the owning job execution
    pub job_execution_id: Option<i64>,
    /// Current status of the step execution
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of checkpoints reached
    pub commit_count: usize,
    /// Number of chunks abandoned because of a failure
    pub rollback_count: usize,
    /// Number of errors skipped during reading
    pub read_skip_count: usize,
    /// Number of errors skipped during processing
    pub process_skip_count: usize,
    /// Number of items skipped during writing
    pub write_skip_count: usize,
    /// Number of items filtered out by the processor
    pub filter_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    /// Set when the parent job execution is stopping; the step ends at its next checkpoint.
    pub terminate_only: bool,
    pub failure_exceptions: Vec<String>,
}

impl StepExecution {
    pub fn new(step_name: &str, job_execution_id: Option<i64>) -> Self {
        Self {
            id: None,
            version: None,
            step_name: step_name.to_string(),
            job_execution_id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            filter_count: 0,
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            terminate_only: false,
            failure_exceptions: Vec::new(),
        }
    }

    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    pub fn add_failure_exception(&mut self, error: &BatchError) {
        self.failure_exceptions.push(error.to_string());
    }

    pub fn summary(&self) -> String {
        format!(
            "StepExecution: id={:?}, version={:?}, name={}, status={}, exitStatus={}, readCount={}, filterCount={}, writeCount={}, readSkipCount={}, writeSkipCount={}, processSkipCount={}, commitCount={}, rollbackCount={}",
            self.id,
            self.version,
            self.step_name,
            self.status,
            self.exit_status.exit_code(),
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.write_skip_count,
            self.process_skip_count,
            self.commit_count,
            self.rollback_count
        )
    }
}

/// A phase of a job.
///
/// The step receives a step execution already added to the repository and is
/// responsible for reporting its progress through that repository. Failures are
/// recorded in the step execution; the returned error is informative.
pub trait Step {
    fn name(&self) -> &str;

    /// Maximum number of executions of this step for one job instance.
    fn start_limit(&self) -> usize {
        usize::MAX
    }

    /// Whether the step runs again on restart although it already completed.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<(), BatchError>;
}

/// Marks the step execution as started and persists it.
pub(crate) fn start_step(
    step_execution: &mut StepExecution,
    repository: &dyn JobRepository,
) -> Result<(), BatchError> {
    info!(
        "Start of step: {}, id: {:?}",
        step_execution.step_name, step_execution.id
    );
    step_execution.start_time = Some(Utc::now());
    step_execution.status = BatchStatus::Started;
    if let Err(error) = repository.update_step_execution(step_execution) {
        mark_unknown(step_execution, &error, repository);
        return Err(error);
    }
    Ok(())
}

/// Records that the metadata of a step could not be saved: its persisted state
/// no longer matches what ran, so it ends UNKNOWN and cannot be restarted. The
/// step execution is saved once more; a second failure is only logged.
pub(crate) fn mark_unknown(
    step_execution: &mut StepExecution,
    error: &BatchError,
    repository: &dyn JobRepository,
) {
    error!(
        "Cannot save the metadata of step {}, marking it UNKNOWN: {}",
        step_execution.step_name, error
    );
    step_execution.status = BatchStatus::Unknown;
    step_execution.exit_status = step_execution
        .exit_status
        .and(&ExitStatus::unknown().add_exit_description(&error.to_string()));
    step_execution.add_failure_exception(error);
    step_execution.end_time.get_or_insert_with(Utc::now);

    if let Err(retry_error) = repository.update_step_execution(step_execution) {
        warn!(
            "Cannot save UNKNOWN status of step {}: {}",
            step_execution.step_name, retry_error
        );
    }
}

/// Records the outcome of a step, persists the final state and maps failures
/// to a `BatchError::Step`.
pub(crate) fn complete_step(
    step_execution: &mut StepExecution,
    outcome: Result<BatchStatus, BatchError>,
    repository: &dyn JobRepository,
) -> Result<(), BatchError> {
    let exit_status = match outcome {
        Ok(BatchStatus::Completed) => {
            step_execution.upgrade_status(BatchStatus::Completed);
            ExitStatus::completed()
        }
        Ok(status) => {
            step_execution.upgrade_status(status);
            ExitStatus::stopped()
        }
        Err(error) => {
            warn!("Step {} failed: {}", step_execution.step_name, error);
            step_execution.status = BatchStatus::Failed;
            step_execution.rollback_count += 1;
            step_execution.add_failure_exception(&error);
            ExitStatus::failed().add_exit_description(&error.to_string())
        }
    };

    step_execution.exit_status = step_execution.exit_status.and(&exit_status);
    step_execution.end_time = Some(Utc::now());

    let saved = repository
        .update_step_execution_context(step_execution)
        .and_then(|()| repository.update_step_execution(step_execution));
    if let Err(error) = saved {
        mark_unknown(step_execution, &error, repository);
        return Err(error);
    }

    info!("End of step: {}", step_execution.summary());

    if step_execution.status.is_unsuccessful() {
        Err(BatchError::Step(step_execution.step_name.clone()))
    } else {
        Ok(())
    }
}

/// Commits the progress of the step: persists the execution context, then the
/// step execution. The parent job execution is checked for a stop request as part
/// of the update.
pub(crate) fn checkpoint(
    step_execution: &mut StepExecution,
    repository: &dyn JobRepository,
) -> Result<(), BatchError> {
    step_execution.commit_count += 1;
    repository.update_step_execution_context(step_execution)?;
    step_execution.execution_context.clear_dirty_flag();
    repository.update_step_execution(step_execution)
}

/// A step reading, processing and writing items in chunks.
///
/// Each chunk ends with a checkpoint. Read, process and write errors are
/// skipped as long as the total number of skips stays within `skip_limit`;
/// past that the step fails.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    /// Maximum number of errors allowed before failing the step
    skip_limit: usize,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
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

        let outcome = self
            .open_streams(&step_execution.execution_context)
            .and_then(|_| self.run_chunks(step_execution, repository));

        Self::manage_error(self.reader.close());
        Self::manage_error(self.writer.close());

        complete_step(step_execution, outcome, repository)
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn open_streams(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        self.reader.open(execution_context)?;
        self.writer.open(execution_context)
    }

    fn run_chunks(
        &self,
        step_execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if step_execution.terminate_only {
                info!("Step {} interrupted before chunk", step_execution.step_name);
                return Ok(BatchStatus::Stopped);
            }

            let (read_items, finished) = self.read_chunk(step_execution)?;
            let processed_items = self.process_chunk(step_execution, &read_items)?;
            self.write_chunk(step_execution, &processed_items)?;

            self.reader.update(&mut step_execution.execution_context)?;
            self.writer.update(&mut step_execution.execution_context)?;
            checkpoint(step_execution, repository)?;

            if step_execution.terminate_only {
                info!(
                    "Step {} stopped at checkpoint {}",
                    step_execution.step_name, step_execution.commit_count
                );
                return Ok(BatchStatus::Stopped);
            }

            if finished {
                return Ok(BatchStatus::Completed);
            }
        }
    }

    /// Reads up to `chunk_size` items. The flag is `true` once the reader is exhausted.
    fn read_chunk(&self, step_execution: &mut StepExecution) -> Result<(Vec<I>, bool), BatchError> {
        debug!("Start reading chunk");

        let mut read_items = Vec::with_capacity(self.chunk_size);

        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    read_items.push(item);
                    step_execution.read_count += 1;

                    if read_items.len() >= self.chunk_size {
                        debug!("End reading chunk: FULL");
                        return Ok((read_items, false));
                    }
                }
                Ok(None) => {
                    debug!("End reading chunk: FINISHED");
                    return Ok((read_items, true));
                }
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    step_execution.read_skip_count += 1;

                    if self.is_skip_limit_reached(step_execution) {
                        return Err(error);
                    }
                }
            }
        }
    }

    fn process_chunk(
        &self,
        step_execution: &mut StepExecution,
        read_items: &[I],
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", read_items.len());
        let mut result = Vec::with_capacity(read_items.len());

        for item in read_items {
            match self.processor.process(item) {
                Ok(Some(processed_item)) => result.push(processed_item),
                Ok(None) => step_execution.filter_count += 1,
                Err(error) => {
                    warn!("Error processing item: {}", error);
                    step_execution.process_skip_count += 1;

                    if self.is_skip_limit_reached(step_execution) {
                        return Err(error);
                    }
                }
            }
        }

        Ok(result)
    }

    fn write_chunk(
        &self,
        step_execution: &mut StepExecution,
        processed_items: &[O],
    ) -> Result<(), BatchError> {
        if processed_items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        debug!("Writing chunk of {} items", processed_items.len());

        match self
            .writer
            .write(processed_items)
            .and_then(|_| self.writer.flush())
        {
            Ok(()) => {
                step_execution.write_count += processed_items.len();
                Ok(())
            }
            Err(error) => {
                warn!("Error writing items: {}", error);
                step_execution.write_skip_count += processed_items.len();

                if self.is_skip_limit_reached(step_execution) {
                    return Err(error);
                }
                Ok(())
            }
        }
    }

    fn is_skip_limit_reached(&self, step_execution: &StepExecution) -> bool {
        step_execution.skip_count() > self.skip_limit
    }

    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_limit: usize,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
            start_limit: usize::MAX,
            allow_start_if_complete: false,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
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

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::InvalidArgument(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(ChunkOrientedStep {
            name: self.name,
            reader: self.reader.ok_or_else(|| {
                BatchError::InvalidArgument("Reader is required for building a step".to_string())
            })?,
            processor: self.processor.ok_or_else(|| {
                BatchError::InvalidArgument(
                    "Processor is required for building a step".to_string(),
                )
            })?,
            writer: self.writer.ok_or_else(|| {
                BatchError::InvalidArgument("Writer is required for building a step".to_string())
            })?,
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}

/// Entry point for building steps.
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Starts a step with a random name.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    pub fn tasklet<'a>(self, tasklet: &'a dyn Tasklet) -> TaskletStepBuilder<'a> {
        TaskletStepBuilder::new(&self.name).tasklet(tasklet)
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        core::{
            item::{ItemReaderResult, ItemStream, ItemWriterResult, PassThroughProcessor},
            parameters::JobParameters,
        },
        item::memory::{ListItemReader, VecItemWriter},
        repository::{JobExplorer, JobRepository, JobRepositoryBuilder},
    };

    struct FailingReader;

    impl ItemStream for FailingReader {}

    impl ItemReader<String> for FailingReader {
        fn read(&self) -> ItemReaderResult<String> {
            Err(BatchError::ItemReader("corrupted line".to_string()))
        }
    }

    struct FailingWriter;

    impl ItemStream for FailingWriter {}

    impl ItemWriter<String> for FailingWriter {
        fn write(&self, _items: &[String]) -> ItemWriterResult {
            Err(BatchError::ItemWriter("disk full".to_string()))
        }
    }

    struct EvenOnly;

    impl ItemProcessor<i64, i64> for EvenOnly {
        fn process(&self, item: &i64) -> crate::core::item::ItemProcessorResult<i64> {
            Ok((item % 2 == 0).then_some(*item))
        }
    }

    fn step_execution(repository: &Arc<dyn JobRepository>, step_name: &str) -> StepExecution {
        let mut execution = repository
            .create_job_execution("step-test", &JobParameters::new())
            .expect("execution");
        let mut step_execution = StepExecution::new(step_name, execution.id);
        repository.add_step_execution(&mut step_execution).expect("add");
        execution.status = BatchStatus::Started;
        repository.update_job_execution(&mut execution).expect("update");
        step_execution
    }

    #[test]
    fn chunk_step_reads_processes_and_writes_all_items() -> Result<(), BatchError> {
        let repository = JobRepositoryBuilder::new().in_memory().build()?;
        let reader = ListItemReader::new(vec![1_i64, 2, 3, 4, 5]);
        let processor = EvenOnly;
        let writer = VecItemWriter::default();

        let step = StepBuilder::new("numbers")
            .chunk(2)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()?;

        let mut step_execution = step_execution(&repository, "numbers");
        step.execute(&mut step_execution, repository.as_ref())?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.exit_status, ExitStatus::completed());
        assert_eq!(step_execution.read_count, 5);
        assert_eq!(step_execution.filter_count, 3);
        assert_eq!(step_execution.write_count, 2);
        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(writer.items(), vec![2, 4]);

        let persisted = repository
            .get_step_execution(
                step_execution.job_execution_id.unwrap_or_default(),
                step_execution.id.unwrap_or_default(),
            )?
            .expect("persisted step execution");
        assert_eq!(persisted.status, BatchStatus::Completed);
        assert_eq!(persisted.commit_count, 3);
        assert_eq!(persisted.execution_context.get_long("list.reader.read.count"), Some(5));
        Ok(())
    }

    #[test]
    fn read_errors_beyond_skip_limit_fail_the_step() -> Result<(), BatchError> {
        let repository = JobRepositoryBuilder::new().in_memory().build()?;
        let reader = FailingReader;
        let processor = PassThroughProcessor;
        let writer = VecItemWriter::default();

        let step = StepBuilder::new("failing")
            .chunk(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip_limit(2)
            .build()?;

        let mut step_execution = step_execution(&repository, "failing");
        let result = step.execute(&mut step_execution, repository.as_ref());

        assert!(matches!(result, Err(BatchError::Step(_))));
        assert_eq!(step_execution.status, BatchStatus::Failed);
        assert_eq!(step_execution.exit_status.exit_code(), "FAILED");
        assert_eq!(step_execution.read_skip_count, 3);
        assert_eq!(step_execution.rollback_count, 1);
        assert_eq!(step_execution.failure_exceptions.len(), 1);
        Ok(())
    }

    #[test]
    fn write_errors_within_skip_limit_are_skipped() -> Result<(), BatchError> {
        let repository = JobRepositoryBuilder::new().in_memory().build()?;
        let reader = ListItemReader::new(vec!["a".to_string(), "b".to_string()]);
        let processor = PassThroughProcessor;
        let writer = FailingWriter;

        let step = StepBuilder::new("skipping")
            .chunk(1)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip_limit(2)
            .build()?;

        let mut step_execution = step_execution(&repository, "skipping");
        step.execute(&mut step_execution, repository.as_ref())?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.write_skip_count, 2);
        assert_eq!(step_execution.write_count, 0);
        Ok(())
    }

    #[test]
    fn builder_requires_reader_and_writer() {
        let processor = PassThroughProcessor;
        let writer = VecItemWriter::<String>::default();

        let result = StepBuilder::new("incomplete")
            .chunk::<String, String>(1)
            .processor(&processor)
            .writer(&writer)
            .build();
        assert!(matches!(result, Err(BatchError::InvalidArgument(_))));

        let reader = ListItemReader::new(vec!["a".to_string()]);
        let result = StepBuilder::new("zero")
            .chunk::<String, String>(0)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build();
        assert!(matches!(result, Err(BatchError::InvalidArgument(_))));
    }

    #[test]
    fn step_execution_summary_mentions_counters() {
        let mut step_execution = StepExecution::new("summary", Some(1));
        step_execution.read_count = 7;
        assert!(step_execution.summary().contains("readCount=7"));
        assert_eq!(step_execution.skip_count(), 0);
    }
}
