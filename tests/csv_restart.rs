#![cfg(feature = "csv")]

mod common;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use common::{daily_parameters, init_logger};
use serde::Deserialize;

use spring_batch_repository::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::JobBuilder,
        status::BatchStatus,
        step::StepBuilder,
    },
    item::{csv::csv_reader::CsvItemReaderBuilder, memory::VecItemWriter},
    launch::{JobOperator, SimpleJobLauncher},
    repository::{JobExplorer, JobRepository, JobRepositoryBuilder},
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct Payment {
    id: u32,
    account: String,
    cents: i64,
}

/// Stops every running execution of the job when it meets a given payment.
struct StopOnPayment {
    operator: Arc<JobOperator>,
    payment_id: u32,
}

impl ItemProcessor<Payment, u32> for StopOnPayment {
    fn process(&self, payment: &Payment) -> ItemProcessorResult<u32> {
        if payment.id == self.payment_id {
            for execution in self.operator.running_executions("settle-payments")? {
                if let Some(id) = execution.id {
                    self.operator.stop(id)?;
                }
            }
        }
        Ok(Some(payment.id))
    }
}

fn write_payments(path: &Path) -> std::io::Result<()> {
    let mut content = String::from("# settlement export\nid;account;cents\n");
    for id in 1..=9 {
        content.push_str(&format!("{};ACC-{};{}\n", id, id % 3, id * 100));
    }
    std::fs::write(path, content)
}

fn run(
    launcher: &SimpleJobLauncher,
    operator: &Arc<JobOperator>,
    path: &Path,
    stop_on: u32,
) -> Result<(BatchStatus, Vec<u32>), BatchError> {
    let reader = CsvItemReaderBuilder::new()
        .name("payments")
        .delimiter(b';')
        .lines_to_skip(1)
        .has_headers(true)
        .from_path(path);
    let processor = StopOnPayment {
        operator: operator.clone(),
        payment_id: stop_on,
    };
    let writer = VecItemWriter::default();
    let step = StepBuilder::new("settle")
        .chunk(3)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new().name("settle-payments").start(&step).build();

    let execution = launcher.run(&job, &daily_parameters())?;
    Ok((execution.status, writer.items()))
}

#[test]
fn stopped_csv_step_resumes_after_last_committed_chunk() -> Result<()> {
    init_logger();
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("payments.csv");
    write_payments(&path)?;

    let repository: Arc<dyn JobRepository> = JobRepositoryBuilder::new().in_memory().build()?;
    let launcher = SimpleJobLauncher::new(repository.clone());
    let operator = Arc::new(JobOperator::new(repository.clone()));

    // The stop request is seen at the checkpoint of the second chunk.
    let (status, written) = run(&launcher, &operator, &path, 5)?;
    assert_eq!(status, BatchStatus::Stopped);
    assert_eq!(written, vec![1, 2, 3, 4, 5, 6]);

    let stopped = repository
        .get_last_job_execution_for("settle-payments", &daily_parameters())?
        .expect("stopped execution");
    let step_execution = stopped.step_execution("settle").expect("settle step");
    assert_eq!(step_execution.execution_context.get_long("payments.read.count"), Some(6));

    let (status, written) = run(&launcher, &operator, &path, 0)?;
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(written, vec![7, 8, 9]);

    let completed = repository
        .get_last_job_execution_for("settle-payments", &daily_parameters())?
        .expect("completed execution");
    let step_execution = completed.step_execution("settle").expect("settle step");
    assert_eq!(step_execution.read_count, 3);
    assert_eq!(step_execution.execution_context.get_long("payments.read.count"), Some(9));
    Ok(())
}
