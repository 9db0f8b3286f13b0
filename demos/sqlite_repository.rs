//! Runs a two-step job against an SQLite job repository, stopping it after the
//! first step, then restarts it from a second repository opened on the same
//! database file and prints the stored history.

use std::cell::Cell;

use spring_batch_repository::{
    BatchError,
    core::{
        job::JobBuilder,
        parameters::JobParametersBuilder,
        step::{StepBuilder, StepExecution},
        tasklet::{RepeatStatus, Tasklet},
    },
    launch::SimpleJobLauncher,
    repository::{JobExplorer, JobRepositoryBuilder},
};

struct PrintTasklet {
    message: &'static str,
    runs: Cell<usize>,
}

impl Tasklet for PrintTasklet {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        self.runs.set(self.runs.get() + 1);
        println!("{}: {}", step_execution.step_name, self.message);
        Ok(RepeatStatus::Finished)
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::init();

    let directory = tempfile::tempdir().map_err(|error| BatchError::DataAccess(error.to_string()))?;
    let url = format!("sqlite://{}", directory.path().join("batch.db").display());

    let extract = PrintTasklet {
        message: "extracting ledger",
        runs: Cell::new(0),
    };
    let publish = PrintTasklet {
        message: "publishing report",
        runs: Cell::new(0),
    };
    let extract_step = StepBuilder::new("extract").tasklet(&extract).build()?;
    let publish_step = StepBuilder::new("publish").tasklet(&publish).build()?;
    let job = JobBuilder::new()
        .name("month-end")
        .start(&extract_step)
        .next(&publish_step)
        .stop_after(&extract_step, "AWAITING_APPROVAL")
        .build();
    let parameters = JobParametersBuilder::new()
        .add_string("month", "2024-01")
        .build();

    let first = {
        let repository = JobRepositoryBuilder::new().sqlite(&url).build()?;
        SimpleJobLauncher::new(repository).run(&job, &parameters)?
    };
    println!(
        "first run: {} ({})",
        first.status,
        first.exit_status.exit_code()
    );

    let repository = JobRepositoryBuilder::new().sqlite(&url).build()?;
    let second = SimpleJobLauncher::new(repository.clone()).run(&job, &parameters)?;
    println!(
        "second run: {} ({})",
        second.status,
        second.exit_status.exit_code()
    );

    for execution in repository.get_job_executions(&second.job_instance)? {
        let steps: Vec<String> = execution
            .step_executions
            .iter()
            .map(|step_execution| format!("{}={}", step_execution.step_name, step_execution.status))
            .collect();
        println!(
            "execution {:?}: {} [{}]",
            execution.id,
            execution.status,
            steps.join(", ")
        );
    }
    Ok(())
}
