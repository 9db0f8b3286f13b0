//! Stops a CSV import after its first chunk, then restarts it: the second
//! launch reads the file from the item after the last committed chunk.

use std::sync::Arc;

use serde::Deserialize;

use spring_batch_repository::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::JobBuilder,
        parameters::JobParametersBuilder,
        step::StepBuilder,
    },
    item::{csv::csv_reader::CsvItemReaderBuilder, logger::LoggerWriter},
    launch::{JobOperator, SimpleJobLauncher},
    repository::JobRepositoryBuilder,
};

#[derive(Debug, Clone, Deserialize)]
struct Car {
    year: u16,
    make: String,
    model: String,
}

/// Requests a stop of the import the first time it meets a car older than 1950.
struct StopOnVintage {
    operator: Arc<JobOperator>,
}

impl ItemProcessor<Car, Car> for StopOnVintage {
    fn process(&self, car: &Car) -> ItemProcessorResult<Car> {
        if car.year < 1950 {
            for execution in self.operator.running_executions("import-cars")? {
                if let Some(id) = execution.id {
                    self.operator.stop(id)?;
                }
            }
        }
        Ok(Some(car.clone()))
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::init();

    let directory = tempfile::tempdir().map_err(|error| BatchError::ItemReader(error.to_string()))?;
    let path = directory.path().join("cars.csv");
    std::fs::write(
        &path,
        "year,make,model\n\
         1948,Porsche,356\n\
         1967,Ford,Mustang\n\
         1971,Citroen,SM\n\
         1985,Lancia,Delta\n",
    )
    .map_err(|error| BatchError::ItemReader(error.to_string()))?;

    let repository = JobRepositoryBuilder::new().in_memory().build()?;
    let launcher = SimpleJobLauncher::new(repository.clone());
    let operator = Arc::new(JobOperator::new(repository));
    let parameters = JobParametersBuilder::new()
        .add_string("input.file", "cars.csv")
        .build();

    for attempt in 1..=2 {
        let reader = CsvItemReaderBuilder::new()
            .name("cars")
            .has_headers(true)
            .from_path(&path);
        let processor = StopOnVintage {
            operator: operator.clone(),
        };
        let writer = LoggerWriter;
        let step = StepBuilder::new("load-cars")
            .chunk(2)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()?;
        let job = JobBuilder::new().name("import-cars").start(&step).build();

        let execution = launcher.run(&job, &parameters)?;
        println!(
            "attempt {}: status {}, exit code {}, {} cars read",
            attempt,
            execution.status,
            execution.exit_status.exit_code(),
            reader.current_item_count()
        );
    }
    Ok(())
}
