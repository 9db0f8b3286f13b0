#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Spring Batch job repository for Rust

 A job repository keeps the metadata of batch runs so that a job can be
 restarted where it stopped, and so that a job instance already complete is
 never run twice.

 ## Core Concepts

- **JobInstance:** one logical run of a job, identified by the job name and the
  identifying job parameters.
- **JobExecution:** one attempt to run a job instance. A failed or stopped
  execution can be followed by a new one for the same instance.
- **StepExecution:** one attempt to run a step within a job execution, with its
  read, write, commit, skip and rollback counters.
- **ExecutionContext:** key/value state saved at every checkpoint and handed back
  to readers and writers on restart.
- **JobRepository:** creates executions, enforces the launch rules and persists
  every state change with optimistic locking.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables a restartable CSV `ItemReader`                        |
| rdbc-sqlite   | Enables the SQLite job store                                  |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```toml
[dependencies]
spring-batch-repository-rs = { version = "<version>", features = ["<full|csv|rdbc-sqlite|logger>"] }
```

Then, on your main.rs:

```rust
# use spring_batch_repository::{
#     core::{
#         item::PassThroughProcessor,
#         job::JobBuilder,
#         parameters::JobParametersBuilder,
#         status::BatchStatus,
#         step::StepBuilder,
#     },
#     item::memory::{ListItemReader, VecItemWriter},
#     launch::SimpleJobLauncher,
#     repository::JobRepositoryBuilder,
#     BatchError,
# };
fn main() -> Result<(), BatchError> {
    let repository = JobRepositoryBuilder::new().in_memory().build()?;
    let launcher = SimpleJobLauncher::new(repository);

    let reader = ListItemReader::new(vec!["Porsche", "Peugeot", "Mazda"]);
    let processor = PassThroughProcessor;
    let writer = VecItemWriter::default();

    let step = StepBuilder::new("copy-cars")
        .chunk(2)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;

    let job = JobBuilder::new().name("cars").start(&step).build();

    let parameters = JobParametersBuilder::new()
        .add_string("input", "cars.csv")
        .build();

    let execution = launcher.run(&job, &parameters)?;
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(writer.items(), vec!["Porsche", "Peugeot", "Mazda"]);

    // The instance is complete: launching it again is refused.
    assert!(matches!(
        launcher.run(&job, &parameters),
        Err(BatchError::JobInstanceAlreadyComplete(_))
    ));

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

pub use error::*;

/// Item readers and writers
pub mod item;

/// Job launcher and operator
pub mod launch;

/// Job repository and its stores
pub mod repository;
