#![allow(dead_code)]

mod mocks;

pub use mocks::*;

use spring_batch_repository::core::parameters::{JobParameters, JobParametersBuilder};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn daily_parameters() -> JobParameters {
    JobParametersBuilder::new()
        .add_string("input.file", "customers-2024-01-31.csv")
        .add_long("run.id", 1)
        .build()
}
