//! Running jobs against a job repository and controlling their executions.

pub mod launcher;

pub mod operator;

pub use launcher::SimpleJobLauncher;
pub use operator::JobOperator;
