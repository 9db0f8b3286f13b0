use rand::distr::{Alphanumeric, SampleString};

pub mod context;

pub mod item;

pub mod job;

pub mod parameters;

pub mod status;

pub mod step;

pub mod tasklet;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
