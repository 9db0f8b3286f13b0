use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemStream, ItemWriter, ItemWriterResult};

/// Writer logging every item at `info` level.
#[derive(Default)]
pub struct LoggerWriter;

impl ItemStream for LoggerWriter {}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}
