use crate::error::BatchError;

use super::context::ExecutionContext;

/// Result of reading one item: `Ok(None)` signals the end of the input.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

pub type ItemWriterResult = Result<(), BatchError>;

/// Lifecycle hooks of a restartable reader or writer.
///
/// `open` receives the step execution context, which holds the state saved by a
/// previous execution when the step is restarted. `update` is called at every
/// checkpoint, right before the context is persisted.
pub trait ItemStream {
    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

pub trait ItemReader<I>: ItemStream {
    fn read(&self) -> ItemReaderResult<I>;
}

pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

pub trait ItemWriter<O>: ItemStream {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor returning every item unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}
