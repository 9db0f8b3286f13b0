use std::cell::{Cell, RefCell};

use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream, ItemWriter, ItemWriterResult},
    },
};

/// Context key holding the number of items already read.
pub const READ_COUNT_KEY: &str = "list.reader.read.count";

/// Reader returning the items of a list, one at a time.
///
/// The reader is restartable: its position is saved in the step execution
/// context at every checkpoint and restored by `open`.
///
/// # Examples
///
/// ```
/// use spring_batch_repository::core::item::ItemReader;
/// use spring_batch_repository::item::memory::ListItemReader;
///
/// let reader = ListItemReader::new(vec![1, 2]);
/// assert_eq!(reader.read().unwrap(), Some(1));
/// assert_eq!(reader.read().unwrap(), Some(2));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct ListItemReader<T> {
    items: Vec<T>,
    position: Cell<usize>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: Cell::new(0),
        }
    }

    /// Number of items read so far.
    pub fn position(&self) -> usize {
        self.position.get()
    }
}

impl<T> ItemStream for ListItemReader<T> {
    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        if let Some(read_count) = execution_context.get_long(READ_COUNT_KEY) {
            let position = usize::try_from(read_count).map_err(|_| {
                BatchError::ItemReader(format!("Invalid saved read count: {}", read_count))
            })?;
            debug!("Resuming list reader at item {}", position);
            self.position.set(position);
        }
        Ok(())
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        execution_context.put_long(READ_COUNT_KEY, self.position.get() as i64);
        Ok(())
    }
}

impl<T: Clone> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let position = self.position.get();
        match self.items.get(position) {
            Some(item) => {
                self.position.set(position + 1);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Writer collecting every written item in memory.
pub struct VecItemWriter<T> {
    items: RefCell<Vec<T>>,
}

impl<T> Default for VecItemWriter<T> {
    fn default() -> Self {
        Self {
            items: RefCell::new(Vec::new()),
        }
    }
}

impl<T: Clone> VecItemWriter<T> {
    /// Items written so far, in write order.
    pub fn items(&self) -> Vec<T> {
        self.items.borrow().clone()
    }
}

impl<T> ItemStream for VecItemWriter<T> {}

impl<T: Clone> ItemWriter<T> for VecItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.items.borrow_mut().extend_from_slice(items);
        Ok(())
    }
}
