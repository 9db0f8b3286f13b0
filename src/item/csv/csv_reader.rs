use std::{
    cell::{Cell, RefCell},
    fs::File,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use log::debug;
use serde::de::DeserializeOwned;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream},
    },
};

/// Suffix of the context key holding the number of items read, after the reader name.
pub const READ_COUNT_SUFFIX: &str = "read.count";

/// A CSV reader over a file, restartable through the step execution context.
///
/// The file is opened by [`ItemStream::open`]. Leading lines are skipped first,
/// then the header row when there is one, then the items already read by a
/// previous execution. At every checkpoint [`ItemStream::update`] saves the
/// number of items read under `<name>.read.count`.
///
/// # Examples
///
/// ```
/// use spring_batch_repository::core::{context::ExecutionContext, item::{ItemReader, ItemStream}};
/// use spring_batch_repository::item::csv::csv_reader::CsvItemReaderBuilder;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Customer {
///     name: String,
///     balance: i64,
/// }
///
/// let directory = tempfile::tempdir().unwrap();
/// let path = directory.path().join("customers.csv");
/// std::fs::write(&path, "name,balance\nalice,10\nbob,20\n").unwrap();
///
/// let reader = CsvItemReaderBuilder::new()
///     .name("customers")
///     .has_headers(true)
///     .from_path(&path);
///
/// let mut context = ExecutionContext::new();
/// context.put_long("customers.read.count", 1);
/// reader.open(&context).unwrap();
///
/// let customer: Customer = reader.read().unwrap().unwrap();
/// assert_eq!(customer.name, "bob");
/// assert!(ItemReader::<Customer>::read(&reader).unwrap().is_none());
/// ```
pub struct CsvItemReader {
    name: String,
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
    lines_to_skip: usize,
    save_state: bool,
    max_item_count: usize,
    /// Items read when the reader is opened without saved state
    initial_item_count: usize,
    current_item_count: Cell<usize>,
    headers: RefCell<Option<StringRecord>>,
    /// `None` until the reader is opened, and again after it is closed
    records: RefCell<Option<StringRecordsIntoIter<File>>>,
}

impl CsvItemReader {
    /// Context key of the number of items read.
    pub fn read_count_key(&self) -> String {
        format!("{}.{}", self.name, READ_COUNT_SUFFIX)
    }

    /// Number of items read so far, including those skipped on restart.
    pub fn current_item_count(&self) -> usize {
        self.current_item_count.get()
    }

    fn saved_item_count(&self, execution_context: &ExecutionContext) -> Result<usize, BatchError> {
        if !self.save_state {
            return Ok(self.initial_item_count);
        }
        match execution_context.get_long(&self.read_count_key()) {
            Some(read_count) => usize::try_from(read_count).map_err(|_| {
                BatchError::ItemReader(format!(
                    "Invalid saved read count for {}: {}",
                    self.name, read_count
                ))
            }),
            None => Ok(self.initial_item_count),
        }
    }
}

fn next_record(
    records: &mut StringRecordsIntoIter<File>,
) -> Result<Option<StringRecord>, BatchError> {
    records
        .next()
        .transpose()
        .map_err(|error| BatchError::ItemReader(error.to_string()))
}

impl ItemStream for CsvItemReader {
    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        let file = File::open(&self.path).map_err(|error| {
            BatchError::ItemReader(format!("Cannot open {}: {}", self.path.display(), error))
        })?;
        let mut records = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file)
            .into_records();

        for _ in 0..self.lines_to_skip {
            if next_record(&mut records)?.is_none() {
                break;
            }
        }

        let headers = if self.has_headers {
            next_record(&mut records)?
        } else {
            None
        };

        let item_count = self.saved_item_count(execution_context)?;
        let mut skipped = 0;
        while skipped < item_count && next_record(&mut records)?.is_some() {
            skipped += 1;
        }
        if item_count > 0 {
            debug!(
                "Resuming CSV reader {} on {} after {} items",
                self.name,
                self.path.display(),
                skipped
            );
        }

        self.current_item_count.set(skipped);
        *self.headers.borrow_mut() = headers;
        *self.records.borrow_mut() = Some(records);
        Ok(())
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        if self.save_state {
            let read_count = i64::try_from(self.current_item_count.get()).unwrap_or(i64::MAX);
            execution_context.put_long(&self.read_count_key(), read_count);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.records.borrow_mut().take();
        Ok(())
    }
}

impl<T: DeserializeOwned> ItemReader<T> for CsvItemReader {
    fn read(&self) -> ItemReaderResult<T> {
        if self.current_item_count.get() >= self.max_item_count {
            return Ok(None);
        }

        let mut records = self.records.borrow_mut();
        let records = records.as_mut().ok_or_else(|| {
            BatchError::ItemReader(format!("CSV reader {} must be opened before reading", self.name))
        })?;

        match next_record(records)? {
            Some(record) => {
                let item = record
                    .deserialize(self.headers.borrow().as_ref())
                    .map_err(|error| BatchError::ItemReader(error.to_string()))?;
                self.current_item_count.set(self.current_item_count.get() + 1);
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

/// Builder for a [`CsvItemReader`].
///
/// Defaults: name `csv.reader`, comma delimiter, no header row, no skipped
/// lines, state saved, no item limit.
pub struct CsvItemReaderBuilder {
    name: String,
    delimiter: u8,
    has_headers: bool,
    lines_to_skip: usize,
    save_state: bool,
    max_item_count: usize,
    current_item_count: usize,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            name: "csv.reader".to_string(),
            delimiter: b',',
            has_headers: false,
            lines_to_skip: 0,
            save_state: true,
            max_item_count: usize::MAX,
            current_item_count: 0,
        }
    }

    /// Prefix of the keys saved in the execution context. Readers of the same
    /// step need distinct names.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Uses the first row after the skipped lines as field names.
    pub fn has_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    /// Number of lines ignored at the top of the file, before the header row.
    pub fn lines_to_skip(mut self, lines_to_skip: usize) -> Self {
        self.lines_to_skip = lines_to_skip;
        self
    }

    /// Whether the read count is saved and restored through the execution context.
    pub fn save_state(mut self, save_state: bool) -> Self {
        self.save_state = save_state;
        self
    }

    /// Reading ends once this many items have been read, skipped ones included.
    pub fn max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = max_item_count;
        self
    }

    /// Items to skip when there is no saved state.
    pub fn current_item_count(mut self, current_item_count: usize) -> Self {
        self.current_item_count = current_item_count;
        self
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemReader {
        CsvItemReader {
            name: self.name,
            path: path.as_ref().to_path_buf(),
            delimiter: self.delimiter,
            has_headers: self.has_headers,
            lines_to_skip: self.lines_to_skip,
            save_state: self.save_state,
            max_item_count: self.max_item_count,
            initial_item_count: self.current_item_count,
            current_item_count: Cell::new(0),
            headers: RefCell::new(None),
            records: RefCell::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        amount: f64,
    }

    fn orders_file(content: &str) -> Result<(TempDir, PathBuf), BatchError> {
        let directory = tempfile::tempdir().map_err(|error| BatchError::ItemReader(error.to_string()))?;
        let path = directory.path().join("orders.csv");
        std::fs::write(&path, content).map_err(|error| BatchError::ItemReader(error.to_string()))?;
        Ok((directory, path))
    }

    fn read_all(reader: &CsvItemReader) -> Result<Vec<u32>, BatchError> {
        let mut ids = Vec::new();
        while let Some(order) = ItemReader::<Order>::read(reader)? {
            ids.push(order.id);
        }
        Ok(ids)
    }

    #[test]
    fn skips_lines_and_header_then_maps_fields_by_name() -> Result<(), BatchError> {
        let (_directory, path) = orders_file("exported by billing\namount;id\n1.5;1\n2.5;2\n")?;
        let reader = CsvItemReaderBuilder::new()
            .delimiter(b';')
            .lines_to_skip(1)
            .has_headers(true)
            .from_path(&path);
        reader.open(&ExecutionContext::new())?;

        let first: Order = reader.read()?.expect("first order");
        assert_eq!(first, Order { id: 1, amount: 1.5 });
        assert_eq!(read_all(&reader)?, vec![2]);
        assert_eq!(reader.current_item_count(), 2);
        Ok(())
    }

    #[test]
    fn open_resumes_after_saved_read_count() -> Result<(), BatchError> {
        let (_directory, path) = orders_file("1,1.0\n2,2.0\n3,3.0\n4,4.0\n")?;
        let reader = CsvItemReaderBuilder::new().name("orders").from_path(&path);
        reader.open(&ExecutionContext::new())?;
        ItemReader::<Order>::read(&reader)?;
        ItemReader::<Order>::read(&reader)?;

        let mut context = ExecutionContext::new();
        reader.update(&mut context)?;
        reader.close()?;
        assert_eq!(context.get_long("orders.read.count"), Some(2));

        let restarted = CsvItemReaderBuilder::new().name("orders").from_path(&path);
        restarted.open(&context)?;
        assert_eq!(read_all(&restarted)?, vec![3, 4]);
        Ok(())
    }

    #[test]
    fn without_saved_state_the_file_is_read_from_the_top() -> Result<(), BatchError> {
        let (_directory, path) = orders_file("1,1.0\n2,2.0\n3,3.0\n")?;
        let mut context = ExecutionContext::new();
        context.put_long("csv.reader.read.count", 2);

        let reader = CsvItemReaderBuilder::new().save_state(false).from_path(&path);
        reader.open(&context)?;
        assert_eq!(read_all(&reader)?, vec![1, 2, 3]);

        let mut updated = ExecutionContext::new();
        reader.update(&mut updated)?;
        assert!(!updated.contains_key("csv.reader.read.count"));
        Ok(())
    }

    #[test]
    fn item_counts_bound_the_read() -> Result<(), BatchError> {
        let (_directory, path) = orders_file("1,1.0\n2,2.0\n3,3.0\n4,4.0\n5,5.0\n")?;
        let reader = CsvItemReaderBuilder::new()
            .current_item_count(1)
            .max_item_count(3)
            .from_path(&path);
        reader.open(&ExecutionContext::new())?;
        assert_eq!(read_all(&reader)?, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn read_before_open_and_missing_file_fail() -> Result<(), BatchError> {
        let (directory, path) = orders_file("1,1.0\n")?;
        let reader = CsvItemReaderBuilder::new().from_path(&path);
        assert!(matches!(
            ItemReader::<Order>::read(&reader),
            Err(BatchError::ItemReader(_))
        ));

        let missing = CsvItemReaderBuilder::new().from_path(directory.path().join("missing.csv"));
        assert!(matches!(
            missing.open(&ExecutionContext::new()),
            Err(BatchError::ItemReader(_))
        ));
        Ok(())
    }

    #[test]
    fn malformed_row_is_a_reader_error() -> Result<(), BatchError> {
        let (_directory, path) = orders_file("1,1.0\nx,2.0\n")?;
        let reader = CsvItemReaderBuilder::new().from_path(&path);
        reader.open(&ExecutionContext::new())?;
        assert!(ItemReader::<Order>::read(&reader)?.is_some());
        assert!(matches!(
            ItemReader::<Order>::read(&reader),
            Err(BatchError::ItemReader(_))
        ));
        Ok(())
    }
}
