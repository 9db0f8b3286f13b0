/// Restartable CSV reading.
///
/// [`csv_reader::CsvItemReader`] deserializes the rows of a delimited file into
/// Rust structs with serde. It keeps the number of items it has read in the
/// step execution context, so a restarted step continues after the last
/// committed chunk instead of reading the file from the top.
///
/// # Example
///
/// ```no_run
/// use spring_batch_repository::item::csv::csv_reader::CsvItemReaderBuilder;
///
/// let reader = CsvItemReaderBuilder::new()
///     .name("customers")
///     .has_headers(true)
///     .delimiter(b';')
///     .from_path("customers.csv");
/// ```
pub mod csv_reader;
