/// In-memory item reader and writer, restartable through the execution context.
pub mod memory;

#[cfg(feature = "csv")]
#[cfg_attr(docsrs, doc(cfg(feature = "csv")))]
/// Restartable CSV file reader.
pub mod csv;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
/// Item writer logging every item.
pub mod logger;
