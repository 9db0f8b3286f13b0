use std::sync::Arc;

use log::info;

use crate::BatchError;

use super::{
    JobRepository, SimpleJobRepository,
    dao::{DEFAULT_MAX_EXIT_DESCRIPTION_LENGTH, InMemoryJobStore},
};

#[cfg(feature = "rdbc-sqlite")]
use super::dao::SqliteJobStore;

/// Default prefix of the metadata tables.
pub const DEFAULT_TABLE_PREFIX: &str = "BATCH_";

enum StoreKind {
    InMemory,
    #[cfg(feature = "rdbc-sqlite")]
    Sqlite(String),
}

/// Builder for a [`JobRepository`] and the store behind it.
///
/// # Examples
///
/// ```
/// use spring_batch_repository::repository::{JobExplorer, JobRepositoryBuilder};
///
/// let repository = JobRepositoryBuilder::new()
///     .in_memory()
///     .max_exit_description_length(1000)
///     .build()
///     .unwrap();
/// assert!(repository.get_job_names().unwrap().is_empty());
/// ```
pub struct JobRepositoryBuilder {
    store: StoreKind,
    max_exit_description_length: usize,
    table_prefix: String,
}

impl Default for JobRepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRepositoryBuilder {
    pub fn new() -> Self {
        Self {
            store: StoreKind::InMemory,
            max_exit_description_length: DEFAULT_MAX_EXIT_DESCRIPTION_LENGTH,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }

    /// Keeps the metadata in memory. This is the default.
    pub fn in_memory(mut self) -> Self {
        self.store = StoreKind::InMemory;
        self
    }

    /// Persists the metadata in the SQLite database at `url`, for instance
    /// `sqlite://batch.db` or `sqlite::memory:`.
    #[cfg(feature = "rdbc-sqlite")]
    #[cfg_attr(docsrs, doc(cfg(feature = "rdbc-sqlite")))]
    pub fn sqlite(mut self, url: &str) -> Self {
        self.store = StoreKind::Sqlite(url.to_string());
        self
    }

    /// Prefix of the metadata tables. Only used by database stores.
    pub fn table_prefix(mut self, table_prefix: &str) -> Self {
        self.table_prefix = table_prefix.to_string();
        self
    }

    /// Exit descriptions longer than this are truncated when persisted.
    pub fn max_exit_description_length(mut self, length: usize) -> Self {
        self.max_exit_description_length = length;
        self
    }

    pub fn build(self) -> Result<Arc<dyn JobRepository>, BatchError> {
        if self.table_prefix.is_empty() {
            return Err(BatchError::InvalidArgument(
                "Table prefix must not be empty".to_string(),
            ));
        }

        let repository: Arc<dyn JobRepository> = match self.store {
            StoreKind::InMemory => {
                info!("Using in-memory job repository");
                let store = Arc::new(InMemoryJobStore::new(self.max_exit_description_length));
                Arc::new(SimpleJobRepository::from_store(store))
            }
            #[cfg(feature = "rdbc-sqlite")]
            StoreKind::Sqlite(url) => {
                info!("Using SQLite job repository at {}", url);
                let store = Arc::new(SqliteJobStore::connect(
                    &url,
                    &self.table_prefix,
                    self.max_exit_description_length,
                )?);
                Arc::new(SimpleJobRepository::from_store(store.clone()).with_launch_dao(store))
            }
        };
        Ok(repository)
    }
}
