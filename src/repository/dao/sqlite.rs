use std::{future::Future, str::FromStr};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use tokio::runtime::{Builder, Runtime};

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        job::{JobExecution, JobInstance},
        parameters::{
            DefaultJobKeyGenerator, JobKeyGenerator, JobParameter, JobParameters,
            JobParametersBuilder, ParameterValue,
        },
        status::{BatchStatus, ExitStatus},
        step::StepExecution,
    },
};

use super::{
    DaoResult, ExecutionContextDao, JobExecutionDao, JobInstanceDao, JobLaunchDao,
    StepExecutionDao, check_restart, require_id, require_version, stale_version_error,
};

/// Names of the metadata tables for a given prefix.
struct Tables {
    job_instance: String,
    job_execution: String,
    job_execution_params: String,
    step_execution: String,
    job_execution_context: String,
    step_execution_context: String,
}

impl Tables {
    fn new(prefix: &str) -> Self {
        Self {
            job_instance: format!("{}JOB_INSTANCE", prefix),
            job_execution: format!("{}JOB_EXECUTION", prefix),
            job_execution_params: format!("{}JOB_EXECUTION_PARAMS", prefix),
            step_execution: format!("{}STEP_EXECUTION", prefix),
            job_execution_context: format!("{}JOB_EXECUTION_CONTEXT", prefix),
            step_execution_context: format!("{}STEP_EXECUTION_CONTEXT", prefix),
        }
    }

    fn schema(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    JOB_INSTANCE_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    VERSION INTEGER NOT NULL,
                    JOB_NAME TEXT NOT NULL,
                    JOB_KEY TEXT NOT NULL,
                    UNIQUE (JOB_NAME, JOB_KEY)
                )",
                self.job_instance
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    JOB_EXECUTION_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    VERSION INTEGER NOT NULL,
                    JOB_INSTANCE_ID INTEGER NOT NULL REFERENCES {}(JOB_INSTANCE_ID),
                    CREATE_TIME TEXT NOT NULL,
                    START_TIME TEXT,
                    END_TIME TEXT,
                    STATUS TEXT NOT NULL,
                    EXIT_CODE TEXT NOT NULL,
                    EXIT_MESSAGE TEXT NOT NULL,
                    LAST_UPDATED TEXT
                )",
                self.job_execution, self.job_instance
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    JOB_EXECUTION_ID INTEGER NOT NULL REFERENCES {}(JOB_EXECUTION_ID),
                    PARAMETER_NAME TEXT NOT NULL,
                    PARAMETER_TYPE TEXT NOT NULL,
                    PARAMETER_VALUE TEXT NOT NULL,
                    IDENTIFYING BOOLEAN NOT NULL
                )",
                self.job_execution_params, self.job_execution
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    STEP_EXECUTION_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    VERSION INTEGER NOT NULL,
                    STEP_NAME TEXT NOT NULL,
                    JOB_EXECUTION_ID INTEGER NOT NULL REFERENCES {}(JOB_EXECUTION_ID),
                    START_TIME TEXT,
                    END_TIME TEXT,
                    STATUS TEXT NOT NULL,
                    COMMIT_COUNT INTEGER NOT NULL,
                    READ_COUNT INTEGER NOT NULL,
                    FILTER_COUNT INTEGER NOT NULL,
                    WRITE_COUNT INTEGER NOT NULL,
                    READ_SKIP_COUNT INTEGER NOT NULL,
                    WRITE_SKIP_COUNT INTEGER NOT NULL,
                    PROCESS_SKIP_COUNT INTEGER NOT NULL,
                    ROLLBACK_COUNT INTEGER NOT NULL,
                    EXIT_CODE TEXT NOT NULL,
                    EXIT_MESSAGE TEXT NOT NULL,
                    LAST_UPDATED TEXT
                )",
                self.step_execution, self.job_execution
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    JOB_EXECUTION_ID INTEGER PRIMARY KEY REFERENCES {}(JOB_EXECUTION_ID),
                    SERIALIZED_CONTEXT TEXT NOT NULL
                )",
                self.job_execution_context, self.job_execution
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    STEP_EXECUTION_ID INTEGER PRIMARY KEY REFERENCES {}(STEP_EXECUTION_ID),
                    SERIALIZED_CONTEXT TEXT NOT NULL
                )",
                self.step_execution_context, self.step_execution
            ),
        ]
    }

    fn select_job_executions(&self) -> String {
        format!(
            "SELECT E.JOB_EXECUTION_ID AS JOB_EXECUTION_ID, E.VERSION AS VERSION,
                    E.JOB_INSTANCE_ID AS JOB_INSTANCE_ID, I.VERSION AS INSTANCE_VERSION,
                    I.JOB_NAME AS JOB_NAME, E.CREATE_TIME AS CREATE_TIME,
                    E.START_TIME AS START_TIME, E.END_TIME AS END_TIME, E.STATUS AS STATUS,
                    E.EXIT_CODE AS EXIT_CODE, E.EXIT_MESSAGE AS EXIT_MESSAGE,
                    E.LAST_UPDATED AS LAST_UPDATED
             FROM {} E JOIN {} I ON E.JOB_INSTANCE_ID = I.JOB_INSTANCE_ID",
            self.job_execution, self.job_instance
        )
    }

    fn select_step_executions(&self) -> String {
        format!(
            "SELECT STEP_EXECUTION_ID, VERSION, STEP_NAME, JOB_EXECUTION_ID, START_TIME, END_TIME,
                    STATUS, COMMIT_COUNT, READ_COUNT, FILTER_COUNT, WRITE_COUNT, READ_SKIP_COUNT,
                    WRITE_SKIP_COUNT, PROCESS_SKIP_COUNT, ROLLBACK_COUNT, EXIT_CODE, EXIT_MESSAGE,
                    LAST_UPDATED
             FROM {}",
            self.step_execution
        )
    }
}

/// Store persisting the metadata tables in an SQLite database through `sqlx`.
///
/// The DAO contracts are synchronous: the store owns a small tokio runtime and
/// blocks on it for every statement. It must therefore not be called from
/// within an async context.
///
/// Timestamps are stored as RFC 3339 text and execution contexts as JSON text.
pub struct SqliteJobStore {
    pool: SqlitePool,
    runtime: Runtime,
    tables: Tables,
    key_generator: Box<dyn JobKeyGenerator>,
    max_exit_description_length: usize,
}

impl SqliteJobStore {
    /// Opens the database at `url`, creating it and the metadata tables when missing.
    pub fn connect(
        url: &str,
        table_prefix: &str,
        max_exit_description_length: usize,
    ) -> DaoResult<Self> {
        if table_prefix.is_empty()
            || !table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(BatchError::InvalidArgument(format!(
                "Invalid table prefix: {:?}",
                table_prefix
            )));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|error| {
                BatchError::DataAccess(format!("Cannot start the SQLite runtime: {}", error))
            })?;

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // A single connection that never expires: an in-memory database lives
        // as long as its connection.
        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options),
        )?;

        let store = Self {
            pool,
            runtime,
            tables: Tables::new(table_prefix),
            key_generator: Box::new(DefaultJobKeyGenerator),
            max_exit_description_length,
        };
        store.initialize_schema()?;

        info!("Connected SQLite job store at {}", url);
        Ok(store)
    }

    /// Replaces the generator deriving job keys from identifying parameters.
    pub fn with_key_generator(mut self, key_generator: Box<dyn JobKeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn initialize_schema(&self) -> DaoResult<()> {
        self.block_on(async {
            for statement in self.tables.schema() {
                sqlx::query(&statement).execute(&self.pool).await?;
            }
            Ok(())
        })
    }

    fn exit_message(&self, exit_status: &ExitStatus) -> String {
        exit_status
            .truncated(self.max_exit_description_length)
            .exit_description()
            .to_string()
    }

    async fn load_parameters(
        &self,
        connection: &mut SqliteConnection,
        job_execution_id: i64,
    ) -> DaoResult<JobParameters> {
        let sql = format!(
            "SELECT PARAMETER_NAME, PARAMETER_VALUE, IDENTIFYING FROM {} WHERE JOB_EXECUTION_ID = ?",
            self.tables.job_execution_params
        );
        let rows = sqlx::query(&sql)
            .bind(job_execution_id)
            .fetch_all(&mut *connection)
            .await?;

        let mut builder = JobParametersBuilder::new();
        for row in rows {
            let name: String = row.try_get("PARAMETER_NAME")?;
            let value: String = row.try_get("PARAMETER_VALUE")?;
            let identifying: bool = row.try_get("IDENTIFYING")?;
            let value: ParameterValue = serde_json::from_str(&value)?;
            builder = builder.add_parameter(&name, JobParameter::new(value, identifying));
        }
        Ok(builder.build())
    }

    async fn map_job_executions(
        &self,
        connection: &mut SqliteConnection,
        rows: Vec<SqliteRow>,
    ) -> DaoResult<Vec<JobExecution>> {
        let mut job_executions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("JOB_EXECUTION_ID")?;
            let job_instance = JobInstance {
                id: row.try_get("JOB_INSTANCE_ID")?,
                version: row.try_get("INSTANCE_VERSION")?,
                job_name: row.try_get("JOB_NAME")?,
            };
            let mut job_execution =
                JobExecution::new(job_instance, self.load_parameters(connection, id).await?);
            job_execution.id = Some(id);
            job_execution.version = Some(row.try_get("VERSION")?);
            job_execution.create_time = parse_time(&row.try_get::<String, _>("CREATE_TIME")?)?;
            job_execution.start_time = parse_optional_time(row.try_get("START_TIME")?)?;
            job_execution.end_time = parse_optional_time(row.try_get("END_TIME")?)?;
            job_execution.status = BatchStatus::from_str(&row.try_get::<String, _>("STATUS")?)?;
            job_execution.exit_status = ExitStatus::with_description(
                row.try_get::<String, _>("EXIT_CODE")?,
                row.try_get::<String, _>("EXIT_MESSAGE")?,
            );
            job_execution.last_updated = parse_optional_time(row.try_get("LAST_UPDATED")?)?;
            job_executions.push(job_execution);
        }
        Ok(job_executions)
    }

    async fn insert_step_execution(
        &self,
        connection: &mut SqliteConnection,
        step_execution: &StepExecution,
        job_execution_id: i64,
    ) -> DaoResult<i64> {
        let sql = format!(
            "INSERT INTO {} (VERSION, STEP_NAME, JOB_EXECUTION_ID, START_TIME, END_TIME, STATUS,
                COMMIT_COUNT, READ_COUNT, FILTER_COUNT, WRITE_COUNT, READ_SKIP_COUNT,
                WRITE_SKIP_COUNT, PROCESS_SKIP_COUNT, ROLLBACK_COUNT, EXIT_CODE, EXIT_MESSAGE,
                LAST_UPDATED)
             VALUES (0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.tables.step_execution
        );
        let result = sqlx::query(&sql)
            .bind(&step_execution.step_name)
            .bind(job_execution_id)
            .bind(step_execution.start_time.as_ref().map(format_time))
            .bind(step_execution.end_time.as_ref().map(format_time))
            .bind(step_execution.status.as_str())
            .bind(step_execution.commit_count as i64)
            .bind(step_execution.read_count as i64)
            .bind(step_execution.filter_count as i64)
            .bind(step_execution.write_count as i64)
            .bind(step_execution.read_skip_count as i64)
            .bind(step_execution.write_skip_count as i64)
            .bind(step_execution.process_skip_count as i64)
            .bind(step_execution.rollback_count as i64)
            .bind(step_execution.exit_status.exit_code())
            .bind(self.exit_message(&step_execution.exit_status))
            .bind(step_execution.last_updated.as_ref().map(format_time))
            .execute(&mut *connection)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn upsert_context(
        &self,
        connection: &mut SqliteConnection,
        table: &str,
        id_column: &str,
        id: i64,
        context: &ExecutionContext,
    ) -> DaoResult<()> {
        let sql = format!(
            "INSERT INTO {table} ({id_column}, SERIALIZED_CONTEXT) VALUES (?, ?)
             ON CONFLICT({id_column}) DO UPDATE SET SERIALIZED_CONTEXT = excluded.SERIALIZED_CONTEXT"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(context.to_json()?)
            .execute(&mut *connection)
            .await?;
        Ok(())
    }

    async fn load_context(
        &self,
        connection: &mut SqliteConnection,
        table: &str,
        id_column: &str,
        id: i64,
    ) -> DaoResult<ExecutionContext> {
        let sql = format!("SELECT SERIALIZED_CONTEXT FROM {table} WHERE {id_column} = ?");
        let serialized: Option<String> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&mut *connection)
            .await?;
        match serialized {
            Some(serialized) => ExecutionContext::from_json(&serialized),
            None => Ok(ExecutionContext::new()),
        }
    }

    async fn find_job_instance(
        &self,
        connection: &mut SqliteConnection,
        job_name: &str,
        job_key: &str,
    ) -> DaoResult<Option<JobInstance>> {
        let sql = format!(
            "SELECT JOB_INSTANCE_ID, VERSION, JOB_NAME FROM {} WHERE JOB_NAME = ? AND JOB_KEY = ?",
            self.tables.job_instance
        );
        let row = sqlx::query(&sql)
            .bind(job_name)
            .bind(job_key)
            .fetch_optional(&mut *connection)
            .await?;
        row.as_ref().map(map_job_instance).transpose()
    }

    async fn insert_job_instance(
        &self,
        connection: &mut SqliteConnection,
        job_name: &str,
        job_key: &str,
    ) -> Result<JobInstance, sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (VERSION, JOB_NAME, JOB_KEY) VALUES (0, ?, ?)",
            self.tables.job_instance
        );
        let result = sqlx::query(&sql)
            .bind(job_name)
            .bind(job_key)
            .execute(&mut *connection)
            .await?;
        Ok(JobInstance::new(result.last_insert_rowid(), job_name))
    }

    /// Executions of an instance, newest first.
    async fn executions_of(
        &self,
        connection: &mut SqliteConnection,
        job_instance_id: i64,
    ) -> DaoResult<Vec<JobExecution>> {
        let sql = format!(
            "{} WHERE E.JOB_INSTANCE_ID = ? ORDER BY E.JOB_EXECUTION_ID DESC",
            self.tables.select_job_executions()
        );
        let rows = sqlx::query(&sql)
            .bind(job_instance_id)
            .fetch_all(&mut *connection)
            .await?;
        self.map_job_executions(connection, rows).await
    }

    /// Inserts the execution row and its parameter rows, returning the new id.
    async fn insert_job_execution(
        &self,
        connection: &mut SqliteConnection,
        job_execution: &JobExecution,
    ) -> DaoResult<i64> {
        let execution_sql = format!(
            "INSERT INTO {} (VERSION, JOB_INSTANCE_ID, CREATE_TIME, START_TIME, END_TIME, STATUS,
                EXIT_CODE, EXIT_MESSAGE, LAST_UPDATED)
             VALUES (0, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.tables.job_execution
        );
        let parameter_sql = format!(
            "INSERT INTO {} (JOB_EXECUTION_ID, PARAMETER_NAME, PARAMETER_TYPE, PARAMETER_VALUE, IDENTIFYING)
             VALUES (?, ?, ?, ?, ?)",
            self.tables.job_execution_params
        );

        let id = sqlx::query(&execution_sql)
            .bind(job_execution.job_instance.id)
            .bind(format_time(&job_execution.create_time))
            .bind(job_execution.start_time.as_ref().map(format_time))
            .bind(job_execution.end_time.as_ref().map(format_time))
            .bind(job_execution.status.as_str())
            .bind(job_execution.exit_status.exit_code())
            .bind(self.exit_message(&job_execution.exit_status))
            .bind(job_execution.last_updated.as_ref().map(format_time))
            .execute(&mut *connection)
            .await?
            .last_insert_rowid();

        for (name, parameter) in job_execution.job_parameters.iter() {
            sqlx::query(&parameter_sql)
                .bind(id)
                .bind(name)
                .bind(parameter.value().type_name())
                .bind(serde_json::to_string(parameter.value())?)
                .bind(parameter.is_identifying())
                .execute(&mut *connection)
                .await?;
        }
        Ok(id)
    }

    /// Body of the launch transaction: instance lookup or creation, restart
    /// checks, then the new execution with the carried context.
    async fn launch(
        &self,
        connection: &mut SqliteConnection,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobExecution> {
        let job_key = self.key_generator.generate_key(job_parameters);

        let (job_instance, execution_context) =
            match self.find_job_instance(connection, job_name, &job_key).await? {
                Some(job_instance) => {
                    let executions = self.executions_of(connection, job_instance.id).await?;
                    check_restart(&job_instance, &executions)?;
                    let execution_context = match executions.first().and_then(|last| last.id) {
                        Some(last_id) => {
                            self.load_context(
                                connection,
                                &self.tables.job_execution_context,
                                "JOB_EXECUTION_ID",
                                last_id,
                            )
                            .await?
                        }
                        None => ExecutionContext::new(),
                    };
                    debug!("Restarting job instance {} of job {}", job_instance.id, job_name);
                    (job_instance, execution_context)
                }
                None => match self.insert_job_instance(connection, job_name, &job_key).await {
                    Ok(job_instance) => (job_instance, ExecutionContext::new()),
                    Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                        return Err(BatchError::JobExecutionAlreadyRunning(format!(
                            "Job instance of job {} with key {} was created by a concurrent launch",
                            job_name, job_key
                        )));
                    }
                    Err(error) => return Err(error.into()),
                },
            };

        let mut job_execution = JobExecution::new(job_instance, job_parameters.clone());
        job_execution.execution_context = execution_context;
        job_execution.last_updated = Some(Utc::now());

        let id = self.insert_job_execution(connection, &job_execution).await?;
        job_execution.id = Some(id);
        job_execution.version = Some(0);
        self.upsert_context(
            connection,
            &self.tables.job_execution_context,
            "JOB_EXECUTION_ID",
            id,
            &job_execution.execution_context,
        )
        .await?;
        job_execution.execution_context.clear_dirty_flag();
        Ok(job_execution)
    }

    async fn delete_by_id(&self, table: &str, id_column: &str, id: i64) -> DaoResult<()> {
        let sql = format!("DELETE FROM {table} WHERE {id_column} = ?");
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339()
}

fn parse_time(text: &str) -> DaoResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|error| BatchError::DataAccess(format!("Invalid timestamp {}: {}", text, error)))
}

fn parse_optional_time(text: Option<String>) -> DaoResult<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_time).transpose()
}

fn count(row: &SqliteRow, column: &str) -> DaoResult<usize> {
    Ok(row.try_get::<i64, _>(column)? as usize)
}

fn map_step_execution(row: &SqliteRow) -> DaoResult<StepExecution> {
    let step_name: String = row.try_get("STEP_NAME")?;
    let mut step_execution = StepExecution::new(&step_name, Some(row.try_get("JOB_EXECUTION_ID")?));
    step_execution.id = Some(row.try_get("STEP_EXECUTION_ID")?);
    step_execution.version = Some(row.try_get("VERSION")?);
    step_execution.start_time = parse_optional_time(row.try_get("START_TIME")?)?;
    step_execution.end_time = parse_optional_time(row.try_get("END_TIME")?)?;
    step_execution.status = BatchStatus::from_str(&row.try_get::<String, _>("STATUS")?)?;
    step_execution.commit_count = count(row, "COMMIT_COUNT")?;
    step_execution.read_count = count(row, "READ_COUNT")?;
    step_execution.filter_count = count(row, "FILTER_COUNT")?;
    step_execution.write_count = count(row, "WRITE_COUNT")?;
    step_execution.read_skip_count = count(row, "READ_SKIP_COUNT")?;
    step_execution.write_skip_count = count(row, "WRITE_SKIP_COUNT")?;
    step_execution.process_skip_count = count(row, "PROCESS_SKIP_COUNT")?;
    step_execution.rollback_count = count(row, "ROLLBACK_COUNT")?;
    step_execution.exit_status = ExitStatus::with_description(
        row.try_get::<String, _>("EXIT_CODE")?,
        row.try_get::<String, _>("EXIT_MESSAGE")?,
    );
    step_execution.last_updated = parse_optional_time(row.try_get("LAST_UPDATED")?)?;
    Ok(step_execution)
}

impl JobInstanceDao for SqliteJobStore {
    fn create_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobInstance> {
        let job_key = self.key_generator.generate_key(job_parameters);
        let result = self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.insert_job_instance(&mut connection, job_name, &job_key)
                .await
        });

        match result {
            Ok(instance) => {
                debug!("Created job instance {} for job {}", instance.id, job_name);
                Ok(instance)
            }
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(BatchError::DataAccess(format!(
                    "A job instance already exists for job {} and key {}",
                    job_name, job_key
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<Option<JobInstance>> {
        let job_key = self.key_generator.generate_key(job_parameters);
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.find_job_instance(&mut connection, job_name, &job_key)
                .await
        })
    }

    fn get_job_instance_by_id(&self, instance_id: i64) -> DaoResult<Option<JobInstance>> {
        let sql = format!(
            "SELECT JOB_INSTANCE_ID, VERSION, JOB_NAME FROM {} WHERE JOB_INSTANCE_ID = ?",
            self.tables.job_instance
        );
        let row = self.block_on(
            sqlx::query(&sql)
                .bind(instance_id)
                .fetch_optional(&self.pool),
        )?;
        row.as_ref().map(map_job_instance).transpose()
    }

    fn get_job_names(&self) -> DaoResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT JOB_NAME FROM {} ORDER BY JOB_NAME",
            self.tables.job_instance
        );
        let names: Vec<String> = self.block_on(sqlx::query_scalar(&sql).fetch_all(&self.pool))?;
        Ok(names)
    }

    fn get_job_instances(
        &self,
        job_name: &str,
        start: usize,
        count: usize,
    ) -> DaoResult<Vec<JobInstance>> {
        let sql = format!(
            "SELECT JOB_INSTANCE_ID, VERSION, JOB_NAME FROM {} WHERE JOB_NAME = ?
             ORDER BY JOB_INSTANCE_ID DESC LIMIT ? OFFSET ?",
            self.tables.job_instance
        );
        let rows = self.block_on(
            sqlx::query(&sql)
                .bind(job_name)
                .bind(i64::try_from(count).unwrap_or(i64::MAX))
                .bind(i64::try_from(start).unwrap_or(i64::MAX))
                .fetch_all(&self.pool),
        )?;
        rows.iter().map(map_job_instance).collect()
    }

    fn get_last_job_instance(&self, job_name: &str) -> DaoResult<Option<JobInstance>> {
        Ok(self.get_job_instances(job_name, 0, 1)?.into_iter().next())
    }

    fn get_job_instance_count(&self, job_name: &str) -> DaoResult<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE JOB_NAME = ?",
            self.tables.job_instance
        );
        let count: i64 = self.block_on(
            sqlx::query_scalar(&sql)
                .bind(job_name)
                .fetch_one(&self.pool),
        )?;
        if count == 0 {
            return Err(BatchError::NoSuchJob(job_name.to_string()));
        }
        Ok(count as usize)
    }

    fn delete_job_instance(&self, job_instance: &JobInstance) -> DaoResult<()> {
        self.block_on(self.delete_by_id(
            &self.tables.job_instance,
            "JOB_INSTANCE_ID",
            job_instance.id,
        ))
    }
}

fn map_job_instance(row: &SqliteRow) -> DaoResult<JobInstance> {
    Ok(JobInstance {
        id: row.try_get("JOB_INSTANCE_ID")?,
        version: row.try_get("VERSION")?,
        job_name: row.try_get("JOB_NAME")?,
    })
}

impl JobExecutionDao for SqliteJobStore {
    fn save_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        if job_execution.id.is_some() {
            return Err(BatchError::InvalidArgument(
                "JobExecution is already saved (has an id)".to_string(),
            ));
        }

        let execution: &JobExecution = job_execution;
        let id = self.block_on(async {
            let mut transaction = self.pool.begin().await?;
            let id = self.insert_job_execution(&mut *transaction, execution).await?;
            transaction.commit().await?;
            Ok::<_, BatchError>(id)
        })?;

        job_execution.id = Some(id);
        job_execution.version = Some(0);
        Ok(())
    }

    fn update_job_execution(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        let version = require_version(job_execution.version, "JobExecution")?;

        let update_sql = format!(
            "UPDATE {} SET START_TIME = ?, END_TIME = ?, STATUS = ?, EXIT_CODE = ?, EXIT_MESSAGE = ?,
                VERSION = VERSION + 1, CREATE_TIME = ?, LAST_UPDATED = ?
             WHERE JOB_EXECUTION_ID = ? AND VERSION = ?",
            self.tables.job_execution
        );
        let version_sql = format!(
            "SELECT VERSION FROM {} WHERE JOB_EXECUTION_ID = ?",
            self.tables.job_execution
        );

        let execution: &JobExecution = job_execution;
        self.block_on(async {
            let result = sqlx::query(&update_sql)
                .bind(execution.start_time.as_ref().map(format_time))
                .bind(execution.end_time.as_ref().map(format_time))
                .bind(execution.status.as_str())
                .bind(execution.exit_status.exit_code())
                .bind(self.exit_message(&execution.exit_status))
                .bind(format_time(&execution.create_time))
                .bind(execution.last_updated.as_ref().map(format_time))
                .bind(id)
                .bind(version)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                let current: Option<i32> = sqlx::query_scalar(&version_sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                return Err(match current {
                    Some(current) => stale_version_error("JobExecution", id, version, current),
                    None => BatchError::NoSuchJobExecution(id),
                });
            }
            Ok(())
        })?;

        job_execution.version = Some(version + 1);
        Ok(())
    }

    fn find_job_executions(&self, job_instance: &JobInstance) -> DaoResult<Vec<JobExecution>> {
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.executions_of(&mut connection, job_instance.id).await
        })
    }

    fn get_last_job_execution(&self, job_instance: &JobInstance) -> DaoResult<Option<JobExecution>> {
        Ok(self.find_job_executions(job_instance)?.into_iter().next())
    }

    fn get_job_execution(&self, execution_id: i64) -> DaoResult<Option<JobExecution>> {
        let sql = format!(
            "{} WHERE E.JOB_EXECUTION_ID = ?",
            self.tables.select_job_executions()
        );
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            let rows = sqlx::query(&sql)
                .bind(execution_id)
                .fetch_all(&mut *connection)
                .await?;
            Ok(self
                .map_job_executions(&mut connection, rows)
                .await?
                .into_iter()
                .next())
        })
    }

    fn find_running_job_executions(&self, job_name: &str) -> DaoResult<Vec<JobExecution>> {
        let sql = format!(
            "{} WHERE I.JOB_NAME = ? AND E.END_TIME IS NULL ORDER BY E.JOB_EXECUTION_ID DESC",
            self.tables.select_job_executions()
        );
        let job_executions = self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            let rows = sqlx::query(&sql)
                .bind(job_name)
                .fetch_all(&mut *connection)
                .await?;
            self.map_job_executions(&mut connection, rows).await
        })?;
        Ok(job_executions
            .into_iter()
            .filter(|job_execution| job_execution.is_running())
            .collect())
    }

    fn synchronize_status(&self, job_execution: &mut JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        let sql = format!(
            "SELECT VERSION, STATUS FROM {} WHERE JOB_EXECUTION_ID = ?",
            self.tables.job_execution
        );
        let row = self
            .block_on(sqlx::query(&sql).bind(id).fetch_optional(&self.pool))?
            .ok_or(BatchError::NoSuchJobExecution(id))?;

        let version: i32 = row.try_get("VERSION")?;
        if Some(version) != job_execution.version {
            let status = BatchStatus::from_str(&row.try_get::<String, _>("STATUS")?)?;
            job_execution.upgrade_status(status);
            job_execution.version = Some(version);
        }
        Ok(())
    }

    fn delete_job_execution(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        self.block_on(self.delete_by_id(&self.tables.job_execution, "JOB_EXECUTION_ID", id))
    }

    fn delete_job_execution_parameters(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        self.block_on(self.delete_by_id(
            &self.tables.job_execution_params,
            "JOB_EXECUTION_ID",
            id,
        ))
    }
}

impl StepExecutionDao for SqliteJobStore {
    fn save_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()> {
        self.save_step_executions(std::slice::from_mut(step_execution))
    }

    fn save_step_executions(&self, step_executions: &mut [StepExecution]) -> DaoResult<()> {
        let mut job_execution_ids = Vec::with_capacity(step_executions.len());
        for step_execution in step_executions.iter() {
            if step_execution.id.is_some() {
                return Err(BatchError::InvalidArgument(
                    "StepExecution is already saved (has an id)".to_string(),
                ));
            }
            job_execution_ids.push(require_id(step_execution.job_execution_id, "JobExecution")?);
        }

        let executions: &[StepExecution] = step_executions;
        let ids = self.block_on(async {
            let mut transaction = self.pool.begin().await?;
            let mut ids = Vec::with_capacity(executions.len());
            for (step_execution, job_execution_id) in executions.iter().zip(&job_execution_ids) {
                ids.push(
                    self.insert_step_execution(&mut *transaction, step_execution, *job_execution_id)
                        .await?,
                );
            }
            transaction.commit().await?;
            Ok::<_, BatchError>(ids)
        })?;

        for (step_execution, id) in step_executions.iter_mut().zip(ids) {
            step_execution.id = Some(id);
            step_execution.version = Some(0);
        }
        Ok(())
    }

    fn update_step_execution(&self, step_execution: &mut StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        let version = require_version(step_execution.version, "StepExecution")?;

        let update_sql = format!(
            "UPDATE {} SET START_TIME = ?, END_TIME = ?, STATUS = ?, COMMIT_COUNT = ?, READ_COUNT = ?,
                FILTER_COUNT = ?, WRITE_COUNT = ?, READ_SKIP_COUNT = ?, WRITE_SKIP_COUNT = ?,
                PROCESS_SKIP_COUNT = ?, ROLLBACK_COUNT = ?, EXIT_CODE = ?, EXIT_MESSAGE = ?,
                VERSION = VERSION + 1, LAST_UPDATED = ?
             WHERE STEP_EXECUTION_ID = ? AND VERSION = ?",
            self.tables.step_execution
        );
        let version_sql = format!(
            "SELECT VERSION FROM {} WHERE STEP_EXECUTION_ID = ?",
            self.tables.step_execution
        );

        let execution: &StepExecution = step_execution;
        self.block_on(async {
            let result = sqlx::query(&update_sql)
                .bind(execution.start_time.as_ref().map(format_time))
                .bind(execution.end_time.as_ref().map(format_time))
                .bind(execution.status.as_str())
                .bind(execution.commit_count as i64)
                .bind(execution.read_count as i64)
                .bind(execution.filter_count as i64)
                .bind(execution.write_count as i64)
                .bind(execution.read_skip_count as i64)
                .bind(execution.write_skip_count as i64)
                .bind(execution.process_skip_count as i64)
                .bind(execution.rollback_count as i64)
                .bind(execution.exit_status.exit_code())
                .bind(self.exit_message(&execution.exit_status))
                .bind(execution.last_updated.as_ref().map(format_time))
                .bind(id)
                .bind(version)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                let current: Option<i32> = sqlx::query_scalar(&version_sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
                return Err(match current {
                    Some(current) => stale_version_error("StepExecution", id, version, current),
                    None => BatchError::IllegalState(format!("No step execution with id: {}", id)),
                });
            }
            Ok(())
        })?;

        step_execution.version = Some(version + 1);
        Ok(())
    }

    fn get_step_execution(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> DaoResult<Option<StepExecution>> {
        let sql = format!(
            "{} WHERE JOB_EXECUTION_ID = ? AND STEP_EXECUTION_ID = ?",
            self.tables.select_step_executions()
        );
        let row = self.block_on(
            sqlx::query(&sql)
                .bind(job_execution_id)
                .bind(step_execution_id)
                .fetch_optional(&self.pool),
        )?;
        row.as_ref().map(map_step_execution).transpose()
    }

    fn get_step_executions(&self, job_execution_id: i64) -> DaoResult<Vec<StepExecution>> {
        let sql = format!(
            "{} WHERE JOB_EXECUTION_ID = ? ORDER BY STEP_EXECUTION_ID",
            self.tables.select_step_executions()
        );
        let rows = self.block_on(
            sqlx::query(&sql)
                .bind(job_execution_id)
                .fetch_all(&self.pool),
        )?;
        rows.iter().map(map_step_execution).collect()
    }

    fn delete_step_execution(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        self.block_on(self.delete_by_id(&self.tables.step_execution, "STEP_EXECUTION_ID", id))
    }
}

impl ExecutionContextDao for SqliteJobStore {
    fn get_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<ExecutionContext> {
        let id = require_id(job_execution.id, "JobExecution")?;
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.load_context(
                &mut connection,
                &self.tables.job_execution_context,
                "JOB_EXECUTION_ID",
                id,
            )
            .await
        })
    }

    fn get_step_execution_context(
        &self,
        step_execution: &StepExecution,
    ) -> DaoResult<ExecutionContext> {
        let id = require_id(step_execution.id, "StepExecution")?;
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.load_context(
                &mut connection,
                &self.tables.step_execution_context,
                "STEP_EXECUTION_ID",
                id,
            )
            .await
        })
    }

    fn save_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.upsert_context(
                &mut connection,
                &self.tables.job_execution_context,
                "JOB_EXECUTION_ID",
                id,
                &job_execution.execution_context,
            )
            .await
        })
    }

    fn save_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            self.upsert_context(
                &mut connection,
                &self.tables.step_execution_context,
                "STEP_EXECUTION_ID",
                id,
                &step_execution.execution_context,
            )
            .await
        })
    }

    fn save_step_execution_contexts(&self, step_executions: &[StepExecution]) -> DaoResult<()> {
        for step_execution in step_executions {
            self.save_step_execution_context(step_execution)?;
        }
        Ok(())
    }

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        self.save_job_execution_context(job_execution)
    }

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        self.save_step_execution_context(step_execution)
    }

    fn delete_job_execution_context(&self, job_execution: &JobExecution) -> DaoResult<()> {
        let id = require_id(job_execution.id, "JobExecution")?;
        self.block_on(self.delete_by_id(
            &self.tables.job_execution_context,
            "JOB_EXECUTION_ID",
            id,
        ))
    }

    fn delete_step_execution_context(&self, step_execution: &StepExecution) -> DaoResult<()> {
        let id = require_id(step_execution.id, "StepExecution")?;
        self.block_on(self.delete_by_id(
            &self.tables.step_execution_context,
            "STEP_EXECUTION_ID",
            id,
        ))
    }
}

impl JobLaunchDao for SqliteJobStore {
    /// Runs the launch in a `BEGIN IMMEDIATE` transaction, which takes the
    /// database write lock before the instance lookup. A second store on the
    /// same file waits for the commit and then sees the running execution.
    fn create_job_execution(
        &self,
        job_name: &str,
        job_parameters: &JobParameters,
    ) -> DaoResult<JobExecution> {
        self.block_on(async {
            let mut connection = self.pool.acquire().await?;
            sqlx::query("BEGIN IMMEDIATE")
                .execute(&mut *connection)
                .await?;

            match self.launch(&mut connection, job_name, job_parameters).await {
                Ok(job_execution) => {
                    sqlx::query("COMMIT").execute(&mut *connection).await?;
                    Ok(job_execution)
                }
                Err(error) => {
                    if let Err(rollback_error) =
                        sqlx::query("ROLLBACK").execute(&mut *connection).await
                    {
                        warn!("Cannot roll back launch of job {}: {}", job_name, rollback_error);
                    }
                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parameters::JobParametersBuilder;

    fn store() -> Result<SqliteJobStore, BatchError> {
        SqliteJobStore::connect("sqlite::memory:", "BATCH_", 2500)
    }

    fn saved_execution(store: &SqliteJobStore) -> Result<JobExecution, BatchError> {
        let parameters = JobParametersBuilder::new()
            .add_string("file", "persons.csv")
            .add_long("run", 7)
            .add_double("ratio", 0.5)
            .add_non_identifying_string("requested.by", "ops")
            .build();
        let instance = store.create_job_instance("job", &parameters)?;
        let mut execution = JobExecution::new(instance, parameters);
        store.save_job_execution(&mut execution)?;
        Ok(execution)
    }

    #[test]
    fn invalid_table_prefix_is_rejected() {
        let result = SqliteJobStore::connect("sqlite::memory:", "BATCH; DROP", 2500);
        assert!(matches!(result, Err(BatchError::InvalidArgument(_))));
    }

    #[test]
    fn duplicate_instance_is_rejected() -> Result<(), BatchError> {
        let store = store()?;
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();
        store.create_job_instance("job", &parameters)?;

        let result = store.create_job_instance("job", &parameters);
        assert!(matches!(result, Err(BatchError::DataAccess(_))));
        assert_eq!(store.get_job_instance_count("job")?, 1);
        Ok(())
    }

    #[test]
    fn execution_and_parameters_are_read_back() -> Result<(), BatchError> {
        let store = store()?;
        let execution = saved_execution(&store)?;

        let loaded = store
            .get_job_execution(execution.id.unwrap_or_default())?
            .expect("saved execution");
        assert_eq!(loaded.version, Some(0));
        assert_eq!(loaded.job_instance, execution.job_instance);
        assert_eq!(loaded.create_time, execution.create_time);
        assert_eq!(loaded.status, BatchStatus::Starting);
        assert_eq!(loaded.job_parameters.get_string("file"), Some("persons.csv"));
        assert_eq!(loaded.job_parameters.get_long("run"), Some(7));
        assert_eq!(loaded.job_parameters.get_double("ratio"), Some(0.5));
        assert_eq!(
            loaded.job_parameters.to_identifying_string(),
            execution.job_parameters.to_identifying_string()
        );
        assert!(
            !loaded
                .job_parameters
                .get("requested.by")
                .expect("non identifying parameter")
                .is_identifying()
        );
        Ok(())
    }

    #[test]
    fn stale_update_fails_with_optimistic_locking() -> Result<(), BatchError> {
        let store = store()?;
        let mut execution = saved_execution(&store)?;
        let mut stale = execution.clone();

        execution.status = BatchStatus::Started;
        store.update_job_execution(&mut execution)?;
        assert_eq!(execution.version, Some(1));

        stale.status = BatchStatus::Failed;
        let result = store.update_job_execution(&mut stale);
        assert!(matches!(result, Err(BatchError::OptimisticLockingFailure(_))));

        let mut unknown = execution.clone();
        unknown.id = Some(999);
        let result = store.update_job_execution(&mut unknown);
        assert!(matches!(result, Err(BatchError::NoSuchJobExecution(999))));
        Ok(())
    }

    #[test]
    fn synchronize_adopts_persisted_status_and_version() -> Result<(), BatchError> {
        let store = store()?;
        let mut execution = saved_execution(&store)?;
        let mut operator_copy = execution.clone();
        operator_copy.status = BatchStatus::Stopping;
        store.update_job_execution(&mut operator_copy)?;

        execution.status = BatchStatus::Started;
        store.synchronize_status(&mut execution)?;
        assert_eq!(execution.status, BatchStatus::Stopping);
        assert_eq!(execution.version, Some(1));
        Ok(())
    }

    #[test]
    fn step_executions_and_contexts_are_persisted() -> Result<(), BatchError> {
        let store = store()?;
        let execution = saved_execution(&store)?;

        let mut step_executions = vec![
            StepExecution::new("load", execution.id),
            StepExecution::new("report", execution.id),
        ];
        step_executions[0].read_count = 12;
        step_executions[0].start_time = Some(Utc::now());
        step_executions[0].execution_context.put_long("offset", 12);
        store.save_step_executions(&mut step_executions)?;
        store.save_step_execution_contexts(&step_executions)?;

        let mut load = step_executions[0].clone();
        load.status = BatchStatus::Completed;
        load.exit_status = ExitStatus::failed().add_exit_description(&"x".repeat(3000));
        store.update_step_execution(&mut load)?;

        let loaded = store.get_step_executions(execution.id.unwrap_or_default())?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].step_name, "load");
        assert_eq!(loaded[0].read_count, 12);
        assert_eq!(loaded[0].version, Some(1));
        assert_eq!(loaded[0].status, BatchStatus::Completed);
        assert_eq!(loaded[0].start_time, step_executions[0].start_time);
        assert_eq!(loaded[0].exit_status.exit_description().len(), 2500);
        assert_eq!(
            store.get_step_execution_context(&loaded[0])?.get_long("offset"),
            Some(12)
        );
        assert!(store.get_step_execution_context(&loaded[1])?.is_empty());

        let mut stale = step_executions[0].clone();
        assert!(matches!(
            store.update_step_execution(&mut stale),
            Err(BatchError::OptimisticLockingFailure(_))
        ));
        Ok(())
    }

    #[test]
    fn job_context_is_updated_in_place() -> Result<(), BatchError> {
        let store = store()?;
        let mut execution = saved_execution(&store)?;
        assert!(store.get_job_execution_context(&execution)?.is_empty());

        execution.execution_context.put_string("cursor", "a");
        store.save_job_execution_context(&execution)?;
        execution.execution_context.put_string("cursor", "b");
        store.update_job_execution_context(&execution)?;

        let context = store.get_job_execution_context(&execution)?;
        assert_eq!(context.get_string("cursor"), Some("b"));
        assert_eq!(context.len(), 1);
        Ok(())
    }

    #[test]
    fn running_executions_exclude_finished_ones() -> Result<(), BatchError> {
        let store = store()?;
        let running = saved_execution(&store)?;

        let parameters = JobParametersBuilder::new().add_long("run", 2).build();
        let instance = store.create_job_instance("job", &parameters)?;
        let mut finished = JobExecution::new(instance, parameters);
        finished.status = BatchStatus::Completed;
        finished.end_time = Some(Utc::now());
        store.save_job_execution(&mut finished)?;

        let found = store.find_running_job_executions("job")?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);
        assert_eq!(store.get_job_names()?, vec!["job".to_string()]);
        assert_eq!(store.get_job_instances("job", 0, 10)?.len(), 2);
        assert_eq!(
            store.get_last_job_instance("job")?.map(|instance| instance.id),
            Some(finished.job_instance.id)
        );
        Ok(())
    }

    fn row_count(store: &SqliteJobStore, table: &str) -> Result<i64, BatchError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = store.block_on(sqlx::query_scalar(&sql).fetch_one(&store.pool))?;
        Ok(count)
    }

    #[test]
    fn launch_checks_restart_and_carries_context_in_one_transaction() -> Result<(), BatchError> {
        let store = store()?;
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();

        let mut first = JobLaunchDao::create_job_execution(&store, "job", &parameters)?;
        assert_eq!(first.version, Some(0));
        assert!(!first.execution_context.is_dirty());
        assert!(matches!(
            JobLaunchDao::create_job_execution(&store, "job", &parameters),
            Err(BatchError::JobExecutionAlreadyRunning(_))
        ));

        first.execution_context.put_string("cursor", "page-3");
        store.update_job_execution_context(&first)?;
        first.status = BatchStatus::Failed;
        first.end_time = Some(Utc::now());
        store.update_job_execution(&mut first)?;

        let second = JobLaunchDao::create_job_execution(&store, "job", &parameters)?;
        assert_eq!(second.job_instance, first.job_instance);
        assert_eq!(second.execution_context.get_string("cursor"), Some("page-3"));
        assert_eq!(
            store
                .get_job_execution_context(&second)?
                .get_string("cursor"),
            Some("page-3")
        );
        assert_eq!(second.job_parameters.get_long("run"), Some(1));
        assert_eq!(store.get_job_instance_count("job")?, 1);

        // A refused launch leaves nothing behind.
        assert_eq!(row_count(&store, &store.tables.job_execution)?, 2);
        Ok(())
    }

    #[test]
    fn launch_refuses_unknown_and_completed_instances() -> Result<(), BatchError> {
        let store = store()?;
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();
        let mut execution = JobLaunchDao::create_job_execution(&store, "job", &parameters)?;
        execution.status = BatchStatus::Unknown;
        execution.end_time = Some(Utc::now());
        store.update_job_execution(&mut execution)?;
        assert!(matches!(
            JobLaunchDao::create_job_execution(&store, "job", &parameters),
            Err(BatchError::JobRestart(_))
        ));

        let other = JobParametersBuilder::new().add_long("run", 2).build();
        let mut execution = JobLaunchDao::create_job_execution(&store, "job", &other)?;
        execution.status = BatchStatus::Completed;
        execution.end_time = Some(Utc::now());
        store.update_job_execution(&mut execution)?;
        assert!(matches!(
            JobLaunchDao::create_job_execution(&store, "job", &other),
            Err(BatchError::JobInstanceAlreadyComplete(_))
        ));
        assert_eq!(row_count(&store, &store.tables.job_execution)?, 2);
        Ok(())
    }

    #[test]
    fn deleted_instance_empties_every_metadata_table() -> Result<(), BatchError> {
        use crate::repository::{JobRepository, SimpleJobRepository};
        use std::sync::Arc;

        let store = Arc::new(store()?);
        let repository = SimpleJobRepository::from_store(store.clone());
        let parameters = JobParametersBuilder::new()
            .add_long("run", 1)
            .add_non_identifying_string("requested.by", "ops")
            .build();

        let mut execution = repository.create_job_execution("job", &parameters)?;
        execution.execution_context.put_long("total", 3);
        repository.update_job_execution_context(&execution)?;
        let mut step_execution = StepExecution::new("load", execution.id);
        step_execution.execution_context.put_long("offset", 3);
        repository.add_step_execution(&mut step_execution)?;
        execution.status = BatchStatus::Failed;
        execution.end_time = Some(Utc::now());
        repository.update_job_execution(&mut execution)?;

        let restarted = repository.create_job_execution("job", &parameters)?;
        let mut step_execution = StepExecution::new("load", restarted.id);
        repository.add_step_execution(&mut step_execution)?;

        let tables = [
            &store.tables.job_instance,
            &store.tables.job_execution,
            &store.tables.job_execution_params,
            &store.tables.step_execution,
            &store.tables.job_execution_context,
            &store.tables.step_execution_context,
        ];
        for table in tables {
            assert!(row_count(&store, table)? > 0, "{} is empty before deletion", table);
        }

        repository.delete_job_instance(&restarted.job_instance)?;

        for table in tables {
            assert_eq!(row_count(&store, table)?, 0, "{} still has rows", table);
        }
        Ok(())
    }

    #[test]
    fn paging_past_the_last_instance_returns_nothing() -> Result<(), BatchError> {
        let store = store()?;
        saved_execution(&store)?;
        assert_eq!(store.get_job_instances("job", 0, usize::MAX)?.len(), 1);
        assert!(store.get_job_instances("job", 1, 10)?.is_empty());
        assert!(store.get_job_instances("job", usize::MAX, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn file_database_survives_reconnection() -> Result<(), BatchError> {
        let directory = tempfile::tempdir().map_err(|error| BatchError::DataAccess(error.to_string()))?;
        let url = format!("sqlite://{}", directory.path().join("batch.db").display());

        let execution_id = {
            let store = SqliteJobStore::connect(&url, "BATCH_", 2500)?;
            saved_execution(&store)?.id.unwrap_or_default()
        };

        let store = SqliteJobStore::connect(&url, "BATCH_", 2500)?;
        let loaded = store.get_job_execution(execution_id)?.expect("saved execution");
        assert_eq!(loaded.job_name(), "job");
        Ok(())
    }
}
