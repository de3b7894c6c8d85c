//! Pool ownership and the generic statement paths. Everything the registry
//! sends to Postgres goes through here (directly, or via a connection
//! borrowed from [`Gateway::pool`]), so this is where timeouts, retries,
//! error classification and the gateway's process-local state live.

use {
    crate::{
        error::Error,
        sql,
        value::{Value, bind_values},
    },
    chrono::{DateTime, Utc},
    futures::future::BoxFuture,
    sqlx::{
        Executor, PgConnection, PgPool,
        postgres::{PgPoolOptions, PgRow},
    },
    std::{
        collections::VecDeque,
        fmt::Write as _,
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        time::Duration,
    },
};

/// How many classified connection errors the in-memory ring keeps.
const ERROR_RING_CAP: usize = 200;

/// How much of an error chain ends up in the ring.
const ERROR_MESSAGE_CAP: usize = 500;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub statement_timeout: Duration,
    /// `None` leaves lock waits unbounded.
    pub lock_timeout: Option<Duration>,
    pub idle_in_transaction_timeout: Option<Duration>,
    pub max_connections: u32,
    /// Extra attempts for retryable statement failures. Zero disables the
    /// envelope.
    pub retries: u32,
    /// Linear backoff unit: attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(15),
            lock_timeout: None,
            idle_in_transaction_timeout: None,
            max_connections: 10,
            retries: 0,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// One classified connection failure, as kept in the error ring.
#[derive(Clone, Debug)]
pub struct CapturedError {
    pub at: DateTime<Utc>,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Default)]
struct Stats {
    queries: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub errors: u64,
    pub retries: u64,
}

pub struct Gateway {
    pool: PgPool,
    config: GatewayConfig,
    local_settings: Vec<String>,
    errors: Mutex<VecDeque<CapturedError>>,
    stats: Stats,
    closed: AtomicBool,
}

impl Gateway {
    /// Connects the pool. Session timeouts are applied to every connection
    /// the pool hands out; transactions re-apply them with `SET LOCAL`.
    pub async fn connect(url: &str, config: GatewayConfig) -> Result<Self, Error> {
        let session = session_settings(&config, false);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .after_connect(move |conn, _meta| {
                let session = session.clone();
                Box::pin(async move {
                    for statement in &session {
                        conn.execute(statement.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(url)
            .await
            .map_err(Error::classify)?;
        Ok(Self {
            local_settings: session_settings(&config, true),
            pool,
            config,
            errors: Mutex::new(VecDeque::with_capacity(ERROR_RING_CAP)),
            stats: Stats::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// The underlying pool, for callers that run table-module functions on a
    /// plain connection.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<PgRow>, Error> {
        self.prepare(sql, args)?;
        self.with_retry(|| async {
            bind_values!(sqlx::query(sql), args)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    pub async fn get_row(&self, sql: &str, args: &[Value]) -> Result<Option<PgRow>, Error> {
        self.prepare(sql, args)?;
        self.with_retry(|| async {
            bind_values!(sqlx::query(sql), args)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    pub async fn query_as<T>(&self, sql: &str, args: &[Value]) -> Result<Vec<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        self.prepare(sql, args)?;
        self.with_retry(|| async {
            bind_values!(sqlx::query_as::<_, T>(sql), args)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    pub async fn get_row_as<T>(&self, sql: &str, args: &[Value]) -> Result<Option<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        self.prepare(sql, args)?;
        self.with_retry(|| async {
            bind_values!(sqlx::query_as::<_, T>(sql), args)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    /// Inserts one row into a registered table and returns it. Column names
    /// are checked against the table config before any SQL is assembled.
    pub async fn insert<T>(&self, table: &str, row: &[(&str, Value)]) -> Result<T, Error>
    where
        T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        let (columns, values) = self.writable_columns(table, row)?;
        let statement = sql::build_insert(table, &columns).map_err(|err| self.register(err))?;
        sql::check_placeholders(&statement, values.len()).map_err(|err| self.register(err))?;
        self.with_retry(|| async {
            bind_values!(sqlx::query_as::<_, T>(&statement), &values)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    /// Updates rows of a registered table and returns them. `where_sql` is
    /// written against `$1..` and rebased past the SET columns; it must pass
    /// the free-form WHERE guard.
    pub async fn update<T>(
        &self,
        table: &str,
        set: &[(&str, Value)],
        where_sql: &str,
        where_args: &[Value],
    ) -> Result<Vec<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        let (columns, mut args) = self.writable_columns(table, set)?;
        let statement =
            sql::build_update(table, &columns, where_sql).map_err(|err| self.register(err))?;
        args.extend(where_args.iter().cloned());
        Value::check(&args).map_err(|err| self.register(err))?;
        sql::check_placeholders(&statement, args.len()).map_err(|err| self.register(err))?;
        self.with_retry(|| async {
            bind_values!(sqlx::query_as::<_, T>(&statement), &args)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::classify)
        })
        .await
    }

    /// Runs `work` inside a transaction on a connection checked out for the
    /// call: BEGIN, `SET LOCAL` timeouts, the closure, then COMMIT on
    /// success or ROLLBACK on error (a rollback failure is logged and the
    /// original error kept). For an inner scope, `work` calls
    /// `Connection::begin` on the connection it was handed and the driver
    /// demotes that to a savepoint. Never re-enter `run_in_tx` from inside
    /// `work`: the second call would wait on another pooled connection, not
    /// nest.
    pub async fn run_in_tx<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        E: From<Error> + Send,
        T: Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| self.register(Error::classify(err)))?;
        for statement in &self.local_settings {
            tx.execute(statement.as_str())
                .await
                .map_err(|err| self.register(Error::classify(err)))?;
        }
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|err| self.register(Error::classify(err)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(?rollback_err, "failed to roll back transaction");
                }
                Err(err)
            }
        }
    }

    /// Closes the pool. Only the first call does anything.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.stats.queries.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
        }
    }

    /// The most recent classified connection failures, oldest first.
    pub fn recent_errors(&self) -> Vec<CapturedError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn prepare(&self, sql: &str, args: &[Value]) -> Result<(), Error> {
        sql::check_placeholders(sql, args.len())
            .and_then(|()| Value::check(args))
            .map_err(|err| self.register(err))
    }

    fn writable_columns<'a>(
        &self,
        table: &str,
        row: &[(&'a str, Value)],
    ) -> Result<(Vec<&'a str>, Vec<Value>), Error> {
        let config = crate::table_config(table)
            .ok_or_else(|| self.register(Error::UnknownTable(table.to_string())))?;
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (column, value) in row {
            if !config.columns.iter().any(|allowed| allowed == column) {
                return Err(self.register(Error::UnknownColumn {
                    table: table.to_string(),
                    column: (*column).to_string(),
                }));
            }
            columns.push(*column);
            values.push(value.clone());
        }
        Value::check(&values).map_err(|err| self.register(err))?;
        Ok((columns, values))
    }

    async fn with_retry<T, F, Fut>(&self, run: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.stats.queries.fetch_add(1, Ordering::Relaxed);
            match run().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, attempt, "retrying statement");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(err) => return Err(self.register(err)),
            }
        }
    }

    /// Counts the error and, for connection-class failures, appends it to
    /// the ring.
    fn register(&self, err: Error) -> Error {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        if matches!(err, Error::Connection(_)) {
            let mut ring = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            if ring.len() == ERROR_RING_CAP {
                ring.pop_front();
            }
            ring.push_back(CapturedError {
                at: Utc::now(),
                kind: err.kind(),
                message: describe(&err),
            });
        }
        err
    }
}

fn session_settings(config: &GatewayConfig, local: bool) -> Vec<String> {
    let scope = if local { "SET LOCAL" } else { "SET" };
    let millis = |timeout: Option<Duration>| timeout.map(|t| t.as_millis()).unwrap_or(0);
    vec![
        format!(
            "{scope} statement_timeout = {}",
            config.statement_timeout.as_millis()
        ),
        format!("{scope} lock_timeout = {}", millis(config.lock_timeout)),
        format!(
            "{scope} idle_in_transaction_session_timeout = {}",
            millis(config.idle_in_transaction_timeout)
        ),
    ]
}

/// Error chain flattened to one capped line.
fn describe(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    if message.len() > ERROR_MESSAGE_CAP {
        let mut end = ERROR_MESSAGE_CAP;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
