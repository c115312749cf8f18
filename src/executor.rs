use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Executor wraps the pooled connection of a Postgres session for use by
/// repositories.
///
/// Every repository of a unit of work shares the same connection, so the
/// statements they run land in the transaction the unit of work opened.
/// Repositories report the rows they touched through
/// [`Executor::record_changes`]; the session hands the tally back on flush.
#[derive(Clone, Debug)]
pub struct Executor {
    pub conn: Arc<Mutex<Option<PoolConnection<Postgres>>>>,
    changes: Arc<AtomicUsize>,
    in_transaction: Arc<AtomicBool>,
}

impl Executor {
    /// Create a new executor over a pooled connection.
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            changes: Arc::new(AtomicUsize::new(0)),
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add `rows` to the tally handed back on the next flush.
    pub fn record_changes(&self, rows: u64) {
        let rows = usize::try_from(rows).unwrap_or(usize::MAX);
        let _ = self
            .changes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(rows)));
    }

    pub(crate) fn take_changes(&self) -> usize {
        self.changes.swap(0, Ordering::SeqCst)
    }

    /// Whether the session holding this executor has an open `BEGIN` block.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub(crate) fn set_in_transaction(&self, value: bool) {
        self.in_transaction.store(value, Ordering::SeqCst);
    }

    /// Runs a statement that takes no parameters, such as `BEGIN` or `COMMIT`.
    pub(crate) async fn run(&self, sql: &str) -> Result<(), sqlx::Error> {
        use sqlx::Executor as _;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        (&mut **conn).execute(sql).await?;
        Ok(())
    }

    /// Runs a statement with text parameters and returns the rows it touched.
    pub(crate) async fn execute(&self, sql: &str, args: &[String]) -> Result<u64, sqlx::Error> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        let mut query = sqlx::query::<Postgres>(sql);
        for arg in args {
            query = query.bind(arg.clone());
        }
        let result = query.execute(&mut **conn).await?;
        Ok(result.rows_affected())
    }

    /// Runs a query returning one text column.
    pub(crate) async fn fetch_texts(&self, sql: &str, args: &[String]) -> Result<Vec<String>, sqlx::Error> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        let mut query = sqlx::query_scalar::<Postgres, String>(sql);
        for arg in args {
            query = query.bind(arg.clone());
        }
        query.fetch_all(&mut **conn).await
    }

    /// Takes the connection out, leaving None in its place.
    /// This should only be called when the session is released.
    pub(crate) async fn take_connection(&self) -> Option<PoolConnection<Postgres>> {
        self.conn.lock().await.take()
    }
}
