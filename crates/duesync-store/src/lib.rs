//! `Store`: connection-pooled relational access with reconnect-on-use.
//!
//! A pool module plus an executor that hands a connection to a closure and
//! runs it off the async runtime: `tokio::task::spawn_blocking` over a
//! pooled `diesel::PgConnection`, the usual `r2d2`-over-a-sync-driver shape
//! for a client-server database.

mod error;
mod link_cache;
mod models;
mod pool;
mod queries;
mod schema;

pub use error::{StoreError, StoreResult};
pub use link_cache::LinkCache;
pub use models::{DuePrincipalRecord, LinkRecord};
pub use pool::{PoolConfig, PoolState};
pub use queries::{DueRevision, RefreshCandidate, StoreCounts};

use chrono::{DateTime, Utc};
use diesel::PgConnection;
use duesync_core::{DueNumber, InvoiceKey};
use duesync_normalizer::NormalizedBatch;
use pool::PgPool;
use std::time::Duration;
use tracing::warn;

const MAX_RECONNECT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn connect(database_url: &str, config: PoolConfig) -> StoreResult<Self> {
        let pool = pool::build_pool(database_url, config)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn state(&self) -> PoolState {
        pool::pool_state(&self.pool)
    }

    /// Scoped acquisition: borrows a pooled connection for the duration of
    /// `f`, validating it is live first and retrying acquisition up to
    /// `MAX_RECONNECT_ATTEMPTS` times on failure: a short retry wraps
    /// transient connection failures.
    pub async fn scoped<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = acquire_with_retry(&pool, MAX_RECONNECT_ATTEMPTS)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("blocking task panicked: {e}")))?
    }

    pub async fn list_unlinked_invoice_keys(&self, limit: Option<i64>) -> StoreResult<Vec<InvoiceKey>> {
        self.scoped(move |conn| queries::list_unlinked_invoice_keys(conn, limit)).await
    }

    pub async fn list_known_links(&self) -> StoreResult<Vec<(InvoiceKey, DueNumber)>> {
        self.scoped(queries::list_known_links).await
    }

    pub async fn get_link(&self, invoice_key: InvoiceKey) -> StoreResult<Option<DueNumber>> {
        self.scoped(move |conn| queries::get_link(conn, &invoice_key)).await
    }

    pub async fn get_due_revision(&self, due_number: DueNumber) -> StoreResult<Option<DueRevision>> {
        self.scoped(move |conn| queries::get_due_revision(conn, &due_number)).await
    }

    pub async fn select_refresh_candidates(
        &self,
        cancelled: Vec<String>,
        pending: Vec<String>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<RefreshCandidate>> {
        self.scoped(move |conn| queries::select_refresh_candidates(conn, &cancelled, &pending, stale_before))
            .await
    }

    /// Persists one DUE's full normalized batch, the links it resolves,
    /// and its `last_synced` stamp, as a single transaction.
    pub async fn persist_due_batch(
        &self,
        batch: NormalizedBatch,
        invoice_keys: Vec<InvoiceKey>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.scoped(move |conn| queries::persist_due_batch(conn, &batch, &invoice_keys, now))
            .await
    }

    pub async fn replace_bonded_acts(
        &self,
        due_number: DueNumber,
        table_name: &'static str,
        rows: Vec<duesync_normalizer::ChildRow>,
    ) -> StoreResult<()> {
        self.scoped(move |conn| queries::replace_bonded_acts(conn, &due_number, table_name, &rows))
            .await
    }

    pub async fn mark_synced(&self, due_number: DueNumber, now: DateTime<Utc>) -> StoreResult<()> {
        self.scoped(move |conn| queries::mark_synced(conn, &due_number, now)).await
    }

    pub async fn counts(&self) -> StoreResult<StoreCounts> {
        self.scoped(queries::counts).await
    }
}

fn acquire_with_retry(pool: &PgPool, attempts: u32) -> StoreResult<pool::PgPooledConnection> {
    use diesel::connection::SimpleConnection;

    let mut last_err = String::new();
    for attempt in 1..=attempts {
        match pool.get() {
            Ok(mut conn) => match conn.batch_execute("SELECT 1") {
                Ok(()) => return Ok(conn),
                Err(e) => last_err = e.to_string(),
            },
            Err(e) => last_err = e.to_string(),
        }
        if attempt < attempts {
            warn!(attempt, error = %last_err, "store connection attempt failed, retrying");
            std::thread::sleep(Duration::from_millis(50 * attempt as u64));
        }
    }
    Err(StoreError::Connection(last_err))
}
