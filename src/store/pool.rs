//! Store connection pool.
//!
//! # Responsibilities
//! - Hand out idle connections (LIFO) or open new ones on demand
//! - Take connections back when the borrower is done
//! - Optionally bound borrowed connections, probe liveness, evict idle ones
//! - Close every idle connection at shutdown
//!
//! The idle stack sits behind a single mutex that is never held across an
//! await point.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::observability::metrics;
use crate::store::{Connector, StoreConnection, StoreError, StoreResult};

struct IdleEntry {
    conn: Box<dyn StoreConnection>,
    since: Instant,
}

/// Process-wide cache of reusable store connections.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<IdleEntry>>,
    /// Present only when `max_size` is configured.
    slots: Option<Arc<Semaphore>>,
    config: PoolConfig,
    opened: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connector", &self.connector)
            .field("idle", &self.idle_count())
            .field("opened", &self.opened())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool. No connection is opened until the first borrow.
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        let slots = config.max_size.map(|max| Arc::new(Semaphore::new(max)));
        Arc::new(Self {
            connector,
            idle: Mutex::new(Vec::new()),
            slots,
            config,
            opened: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Borrow a connection.
    ///
    /// Pops the most recently returned idle connection, or opens a new one
    /// when the idle stack is empty. Fails with `StoreError::Connect` when a
    /// new connection cannot be opened.
    pub async fn borrow(self: &Arc<Self>) -> StoreResult<PooledConnection> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let permit = self.acquire_slot().await?;

        loop {
            let (candidate, expired) = self.pop_idle();
            self.close_all(expired, "idle_timeout").await;

            let Some(mut conn) = candidate else {
                let conn = self.open().await?;
                return Ok(PooledConnection::new(conn, Arc::clone(self), permit));
            };

            if self.config.validate_on_borrow {
                if let Err(e) = conn.ping().await {
                    tracing::warn!(error = %e, "Discarding dead pooled connection");
                    metrics::record_pool_discard("dead");
                    drop(conn);
                    continue;
                }
            }

            return Ok(PooledConnection::new(conn, Arc::clone(self), permit));
        }
    }

    /// Return a connection to the idle stack. `None` is a no-op.
    ///
    /// After shutdown the connection is dropped instead.
    pub fn release(&self, conn: Option<Box<dyn StoreConnection>>) {
        let Some(conn) = conn else {
            return;
        };

        // Checked under the idle lock so a racing shutdown cannot miss it.
        let mut idle = self.lock_idle();
        if self.is_closed() {
            drop(idle);
            metrics::record_pool_discard("closed");
            return;
        }
        idle.push(IdleEntry {
            conn,
            since: Instant::now(),
        });
        metrics::set_pool_idle(idle.len());
    }

    /// Open `count` connections and park them on the idle stack.
    pub async fn prefill(&self, count: usize) -> StoreResult<()> {
        for _ in 0..count {
            let conn = self.open().await?;
            self.release(Some(conn));
        }
        tracing::info!(count, "Connection pool warmed");
        Ok(())
    }

    /// Close every idle connection and refuse further borrows.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut idle = self.lock_idle();
            self.closed.store(true, Ordering::SeqCst);
            idle.drain(..).map(|e| e.conn).collect()
        };
        if let Some(slots) = &self.slots {
            slots.close();
        }

        let count = drained.len();
        tracing::info!(count, "Closing all pooled connections");
        self.close_all(drained, "shutdown").await;
        metrics::set_pool_idle(0);
    }

    /// Number of physical connections opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn acquire_slot(&self) -> StoreResult<Option<OwnedSemaphorePermit>> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };

        let acquire = Arc::clone(slots).acquire_owned();
        let permit = match self.config.acquire_timeout() {
            Some(limit) => tokio::time::timeout(limit, acquire)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => acquire.await,
        };
        permit.map(Some).map_err(|_| StoreError::Closed)
    }

    /// Pop the top idle entry, first evicting entries past the idle timeout.
    ///
    /// Entries are pushed in release order, so expired ones form a prefix.
    fn pop_idle(&self) -> (Option<Box<dyn StoreConnection>>, Vec<Box<dyn StoreConnection>>) {
        let mut idle = self.lock_idle();

        let expired = match self.config.idle_timeout() {
            Some(limit) => {
                let cut = idle.partition_point(|e| e.since.elapsed() >= limit);
                idle.drain(..cut).map(|e| e.conn).collect()
            }
            None => Vec::new(),
        };

        let top = idle.pop().map(|e| e.conn);
        metrics::set_pool_idle(idle.len());
        (top, expired)
    }

    async fn open(&self) -> StoreResult<Box<dyn StoreConnection>> {
        match self.connector.connect().await {
            Ok(conn) => {
                let total = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::record_pool_open();
                tracing::debug!(opened_total = total, "Opened store connection");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open store connection");
                Err(e)
            }
        }
    }

    async fn close_all(&self, conns: Vec<Box<dyn StoreConnection>>, reason: &'static str) {
        if conns.is_empty() {
            return;
        }
        for result in join_all(conns.into_iter().map(|c| c.close())).await {
            metrics::record_pool_discard(reason);
            if let Err(e) = result {
                tracing::warn!(error = %e, reason, "Error closing store connection");
            }
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<IdleEntry>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A borrowed connection. Returns itself to the pool when dropped.
///
/// Holding the guard is the only way to use a pooled connection, so a
/// connection is never shared by two borrowers and is returned exactly once.
pub struct PooledConnection {
    conn: Option<Box<dyn StoreConnection>>,
    pool: Arc<ConnectionPool>,
    /// Set between a successful begin and the matching commit or rollback.
    in_transaction: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(
        conn: Box<dyn StoreConnection>,
        pool: Arc<ConnectionPool>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool,
            in_transaction: false,
            _permit: permit,
        }
    }

    pub async fn begin_transaction(&mut self) -> StoreResult<()> {
        self.begin().await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> StoreResult<()> {
        self.commit().await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback_transaction(&mut self) -> StoreResult<()> {
        self.rollback().await?;
        self.in_transaction = false;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Drop the connection instead of pooling it. Used when it is known to
    /// be in an unusable state.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            metrics::record_pool_discard("broken");
            tracing::debug!("Discarded broken store connection");
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("conn", &self.conn).finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // A borrower cancelled mid-transaction leaves the session in an
        // unknown state; it must not reach the next borrower.
        if self.in_transaction {
            if self.conn.take().is_some() {
                metrics::record_pool_discard("open_transaction");
                tracing::warn!("Dropped store connection with an open transaction");
            }
            return;
        }
        self.pool.release(self.conn.take());
    }
}
