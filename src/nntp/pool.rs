//! Connection pool for NNTP connections using deadpool
//!
//! The pool owns every live connection: dialing authenticates before a
//! connection is ever leased out, recycling pings before reuse, and faulted
//! connections are detached so they never rejoin the idle set.

use super::connection::NntpConnection;
use crate::config::DownloadConfig;
use crate::error::{EdrError, NntpError};
use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool, RecycleResult};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_native_tls::TlsConnector;

/// Connection manager for deadpool
pub struct NntpConnectionManager {
    config: Arc<DownloadConfig>,
    /// Shared so TLS session reuse works across pooled connections
    tls_connector: Option<Arc<TlsConnector>>,
}

impl NntpConnectionManager {
    pub fn new(config: DownloadConfig) -> Result<Self, EdrError> {
        let tls_connector = if config.ssl {
            let mut builder = native_tls::TlsConnector::builder();
            if !config.verify_ssl_certs {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
            Some(Arc::new(TlsConnector::from(builder.build()?)))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            tls_connector,
        })
    }
}

impl Manager for NntpConnectionManager {
    type Type = NntpConnection;
    type Error = EdrError;

    async fn create(&self) -> Result<NntpConnection, EdrError> {
        NntpConnection::connect(&self.config, self.tls_connector.clone())
            .await
            .map_err(|e| {
                tracing::warn!("failed to create NNTP connection: {}", e);
                e
            })
    }

    async fn recycle(
        &self,
        conn: &mut NntpConnection,
        _metrics: &deadpool::managed::Metrics,
    ) -> RecycleResult<EdrError> {
        // Validate with the keepalive no-op before handing the connection out
        if conn.ping().await {
            Ok(())
        } else {
            Err(deadpool::managed::RecycleError::Backend(
                NntpError::UnhealthyConnection.into(),
            ))
        }
    }
}

/// NNTP connection pool
pub type NntpPool = Pool<NntpConnectionManager>;

/// Pooled NNTP connection lease.
///
/// Dropping the lease re-pools the connection (it is re-validated before the
/// next use); `detach` removes it from the pool entirely, closing the socket
/// and decrementing the live count.
pub struct PooledConnection {
    conn: Object<NntpConnectionManager>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Fetch one article body through this lease.
    pub async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<u8>, EdrError> {
        self.conn.fetch_body(message_id).await
    }

    /// STAT one article through this lease.
    pub async fn stat(&mut self, message_id: &str) -> Result<bool, EdrError> {
        self.conn.stat(message_id).await
    }

    /// Discard this connection instead of returning it to the pool.
    ///
    /// Callers must do this after any transient fault; the stream state is
    /// unknown and must not be reused.
    pub fn detach(self) {
        let mut conn = Object::take(self.conn);
        tokio::spawn(async move {
            conn.close().await;
        });
    }
}

/// Builder for creating connection pools with configuration
pub struct NntpPoolBuilder {
    config: DownloadConfig,
    max_size: usize,
    timeouts: deadpool::managed::Timeouts,
}

impl NntpPoolBuilder {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            max_size: config.connections as usize,
            config,
            timeouts: deadpool::managed::Timeouts {
                wait: Some(Duration::from_secs(30)),
                create: Some(Duration::from_secs(30)),
                recycle: Some(Duration::from_secs(5)),
            },
        }
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn timeouts(mut self, timeouts: deadpool::managed::Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<NntpPool, EdrError> {
        let manager = NntpConnectionManager::new(self.config)?;
        Pool::builder(manager)
            .max_size(self.max_size)
            .runtime(deadpool::Runtime::Tokio1)
            .timeouts(self.timeouts)
            .build()
            .map_err(|e| NntpError::Protocol(format!("pool build failed: {}", e)).into())
    }
}

/// Extension trait for the pool to provide convenient methods
#[async_trait]
pub trait NntpPoolExt {
    /// Lease a validated connection, waiting if the pool is at capacity.
    async fn acquire(&self) -> Result<PooledConnection, EdrError>;

    /// Pre-warm the pool by creating initial connections
    async fn warm_up(&self, target: usize) -> Result<(), EdrError>;
}

#[async_trait]
impl NntpPoolExt for NntpPool {
    async fn acquire(&self) -> Result<PooledConnection, EdrError> {
        let conn = self.get().await.map_err(|e| match e {
            deadpool::managed::PoolError::Timeout(_) => {
                EdrError::from(NntpError::Timeout { seconds: 30 })
            }
            deadpool::managed::PoolError::Backend(inner) => inner,
            other => EdrError::from(NntpError::Protocol(format!("pool: {}", other))),
        })?;
        Ok(PooledConnection { conn })
    }

    async fn warm_up(&self, target: usize) -> Result<(), EdrError> {
        let target = target.min(self.status().max_size);
        let leases = futures::future::join_all((0..target).map(|_| self.get())).await;
        for lease in &leases {
            if let Err(e) = lease {
                tracing::warn!("failed to pre-warm connection: {}", e);
            }
        }
        // Dropping the leases returns them to the idle set
        Ok(())
    }
}
