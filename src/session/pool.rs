//! Per-device session pool.
//!
//! The pool is the only shared mutable state in the gateway. Each hostname
//! gets one [`PoolEntry`]: a semaphore bounding concurrent sessions and a
//! list of idle, reusable sessions. Entries are created lazily on first
//! request and cached in a moka map whose time-to-idle eventually forgets
//! devices that have gone quiet.
//!
//! Callers never touch sessions directly; they hold a [`SessionLease`] whose
//! semaphore permit is released when the lease is returned through
//! [`SessionPool::release`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, warn};
use moka::future::Cache;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::inventory::DeviceDescriptor;
use crate::session::{Session, SessionState, TransportFactory, credential_fingerprint};

/// Per-hostname bookkeeping: concurrency slots plus idle sessions.
struct PoolEntry {
    hostname: String,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Session>>,
}

impl PoolEntry {
    fn new(hostname: String, max_sessions: usize) -> Self {
        Self {
            hostname,
            slots: Arc::new(Semaphore::new(max_sessions)),
            idle: Mutex::new(Vec::new()),
        }
    }
}

/// An acquired session slot.
///
/// Holds the session and the semaphore permit for its device. Must be handed
/// back via [`SessionPool::release`]; dropping the lease without releasing
/// still frees the slot (the permit drops) but discards the session.
pub struct SessionLease {
    session: Option<Session>,
    entry: Arc<PoolEntry>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn session_mut(&mut self) -> &mut Session {
        match self.session.as_mut() {
            Some(session) => session,
            // A lease always carries a session until release() takes it, and
            // release consumes the lease.
            None => unreachable!("lease used after release"),
        }
    }
}

// The transport behind the session is a trait object, so derive won't do.
impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("hostname", &self.entry.hostname)
            .field("held", &self.session.is_some())
            .finish()
    }
}

/// Cache of live device sessions with per-device concurrency bounds.
pub struct SessionPool {
    factory: Arc<dyn TransportFactory>,
    config: GatewayConfig,
    entries: Cache<String, Arc<PoolEntry>>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn TransportFactory>, config: GatewayConfig) -> Self {
        // Entries for devices nobody has talked to in a long while age out of
        // the map entirely; explicit idle eviction below handles the
        // session-level threshold.
        let entries = Cache::builder()
            .max_capacity(1024)
            .time_to_idle(config.idle_eviction.saturating_mul(4).max(Duration::from_secs(60)))
            .build();

        Self {
            factory,
            config,
            entries,
            closed: AtomicBool::new(false),
        }
    }

    /// Acquires a session for the descriptor's device.
    ///
    /// Reuses an idle session when one passes the health and credential
    /// checks, otherwise opens a new one. Waits up to `acquire_timeout` for a
    /// free slot and fails with `PoolExhausted` after that.
    pub async fn acquire(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<SessionLease, GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::PoolClosed);
        }

        let entry = self.entry_for(&descriptor.hostname).await;

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            entry.slots.clone().acquire_owned(),
        )
        .await
        {
            Err(_) => {
                debug!(
                    "Acquire timed out for {} after {:?}",
                    descriptor.hostname, self.config.acquire_timeout
                );
                return Err(GatewayError::PoolExhausted(descriptor.hostname.clone()));
            }
            // The semaphore is only ever closed by shutdown().
            Ok(Err(_)) => return Err(GatewayError::PoolClosed),
            Ok(Ok(permit)) => permit,
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::PoolClosed);
        }

        let fingerprint = credential_fingerprint(descriptor);
        loop {
            let candidate = { entry.idle.lock().await.pop() };
            let Some(mut session) = candidate else { break };

            if session.idle_for() >= self.config.idle_eviction {
                debug!("Evicting idle-expired session for {}", entry.hostname);
                session.close().await;
                continue;
            }
            if session.fingerprint() != fingerprint {
                debug!(
                    "Credentials changed for {}, discarding cached session",
                    entry.hostname
                );
                session.close().await;
                continue;
            }
            if session.health_check().await {
                debug!("Reusing pooled session for {}", entry.hostname);
                return Ok(SessionLease {
                    session: Some(session),
                    entry,
                    _permit: permit,
                });
            }
            debug!("Pooled session for {} failed health check", entry.hostname);
            session.close().await;
        }

        debug!("Opening new session for {}", descriptor.hostname);
        let session =
            Session::open(descriptor, self.factory.as_ref(), self.config.connect_timeout).await?;
        Ok(SessionLease {
            session: Some(session),
            entry,
            _permit: permit,
        })
    }

    /// Returns a leased session.
    ///
    /// Healthy sessions go back on the idle list for reuse; unhealthy ones
    /// are closed and dropped. The device slot frees either way.
    pub async fn release(&self, mut lease: SessionLease, healthy: bool) {
        let Some(mut session) = lease.session.take() else {
            return;
        };

        if healthy
            && session.state() == SessionState::Ready
            && !self.closed.load(Ordering::SeqCst)
        {
            session.stamp_activity();
            lease.entry.idle.lock().await.push(session);
        } else {
            session.close().await;
        }
    }

    /// Closes idle sessions whose inactivity exceeds the configured
    /// threshold. Safe to call from a periodic task; `acquire` also applies
    /// the same check lazily.
    pub async fn evict_idle(&self) {
        for (_host, entry) in self.entries.iter() {
            let mut idle = entry.idle.lock().await;
            let mut kept = Vec::with_capacity(idle.len());
            for mut session in idle.drain(..) {
                if session.idle_for() >= self.config.idle_eviction {
                    debug!("Idle eviction closing session for {}", entry.hostname);
                    session.close().await;
                } else {
                    kept.push(session);
                }
            }
            *idle = kept;
        }
    }

    /// Closes every session and fails all pending and future acquires with
    /// `PoolClosed`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Session pool shutting down");
        for (_host, entry) in self.entries.iter() {
            entry.slots.close();
            let mut idle = entry.idle.lock().await;
            for mut session in idle.drain(..) {
                session.close().await;
            }
        }
        self.entries.invalidate_all();
    }

    /// Number of idle (reusable) sessions currently pooled for a hostname.
    pub async fn idle_count(&self, hostname: &str) -> usize {
        match self.entries.get(hostname).await {
            Some(entry) => entry.idle.lock().await.len(),
            None => 0,
        }
    }

    async fn entry_for(&self, hostname: &str) -> Arc<PoolEntry> {
        let max = self.config.max_sessions_per_device;
        self.entries
            .get_with(hostname.to_string(), async {
                debug!("Creating pool entry for {hostname} (max {max} sessions)");
                Arc::new(PoolEntry::new(hostname.to_string(), max))
            })
            .await
    }
}
