//! Device sessions and the transport seam.
//!
//! A [`Session`] is one live authenticated connection to a device. It owns a
//! boxed [`Transport`], tracks lifecycle state and activity timestamps, and
//! applies the timeout discipline: every `open`, `send`, and health check is
//! bounded. Sessions are created and recycled exclusively by the pool.
//!
//! The [`Transport`]/[`TransportFactory`] traits are the seam between the
//! pooling/execution engine and the actual SSH plumbing, which lets tests
//! drive the whole engine with scripted doubles.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::inventory::DeviceDescriptor;

pub mod pool;
pub mod ssh;

pub use pool::{SessionLease, SessionPool};
pub use ssh::SshTransportFactory;

/// Bound on the lightweight no-op exchange used to validate pooled sessions.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    /// Actively executing exactly one command.
    Busy,
    /// Unusable; will be evicted, never handed out again.
    Failed,
    Closed,
}

/// Low-level channel to one device.
///
/// `send_command` writes the command and reads until the device's prompt
/// pattern; callers bound it with a timeout at the [`Session`] layer.
#[async_trait]
pub trait Transport: Send {
    async fn send_command(&mut self, command: &str) -> Result<String, GatewayError>;

    /// No-op exchange (newline round-trip) confirming the channel is alive.
    async fn health_check(&mut self) -> Result<(), GatewayError>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Opens transports for descriptors. One factory serves the whole pool.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn Transport>, GatewayError>;
}

/// SHA-256 over the credential pair, used to detect inventory credential
/// changes without keeping plaintext around for comparison.
pub(crate) fn credential_fingerprint(descriptor: &DeviceDescriptor) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(descriptor.username.as_bytes());
    hasher.update([0u8]);
    hasher.update(descriptor.password.as_bytes());
    hasher.finalize().into()
}

/// One live authenticated connection to a device.
pub struct Session {
    hostname: String,
    transport: Box<dyn Transport>,
    state: SessionState,
    credential_fingerprint: [u8; 32],
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// Establishes the transport and authenticates, bounded by `connect_timeout`.
    pub async fn open(
        descriptor: &DeviceDescriptor,
        factory: &dyn TransportFactory,
        connect_timeout: Duration,
    ) -> Result<Session, GatewayError> {
        debug!(
            "Opening session to {} ({})",
            descriptor.hostname,
            descriptor.platform.as_str()
        );
        let transport = tokio::time::timeout(connect_timeout, factory.connect(descriptor))
            .await
            .map_err(|_| GatewayError::ConnectionFailed {
                device: descriptor.hostname.clone(),
                reason: format!("connect timed out after {connect_timeout:?}"),
            })??;

        let now = Instant::now();
        Ok(Session {
            hostname: descriptor.hostname.clone(),
            transport,
            state: SessionState::Ready,
            credential_fingerprint: credential_fingerprint(descriptor),
            created_at: now,
            last_activity: now,
        })
    }

    /// Writes the command and reads until the prompt or `timeout` elapses.
    ///
    /// A timeout or transport failure marks the session `Failed`; the pool
    /// will close it instead of recycling it.
    pub async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, GatewayError> {
        self.state = SessionState::Busy;
        match tokio::time::timeout(timeout, self.transport.send_command(command)).await {
            Ok(Ok(raw)) => {
                self.state = SessionState::Ready;
                self.last_activity = Instant::now();
                Ok(raw)
            }
            Ok(Err(err)) => {
                self.state = SessionState::Failed;
                Err(err)
            }
            Err(_) => {
                self.state = SessionState::Failed;
                Err(GatewayError::CommandTimeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Confirms the transport is alive before the pool hands this session to
    /// a new request. Failure marks the session `Failed`.
    pub async fn health_check(&mut self) -> bool {
        if !self.transport.is_connected() {
            self.state = SessionState::Failed;
            return false;
        }
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.transport.health_check()).await {
            Ok(Ok(())) => true,
            _ => {
                debug!("Health check failed for {}", self.hostname);
                self.state = SessionState::Failed;
                false
            }
        }
    }

    pub async fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!("Closing session to {}", self.hostname);
            self.transport.close().await;
            self.state = SessionState::Closed;
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the last completed exchange.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn fingerprint(&self) -> [u8; 32] {
        self.credential_fingerprint
    }

    pub(crate) fn stamp_activity(&mut self) {
        self.last_activity = Instant::now();
    }
}
