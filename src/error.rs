//! Error types for the gateway core.
//!
//! This module defines all errors that can occur during device connectivity,
//! pooled session management, and command execution. Transport-level errors
//! (`AuthFailed`, `ConnectionFailed`, `CommandTimeout`) are handled inside the
//! executor; request-level validation errors (`AccessDenied`, `DeviceUnknown`,
//! `CommandRejected`) propagate unchanged to the facade's caller.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a command through the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The device rejected the configured credentials.
    ///
    /// Authentication failures are fatal per credential set and are never
    /// retried; the operator has to fix the inventory entry.
    #[error("authentication failed on {device}: {reason}")]
    AuthFailed { device: String, reason: String },

    /// The transport could not be established or dropped mid-exchange.
    ///
    /// Connection failures are transient: the executor retries exactly once
    /// with a fresh session before giving up.
    #[error("connection failed on {device}: {reason}")]
    ConnectionFailed { device: String, reason: String },

    /// The command did not complete within its timeout.
    ///
    /// The session that timed out is marked failed and evicted. Partial reads
    /// may corrupt the next command's framing, so timed-out sessions are
    /// never reused and timed-out commands are never retried.
    #[error("command '{command}' timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// All session slots for the device were busy for the whole acquire window.
    ///
    /// Surfaced immediately without retry; the caller should back off.
    #[error("no free session slot for {0} within the acquire window")]
    PoolExhausted(String),

    /// The session pool has been shut down.
    #[error("session pool is closed")]
    PoolClosed,

    /// The requester lacks a tag required to target the device.
    #[error("access denied for '{user}' on device '{device}'")]
    AccessDenied { user: String, device: String },

    /// The requested hostname is not present in the inventory.
    #[error("unknown device: {0}")]
    DeviceUnknown(String),

    /// The command matched a denylisted state-changing verb.
    ///
    /// Rejected before any pool or device interaction.
    #[error("command rejected by read-only policy: {0}")]
    CommandRejected(String),

    /// The gateway configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    /// Whether the executor may retry the operation with a fresh session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::ConnectionFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayError;
    use std::time::Duration;

    #[test]
    fn only_connection_failures_are_retryable() {
        let conn = GatewayError::ConnectionFailed {
            device: "r1".to_string(),
            reason: "reset by peer".to_string(),
        };
        assert!(conn.is_retryable());

        let auth = GatewayError::AuthFailed {
            device: "r1".to_string(),
            reason: "bad password".to_string(),
        };
        assert!(!auth.is_retryable());

        let timeout = GatewayError::CommandTimeout {
            command: "show version".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(!timeout.is_retryable());
    }
}
