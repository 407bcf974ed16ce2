//! Command execution engine.
//!
//! One call runs one command: acquire a session from the pool, send, and
//! release. The state machine is deliberately small: a `ConnectionError`
//! during send gets exactly one retry on a fresh session; a `Timeout` is
//! never retried because the command may have had side effects the gateway
//! cannot see. Denylisted commands are rejected before the pool is touched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::inventory::DeviceDescriptor;
use crate::parser::ParserRegistry;
use crate::session::SessionPool;

/// Final disposition of a gateway call, for results and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Raw output collected and parsed into a structured record.
    Success,
    /// Raw output collected; no parser matched or the parser failed.
    ParseWarning,
    Timeout,
    ConnectionError,
    AuthError,
    AccessDenied,
    DeviceUnknown,
    CommandRejected,
    PoolExhausted,
    PoolClosed,
    /// The gateway itself was misconfigured. Construction-time validation
    /// makes this unreachable through [`crate::gateway::Gateway`].
    InternalError,
}

/// One command to run against one device.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandRequest {
    /// Logical hostname as defined in the inventory.
    pub device: String,
    /// Read-only CLI command, e.g. `show ip int brief`.
    pub command: String,
    /// Requester, propagated into the audit trail.
    pub requester: String,
    /// Per-request override of the configured command timeout (seconds).
    pub timeout_secs: Option<u64>,
}

/// Result of a command execution attempt that reached (or tried to reach)
/// the device.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    /// Raw prompt-terminated terminal output. Empty when the device was
    /// never successfully reached.
    pub raw: String,
    /// Structured record when a registered parser handled the output.
    pub structured: Option<Value>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
    pub outcome: CommandOutcome,
}

/// Runs commands through the session pool and the parser registry.
pub struct CommandExecutor {
    pool: Arc<SessionPool>,
    parsers: Arc<ParserRegistry>,
    config: GatewayConfig,
}

impl CommandExecutor {
    pub fn new(pool: Arc<SessionPool>, parsers: Arc<ParserRegistry>, config: GatewayConfig) -> Self {
        Self {
            pool,
            parsers,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Executes `request` against the device described by `descriptor`.
    ///
    /// Transport-level failures are folded into the returned
    /// [`CommandResult`] outcome. `CommandRejected`, `PoolExhausted`, and
    /// `PoolClosed` propagate as errors; they describe the request or the
    /// gateway, not the device exchange.
    pub async fn run(
        &self,
        descriptor: &DeviceDescriptor,
        request: &CommandRequest,
    ) -> Result<CommandResult, GatewayError> {
        self.reject_denylisted(&request.command)?;

        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.command_timeout);
        let started = Instant::now();

        let mut lease = match self.pool.acquire(descriptor).await {
            Ok(lease) => lease,
            Err(err) => return self.acquire_failure(err, started),
        };

        match lease.session_mut().send(&request.command, timeout).await {
            Ok(raw) => {
                self.pool.release(lease, true).await;
                Ok(self.finish(descriptor, &request.command, raw, started))
            }
            Err(GatewayError::CommandTimeout { command, timeout }) => {
                warn!(
                    "Command '{}' timed out on {} after {:?}",
                    command, descriptor.hostname, timeout
                );
                self.pool.release(lease, false).await;
                Ok(failure(CommandOutcome::Timeout, started))
            }
            Err(err) if err.is_retryable() => {
                debug!(
                    "Session dropped on {} mid-command, retrying once with a fresh session: {}",
                    descriptor.hostname, err
                );
                self.pool.release(lease, false).await;
                self.retry(descriptor, request, timeout, started).await
            }
            Err(err) => {
                self.pool.release(lease, false).await;
                warn!("Command failed on {}: {}", descriptor.hostname, err);
                Ok(failure(outcome_of(&err), started))
            }
        }
    }

    /// Second and final attempt after a connection failure. No further
    /// retries regardless of what this attempt does, so an unreachable device
    /// should not be hammered.
    async fn retry(
        &self,
        descriptor: &DeviceDescriptor,
        request: &CommandRequest,
        timeout: Duration,
        started: Instant,
    ) -> Result<CommandResult, GatewayError> {
        let mut lease = match self.pool.acquire(descriptor).await {
            Ok(lease) => lease,
            Err(err) => return self.acquire_failure(err, started),
        };

        match lease.session_mut().send(&request.command, timeout).await {
            Ok(raw) => {
                self.pool.release(lease, true).await;
                Ok(self.finish(descriptor, &request.command, raw, started))
            }
            Err(GatewayError::CommandTimeout { .. }) => {
                self.pool.release(lease, false).await;
                Ok(failure(CommandOutcome::Timeout, started))
            }
            Err(err) => {
                self.pool.release(lease, false).await;
                warn!("Retry failed on {}: {}", descriptor.hostname, err);
                Ok(failure(CommandOutcome::ConnectionError, started))
            }
        }
    }

    /// Pool errors either abort the request (`PoolExhausted`/`PoolClosed`)
    /// or describe a failed device exchange (connect/auth) and become a
    /// result outcome.
    fn acquire_failure(
        &self,
        err: GatewayError,
        started: Instant,
    ) -> Result<CommandResult, GatewayError> {
        match err {
            GatewayError::PoolExhausted(_) | GatewayError::PoolClosed => Err(err),
            other => {
                warn!("Session acquisition failed: {}", other);
                Ok(failure(outcome_of(&other), started))
            }
        }
    }

    fn finish(
        &self,
        descriptor: &DeviceDescriptor,
        command: &str,
        raw: String,
        started: Instant,
    ) -> CommandResult {
        let structured = self.parsers.try_parse(descriptor.platform, command, &raw);
        let outcome = if structured.is_some() {
            CommandOutcome::Success
        } else {
            CommandOutcome::ParseWarning
        };
        CommandResult {
            raw,
            structured,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
        }
    }

    fn reject_denylisted(&self, command: &str) -> Result<(), GatewayError> {
        // The transport writes the string verbatim, so an embedded line
        // break would execute a second command the guard never inspected.
        if command.contains(['\n', '\r']) {
            return Err(GatewayError::CommandRejected(command.to_string()));
        }
        let first_word = command
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if first_word.is_empty()
            || self
                .config
                .denylisted_verbs
                .iter()
                .any(|verb| verb == &first_word)
        {
            return Err(GatewayError::CommandRejected(command.to_string()));
        }
        Ok(())
    }
}

fn failure(outcome: CommandOutcome, started: Instant) -> CommandResult {
    CommandResult {
        raw: String::new(),
        structured: None,
        duration_ms: started.elapsed().as_millis() as u64,
        outcome,
    }
}

/// Maps transport errors onto result/audit outcomes.
pub fn outcome_of(err: &GatewayError) -> CommandOutcome {
    match err {
        GatewayError::AuthFailed { .. } => CommandOutcome::AuthError,
        GatewayError::ConnectionFailed { .. } => CommandOutcome::ConnectionError,
        GatewayError::CommandTimeout { .. } => CommandOutcome::Timeout,
        GatewayError::PoolExhausted(_) => CommandOutcome::PoolExhausted,
        GatewayError::PoolClosed => CommandOutcome::PoolClosed,
        GatewayError::AccessDenied { .. } => CommandOutcome::AccessDenied,
        GatewayError::DeviceUnknown(_) => CommandOutcome::DeviceUnknown,
        GatewayError::CommandRejected(_) => CommandOutcome::CommandRejected,
        GatewayError::InvalidConfig(_) => CommandOutcome::InternalError,
    }
}
