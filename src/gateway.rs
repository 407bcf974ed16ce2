//! Gateway facade.
//!
//! The single entry point an API layer calls. Composes the inventory and
//! access-control collaborators, the command executor, and the audit sink:
//! resolve, authorize, execute, audit, return. Exactly one audit event is
//! emitted per call, success or failure.

use std::sync::Arc;

use log::debug;

use crate::audit::{AuditEvent, AuditSink};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::executor::{CommandExecutor, CommandRequest, CommandResult, outcome_of};
use crate::inventory::{AccessPolicy, DevicePublic, Identity, Inventory};
use crate::parser::ParserRegistry;
use crate::session::{SessionPool, TransportFactory};

/// Read-only CLI command gateway for network devices.
pub struct Gateway {
    inventory: Arc<dyn Inventory>,
    policy: Arc<dyn AccessPolicy>,
    executor: CommandExecutor,
    audit: Arc<dyn AuditSink>,
    excerpt_len: usize,
}

impl Gateway {
    /// Wires a gateway from its collaborators.
    pub fn new(
        inventory: Arc<dyn Inventory>,
        policy: Arc<dyn AccessPolicy>,
        factory: Arc<dyn TransportFactory>,
        parsers: Arc<ParserRegistry>,
        audit: Arc<dyn AuditSink>,
        config: GatewayConfig,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let pool = Arc::new(SessionPool::new(factory, config.clone()));
        let excerpt_len = config.audit_excerpt_len;
        Ok(Self {
            inventory,
            policy,
            executor: CommandExecutor::new(pool, parsers, config),
            audit,
            excerpt_len,
        })
    }

    /// Runs `command` on `device` for `identity`.
    ///
    /// Validation failures (`DeviceUnknown`, `AccessDenied`,
    /// `CommandRejected`) never reach a device but are still audited.
    pub async fn run_command(
        &self,
        device: &str,
        command: &str,
        identity: &Identity,
    ) -> Result<CommandResult, GatewayError> {
        self.run_command_with_timeout(device, command, identity, None)
            .await
    }

    /// Like [`Gateway::run_command`] with a per-request override of the
    /// configured command timeout, in whole seconds.
    pub async fn run_command_with_timeout(
        &self,
        device: &str,
        command: &str,
        identity: &Identity,
        timeout_secs: Option<u64>,
    ) -> Result<CommandResult, GatewayError> {
        debug!(
            "run_command: user={} device={} cmd={}",
            identity.username, device, command
        );

        let Some(descriptor) = self.inventory.resolve(device) else {
            let err = GatewayError::DeviceUnknown(device.to_string());
            self.audit_error(identity, device, command, &err);
            return Err(err);
        };

        if !self.policy.authorize(identity, &descriptor.tags) {
            let err = GatewayError::AccessDenied {
                user: identity.username.clone(),
                device: device.to_string(),
            };
            self.audit_error(identity, device, command, &err);
            return Err(err);
        }

        let request = CommandRequest {
            device: device.to_string(),
            command: command.to_string(),
            requester: identity.username.clone(),
            timeout_secs,
        };

        match self.executor.run(&descriptor, &request).await {
            Ok(result) => {
                self.audit.record(AuditEvent::new(
                    &identity.username,
                    device,
                    command,
                    result.outcome,
                    &result.raw,
                    self.excerpt_len,
                    result.structured.is_some(),
                    Some(result.duration_ms),
                ));
                Ok(result)
            }
            Err(err) => {
                self.audit_error(identity, device, command, &err);
                Err(err)
            }
        }
    }

    /// Public (credential-free) view of the devices `identity` may target.
    pub fn list_devices(&self, identity: &Identity) -> Vec<DevicePublic> {
        self.inventory
            .all()
            .iter()
            .filter(|d| self.policy.authorize(identity, &d.tags))
            .map(DevicePublic::from)
            .collect()
    }

    /// Closes all pooled sessions; in-flight and future calls fail with
    /// `PoolClosed`.
    pub async fn shutdown(&self) {
        self.executor.pool().shutdown().await;
    }

    /// Drives session-level idle eviction; see
    /// [`SessionPool::evict_idle`].
    pub async fn evict_idle(&self) {
        self.executor.pool().evict_idle().await;
    }

    fn audit_error(&self, identity: &Identity, device: &str, command: &str, err: &GatewayError) {
        self.audit.record(AuditEvent::new(
            &identity.username,
            device,
            command,
            outcome_of(err),
            "",
            self.excerpt_len,
            false,
            None,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutcome;
    use crate::inventory::{DeviceDescriptor, Platform, StaticInventory, TagPolicy};
    use crate::session::{Transport, TransportFactory};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send_command(&mut self, command: &str) -> Result<String, GatewayError> {
            Ok(format!("{command}\ndone\nr1#"))
        }

        async fn health_check(&mut self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn close(&mut self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct EchoFactory {
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportFactory for EchoFactory {
        async fn connect(
            &self,
            _descriptor: &DeviceDescriptor,
        ) -> Result<Box<dyn Transport>, GatewayError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoTransport))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for RecordingSink {
        fn record(&self, event: AuditEvent) {
            self.events.lock().expect("events lock").push(event);
        }
    }

    fn lab_device() -> DeviceDescriptor {
        DeviceDescriptor {
            hostname: "r1".to_string(),
            host: "10.0.0.1".to_string(),
            port: None,
            platform: Platform::Ios,
            username: "ops".to_string(),
            password: "secret".to_string(),
            tags: vec!["lab".to_string()],
        }
    }

    fn gateway() -> (Gateway, Arc<RecordingSink>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink::default());
        let gateway = Gateway::new(
            Arc::new(StaticInventory::new([lab_device()])),
            Arc::new(TagPolicy),
            Arc::new(EchoFactory {
                opens: opens.clone(),
            }),
            Arc::new(ParserRegistry::with_builtins()),
            sink.clone(),
            GatewayConfig::default(),
        )
        .expect("gateway config");
        (gateway, sink, opens)
    }

    fn alice() -> Identity {
        Identity::new("alice", vec!["lab".to_string()])
    }

    #[tokio::test]
    async fn unknown_device_is_audited_and_rejected() {
        let (gateway, sink, opens) = gateway();

        let err = gateway
            .run_command("r9", "show version", &alice())
            .await
            .expect_err("unknown device");
        assert!(matches!(err, GatewayError::DeviceUnknown(_)));
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        let events = sink.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CommandOutcome::DeviceUnknown);
    }

    #[tokio::test]
    async fn denied_identity_never_reaches_the_pool() {
        let (gateway, sink, opens) = gateway();
        let mallory = Identity::new("mallory", vec!["prod".to_string()]);

        let err = gateway
            .run_command("r1", "show version", &mallory)
            .await
            .expect_err("access denied");
        assert!(matches!(err, GatewayError::AccessDenied { .. }));
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        let events = sink.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CommandOutcome::AccessDenied);
        assert_eq!(events[0].user, "mallory");
    }

    #[tokio::test]
    async fn successful_call_is_audited_once() {
        let (gateway, sink, _opens) = gateway();

        let result = gateway
            .run_command("r1", "show version", &alice())
            .await
            .expect("run");
        assert_eq!(result.outcome, CommandOutcome::ParseWarning);

        let events = sink.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CommandOutcome::ParseWarning);
        assert!(events[0].raw_excerpt.contains("done"));
        assert!(events[0].duration_ms.is_some());
    }

    struct RefusingFactory;

    #[async_trait]
    impl TransportFactory for RefusingFactory {
        async fn connect(
            &self,
            descriptor: &DeviceDescriptor,
        ) -> Result<Box<dyn Transport>, GatewayError> {
            Err(GatewayError::AuthFailed {
                device: descriptor.hostname.clone(),
                reason: "password rejected".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn rejected_credentials_are_audited_as_auth_error() {
        let sink = Arc::new(RecordingSink::default());
        let gateway = Gateway::new(
            Arc::new(StaticInventory::new([lab_device()])),
            Arc::new(TagPolicy),
            Arc::new(RefusingFactory),
            Arc::new(ParserRegistry::with_builtins()),
            sink.clone(),
            GatewayConfig::default(),
        )
        .expect("gateway config");

        let result = gateway
            .run_command("r1", "show version", &alice())
            .await
            .expect("auth failure folds into the result");
        assert_eq!(result.outcome, CommandOutcome::AuthError);

        let events = sink.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CommandOutcome::AuthError);
        assert!(events[0].raw_excerpt.is_empty());
    }

    #[tokio::test]
    async fn list_devices_filters_by_policy() {
        let (gateway, _sink, _opens) = gateway();

        let visible = gateway.list_devices(&alice());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].hostname, "r1");

        let mallory = Identity::new("mallory", vec!["prod".to_string()]);
        assert!(gateway.list_devices(&mallory).is_empty());
    }

    #[tokio::test]
    async fn shutdown_surfaces_pool_closed() {
        let (gateway, sink, _opens) = gateway();
        gateway.shutdown().await;

        let err = gateway
            .run_command("r1", "show version", &alice())
            .await
            .expect_err("pool closed");
        assert!(matches!(err, GatewayError::PoolClosed));

        let events = sink.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CommandOutcome::PoolClosed);
    }
}
