//! # netgate - Read-Only CLI Command Gateway for Network Devices
//!
//! `netgate` lets an automated client run read-only CLI commands against
//! network devices (routers, switches) over SSH and get back both the raw
//! terminal output and, where a parser is registered, a structured record.
//! It mediates device connectivity and session reuse, bounds concurrency per
//! device, converts CLI text best-effort, enforces tag-based access control,
//! and emits an immutable audit event for every invocation.
//!
//! ## Features
//!
//! - **Session Pooling**: per-device caching and reuse of authenticated SSH
//!   sessions, with health checks, idle eviction, and a hard concurrency
//!   bound per device
//! - **Bounded Execution**: every connect, acquire, and command send is
//!   timeout-bounded; transient connection failures are retried exactly once
//!   on a fresh session
//! - **Best-Effort Parsing**: a `(platform, command)` parser registry turns
//!   raw output into JSON when it can and never fails the request when it
//!   cannot
//! - **Read-Only Enforcement**: state-changing verbs are rejected before any
//!   device interaction
//! - **Audit Trail**: exactly one structured audit event per call, success
//!   or failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use netgate::audit::LogAuditSink;
//! use netgate::config::GatewayConfig;
//! use netgate::gateway::Gateway;
//! use netgate::inventory::{
//!     DeviceDescriptor, Identity, Platform, StaticInventory, TagPolicy,
//! };
//! use netgate::parser::ParserRegistry;
//! use netgate::session::SshTransportFactory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let inventory = StaticInventory::new([DeviceDescriptor {
//!         hostname: "r1".to_string(),
//!         host: "192.168.1.1".to_string(),
//!         port: None,
//!         platform: Platform::Ios,
//!         username: "admin".to_string(),
//!         password: "password".to_string(),
//!         tags: vec!["lab".to_string()],
//!     }]);
//!
//!     let gateway = Gateway::new(
//!         Arc::new(inventory),
//!         Arc::new(TagPolicy),
//!         Arc::new(SshTransportFactory::default()),
//!         Arc::new(ParserRegistry::with_builtins()),
//!         Arc::new(LogAuditSink),
//!         GatewayConfig::default(),
//!     )?;
//!
//!     let alice = Identity::new("alice", vec!["lab".to_string()]);
//!     let result = gateway.run_command("r1", "show ip int brief", &alice).await?;
//!
//!     println!("raw output: {}", result.raw);
//!     if let Some(structured) = result.structured {
//!         println!("structured: {structured}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`gateway::Gateway`] - facade composing inventory, access control,
//!   execution, and audit
//! - [`session::SessionPool`] - per-device session cache and concurrency
//!   bound
//! - [`executor::CommandExecutor`] - acquire/execute/retry-once engine
//! - [`parser::ParserRegistry`] - best-effort `(platform, command)` parsing
//! - [`error::GatewayError`] - error taxonomy for every failure mode

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod inventory;
pub mod parser;
pub mod session;
