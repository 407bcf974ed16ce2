//! Real SSH transport over async-ssh2-tokio/russh.
//!
//! Opens an interactive shell (network devices rarely support exec channels),
//! bridges it to mpsc channels through a background I/O task, and reads
//! command output until the platform's prompt pattern appears on the trailing
//! unterminated line.

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::{ChannelMsg, Preferred};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config;
use crate::error::GatewayError;
use crate::inventory::{DeviceDescriptor, Platform};
use crate::session::{Transport, TransportFactory};

/// Prompt of IOS-style platforms: `hostname>` or `hostname#`, optionally with
/// a context suffix such as `(config)`.
static EXEC_PROMPT: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"[\w.@()/:-]+[>#]\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid exec prompt regex: {err}"),
    });

/// Junos operational/shell prompt: `user@host>` or `user@host%`.
static JUNOS_PROMPT: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"[\w.@-]+[>%]\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid junos prompt regex: {err}"),
    });

fn prompt_for(platform: Platform) -> &'static Regex {
    match platform {
        Platform::Junos => &JUNOS_PROMPT,
        _ => &EXEC_PROMPT,
    }
}

/// Opens [`SshTransport`] channels for the session pool.
pub struct SshTransportFactory {
    server_check: ServerCheckMethod,
}

impl Default for SshTransportFactory {
    fn default() -> Self {
        Self {
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

impl SshTransportFactory {
    /// Skip host key verification. Only sensible in lab environments where
    /// device keys churn on every reimage.
    pub fn without_host_check() -> Self {
        Self {
            server_check: ServerCheckMethod::NoCheck,
        }
    }
}

#[async_trait]
impl TransportFactory for SshTransportFactory {
    async fn connect(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Box<dyn Transport>, GatewayError> {
        let transport = SshTransport::connect(descriptor, self.server_check.clone()).await?;
        Ok(Box::new(transport))
    }
}

/// One interactive SSH shell to a device.
pub struct SshTransport {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    prompt: &'static Regex,
    hostname: String,
}

impl SshTransport {
    async fn connect(
        descriptor: &DeviceDescriptor,
        server_check: ServerCheckMethod,
    ) -> Result<SshTransport, GatewayError> {
        let hostname = descriptor.hostname.clone();
        let config = Config {
            preferred: Preferred {
                kex: Cow::Borrowed(config::COMPAT_KEX_ORDER),
                key: Cow::Borrowed(config::COMPAT_KEY_TYPES),
                cipher: Cow::Borrowed(config::COMPAT_CIPHERS),
                mac: Cow::Borrowed(config::COMPAT_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::COMPAT_COMPRESSION_ALGORITHMS),
            },
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (descriptor.host.clone(), descriptor.port()),
            &descriptor.username,
            AuthMethod::with_password(&descriptor.password),
            server_check,
            config,
        )
        .await
        .map_err(|err| classify_connect_error(&hostname, err))?;
        debug!("{} TCP connection and authentication successful", hostname);

        let mut channel = client
            .get_channel()
            .await
            .map_err(|err| connection_failed(&hostname, err))?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await
            .map_err(|err| connection_failed(&hostname, err))?;
        channel
            .request_shell(false)
            .await
            .map_err(|err| connection_failed(&hostname, err))?;
        debug!("{} shell request successful", hostname);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_hostname = hostname.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} failed to send data to shell: {:?}", io_task_hostname, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(s) = std::str::from_utf8(data)
                                    && sender_to_user.send(s.to_string()).await.is_err() {
                                        debug!("{} shell output receiver dropped, closing task", io_task_hostname);
                                        break;
                                    }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} shell exited with status {}", io_task_hostname, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} shell sent EOF", io_task_hostname);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended", io_task_hostname);
        });

        let mut transport = SshTransport {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            prompt: prompt_for(descriptor.platform),
            hostname,
        };

        // Banner and login output end with the first prompt; the device is
        // not ready for commands before that.
        transport.read_until_prompt().await?;
        debug!("{} initial prompt detected", transport.hostname);

        Ok(transport)
    }

    /// Accumulates shell output until the trailing unterminated line matches
    /// the prompt pattern. Returns everything read, prompt included.
    async fn read_until_prompt(&mut self) -> Result<String, GatewayError> {
        let mut buffer = String::new();
        loop {
            match self.recv.recv().await {
                Some(data) => {
                    trace!("{} chunk: {:?}", self.hostname, data);
                    buffer.push_str(&data);
                    let tail = buffer.rsplit('\n').next().unwrap_or(&buffer);
                    if !tail.is_empty() && self.prompt.is_match(tail) {
                        return Ok(buffer);
                    }
                }
                None => {
                    return Err(GatewayError::ConnectionFailed {
                        device: self.hostname.clone(),
                        reason: "channel closed while waiting for prompt".to_string(),
                    });
                }
            }
        }
    }

    fn drain_residual(&mut self) {
        while self.recv.try_recv().is_ok() {}
    }

    async fn write_line(&mut self, line: &str) -> Result<(), GatewayError> {
        self.sender
            .send(format!("{line}\n"))
            .await
            .map_err(|_| GatewayError::ConnectionFailed {
                device: self.hostname.clone(),
                reason: "shell writer closed".to_string(),
            })
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send_command(&mut self, command: &str) -> Result<String, GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::ConnectionFailed {
                device: self.hostname.clone(),
                reason: "connection already closed".to_string(),
            });
        }
        self.drain_residual();
        self.write_line(command).await?;
        self.read_until_prompt().await
    }

    async fn health_check(&mut self) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::ConnectionFailed {
                device: self.hostname.clone(),
                reason: "connection already closed".to_string(),
            });
        }
        self.drain_residual();
        self.write_line("").await?;
        self.read_until_prompt().await.map(|_| ())
    }

    async fn close(&mut self) {
        if self.is_connected() {
            // Best-effort graceful logout before the client drops the TCP
            // connection.
            let _ = self.sender.send("exit\n".to_string()).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.recv.close();
    }

    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }
}

fn connection_failed(device: &str, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::ConnectionFailed {
        device: device.to_string(),
        reason: err.to_string(),
    }
}

fn classify_connect_error(device: &str, err: async_ssh2_tokio::Error) -> GatewayError {
    match err {
        async_ssh2_tokio::Error::PasswordWrong => GatewayError::AuthFailed {
            device: device.to_string(),
            reason: "password rejected".to_string(),
        },
        other => connection_failed(device, other),
    }
}
