// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checking that a freshly deployed node answers over SSH

use crate::grouping::NodeName;
use async_trait::async_trait;
use camino::Utf8Path;
use russh::ChannelMsg;
use russh::Disconnect;
use russh::client;
use russh_keys::key::KeyPair;
use russh_keys::key::PublicKey;
use slog_error_chain::SlogInlineError;
use std::sync::Arc;
use thiserror::Error;

const SSH_PORT: u16 = 22;

#[derive(Debug, Error, SlogInlineError)]
pub enum ProbeError {
    #[error("failed to load private key \"{path}\"")]
    Key {
        path: String,
        #[source]
        err: russh_keys::Error,
    },
    #[error("SSH failure talking to {host}")]
    Ssh {
        host: String,
        #[source]
        err: russh::Error,
    },
    #[error("{host} rejected public key authentication as {user}")]
    AuthRejected { host: String, user: String },
    #[error("`{command}` on {node} exited with status {status}")]
    CommandFailed { node: String, command: String, status: u32 },
}

/// Runs one command on a deployed node and returns its output.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, node: &NodeName) -> Result<String, ProbeError>;
}

/// Connects to nodes through an SSH bastion.
pub struct SshProbe {
    gateway: String,
    gateway_user: String,
    node_user: String,
    command: String,
    key: Arc<KeyPair>,
}

impl SshProbe {
    pub fn new(
        gateway: String,
        gateway_user: String,
        node_user: String,
        command: String,
        private_key: &Utf8Path,
    ) -> Result<SshProbe, ProbeError> {
        let key = russh_keys::load_secret_key(private_key, None).map_err(
            |err| ProbeError::Key { path: private_key.to_string(), err },
        )?;
        Ok(SshProbe {
            gateway,
            gateway_user,
            node_user,
            command,
            key: Arc::new(key),
        })
    }

    async fn authenticate(
        &self,
        session: &mut client::Handle<AnyHostKey>,
        host: &str,
        user: &str,
    ) -> Result<(), ProbeError> {
        let accepted = session
            .authenticate_publickey(user, Arc::clone(&self.key))
            .await
            .map_err(|err| ProbeError::Ssh { host: host.to_string(), err })?;
        if !accepted {
            return Err(ProbeError::AuthRejected {
                host: host.to_string(),
                user: user.to_string(),
            });
        }
        Ok(())
    }

    async fn run_command(
        &self,
        session: &client::Handle<AnyHostKey>,
        node: &str,
    ) -> Result<String, ProbeError> {
        let ssh_err =
            |err| ProbeError::Ssh { host: node.to_string(), err };
        let mut channel =
            session.channel_open_session().await.map_err(ssh_err)?;
        channel.exec(true, self.command.as_str()).await.map_err(ssh_err)?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    output.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: status } => {
                    exit_status = Some(status)
                }
                _ => {}
            }
        }

        match exit_status {
            Some(0) | None => {
                Ok(String::from_utf8_lossy(&output).trim().to_string())
            }
            Some(status) => Err(ProbeError::CommandFailed {
                node: node.to_string(),
                command: self.command.clone(),
                status,
            }),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for SshProbe {
    async fn probe(&self, node: &NodeName) -> Result<String, ProbeError> {
        let config = Arc::new(client::Config::default());
        let gateway = self.gateway.as_str();

        let mut bastion = client::connect(
            Arc::clone(&config),
            (gateway, SSH_PORT),
            AnyHostKey,
        )
        .await
        .map_err(|err| ProbeError::Ssh { host: gateway.to_string(), err })?;
        self.authenticate(&mut bastion, gateway, &self.gateway_user).await?;

        let tunnel = bastion
            .channel_open_direct_tcpip(
                node.as_str(),
                u32::from(SSH_PORT),
                "127.0.0.1",
                0,
            )
            .await
            .map_err(|err| ProbeError::Ssh { host: gateway.to_string(), err })?;
        let mut session =
            client::connect_stream(config, tunnel.into_stream(), AnyHostKey)
                .await
                .map_err(|err| ProbeError::Ssh {
                    host: node.to_string(),
                    err,
                })?;
        self.authenticate(&mut session, node.as_str(), &self.node_user)
            .await?;

        let output = self.run_command(&session, node.as_str()).await;

        // Teardown errors do not change the outcome of the probe.
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        let _ = bastion
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        output
    }
}

/// Deployed nodes get fresh host keys on every install, so there is
/// nothing to pin them against.
struct AnyHostKey;

#[async_trait]
impl client::Handler for AnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
