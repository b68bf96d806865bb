//! In-process SSH backend built on libssh2.
//!
//! Compiled with the `native-ssh` feature. libssh2 is blocking, so each
//! execution runs on the blocking pool. Host keys are checked against the
//! user's OpenSSH `known_hosts`: a first-seen key is added when the target
//! accepts new keys, anything else unknown or mismatched is rejected.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session};

use hostwarden_core::types::{CommandResult, Credential};

use crate::backend::SshTarget;
use crate::config::ExecConfig;
use crate::error::{ExecError, Result};

/// libssh2's `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Connect timeout when none is configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NativeBackend {
    connect_timeout: Duration,
    timeout: Duration,
    known_hosts: Option<PathBuf>,
}

impl NativeBackend {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            connect_timeout: config
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            timeout: config.dialogue_timeout(),
            known_hosts: dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
        }
    }

    /// Check host keys against `path` instead of `~/.ssh/known_hosts`.
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        let backend = self.clone();
        let target = target.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || backend.execute_blocking(&target, &command))
            .await
            .map_err(|e| ExecError::Native(e.to_string()))?
    }

    fn execute_blocking(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        let seconds = self.timeout.as_secs();
        let lib = |e: ssh2::Error| map_ssh_error(e, seconds);

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| ExecError::Native(format!("resolve {}: {e}", target.host)))?
            .next()
            .ok_or_else(|| ExecError::Native(format!("no address for {}", target.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| ExecError::Native(format!("connect {addr}: {e}")))?;

        let mut session = Session::new().map_err(lib)?;
        session.set_timeout(self.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(lib)?;

        self.verify_host_key(&session, target)?;
        authenticate(&session, target)
            .map_err(|e| auth_error(e, &target.destination(), seconds))?;
        if !session.authenticated() {
            return Err(ExecError::AuthenticationFailed {
                output: format!("{}: Permission denied", target.destination()),
            });
        }

        let mut channel = session.channel_session().map_err(lib)?;
        channel.exec(command).map_err(lib)?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| ExecError::Native(e.to_string()))?;
        channel
            .stderr()
            .read_to_string(&mut output)
            .map_err(|e| ExecError::Native(e.to_string()))?;
        channel.wait_close().map_err(lib)?;
        let code = channel.exit_status().map_err(lib)?;

        if code == 0 {
            Ok(CommandResult {
                output,
                exit_code: 0,
            })
        } else {
            Err(ExecError::CommandFailed { code, output })
        }
    }

    fn verify_host_key(&self, session: &Session, target: &SshTarget) -> Result<()> {
        let (key, key_type) = session
            .host_key()
            .map(|(key, kind)| (key.to_vec(), kind))
            .ok_or_else(|| ExecError::HostKeyRejected("server sent no host key".to_string()))?;

        let mut known = session
            .known_hosts()
            .map_err(|e| ExecError::Native(e.to_string()))?;
        if let Some(path) = self.known_hosts.as_deref().filter(|p| p.exists()) {
            known
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| ExecError::Native(e.to_string()))?;
        }

        match known.check_port(&target.host, target.port, &key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound if target.accept_new_host_key => {
                let entry = known_hosts_entry(&target.host, target.port);
                known
                    .add(&entry, &key, "added by hostwarden", key_type.into())
                    .map_err(|e| ExecError::Native(e.to_string()))?;
                if let Some(path) = self.known_hosts.as_deref() {
                    persist(&known, path)?;
                }
                tracing::info!(host = %target.host, port = target.port, "New host key accepted");
                Ok(())
            }
            CheckResult::NotFound => Err(ExecError::HostKeyRejected(format!(
                "{} is not a known host",
                known_hosts_entry(&target.host, target.port)
            ))),
            CheckResult::Mismatch => Err(ExecError::HostKeyRejected(format!(
                "host key for {} has changed",
                known_hosts_entry(&target.host, target.port)
            ))),
            CheckResult::Failure => Err(ExecError::HostKeyRejected(
                "known_hosts check failed".to_string(),
            )),
        }
    }
}

fn authenticate(session: &Session, target: &SshTarget) -> std::result::Result<(), ssh2::Error> {
    match &target.credential {
        Credential::Password(password) => session.userauth_password(&target.username, password),
        Credential::Key { path: Some(path) } => {
            session.userauth_pubkey_file(&target.username, None, path, None)
        }
        Credential::Key { path: None } => session.userauth_agent(&target.username),
    }
}

fn persist(known: &ssh2::KnownHosts, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExecError::Native(e.to_string()))?;
    }
    known
        .write_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| ExecError::Native(e.to_string()))
}

/// Host pattern as OpenSSH writes it: bare for port 22, `[host]:port` otherwise.
pub fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

fn map_ssh_error(e: ssh2::Error, seconds: u64) -> ExecError {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => ExecError::TimedOut { seconds },
        _ => ExecError::Native(e.to_string()),
    }
}

/// A rejected login reads like OpenSSH's "Permission denied" so both
/// password backends report it the same way.
fn auth_error(e: ssh2::Error, destination: &str, seconds: u64) -> ExecError {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => ExecError::TimedOut { seconds },
        _ => ExecError::AuthenticationFailed {
            output: format!("{destination}: Permission denied ({})", e.message()),
        },
    }
}
