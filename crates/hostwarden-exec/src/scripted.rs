//! Password backend: ssh driven by an `expect` dialogue.
//!
//! ssh only reads passwords from a terminal, so the login runs under
//! `expect`, which allocates one. The dialogue script goes in on stdin so
//! the password never appears in a process argument list.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use hostwarden_core::types::CommandResult;

use crate::backend::{combined_output, SshTarget};
use crate::command::{expect_script, login_shell, AUTH_FAILURE_STATUS, DIALOGUE_TIMEOUT_STATUS};
use crate::config::ExecConfig;
use crate::error::{ExecError, Result};

/// Slack given to `expect` past its own dialogue timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    expect_path: String,
    ssh_path: String,
    timeout: Duration,
    connect_timeout_secs: Option<u64>,
}

impl ScriptedBackend {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            expect_path: config.expect_path.clone(),
            ssh_path: config.ssh_path.clone(),
            timeout: config.dialogue_timeout(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// The ssh invocation spawned inside the dialogue.
    pub fn spawn_args(&self, target: &SshTarget, command: &str) -> Vec<String> {
        let mut args = vec![self.ssh_path.clone(), "-tt".to_string()];
        if target.accept_new_host_key {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if let Some(secs) = self.connect_timeout_secs {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={secs}"));
        }
        args.push("-p".to_string());
        args.push(target.port.to_string());
        args.push(target.destination());
        args.push(login_shell(command));
        args
    }

    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        let password = target.credential.password().unwrap_or_default();
        let script = expect_script(&self.spawn_args(target, command), password, self.timeout);

        let start = Instant::now();
        let mut child = Command::new(&self.expect_path)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                program: self.expect_path.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|source| ExecError::Launch {
                    program: self.expect_path.clone(),
                    source,
                })?;
            // Dropping stdin closes it, which ends the script.
        }

        let seconds = self.timeout.as_secs();
        let output = match tokio::time::timeout(self.timeout + KILL_GRACE, child.wait_with_output())
            .await
        {
            Ok(result) => result.map_err(|source| ExecError::Launch {
                program: self.expect_path.clone(),
                source,
            })?,
            Err(_) => {
                tracing::warn!(host = %target.host, seconds, "Password dialogue hung, killed");
                return Err(ExecError::TimedOut { seconds });
            }
        };

        let code = output.status.code().unwrap_or(-1);
        tracing::debug!(
            host = %target.host,
            port = target.port,
            status = code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Password dialogue finished"
        );

        classify(code, combined_output(&output), seconds)
    }
}

/// Map the dialogue's exit status to the execute contract.
fn classify(code: i32, output: String, seconds: u64) -> Result<CommandResult> {
    match code {
        0 => Ok(CommandResult {
            output,
            exit_code: 0,
        }),
        DIALOGUE_TIMEOUT_STATUS => Err(ExecError::TimedOut { seconds }),
        AUTH_FAILURE_STATUS if output.contains("Permission denied") => {
            Err(ExecError::AuthenticationFailed { output })
        }
        code => Err(ExecError::CommandFailed { code, output }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwarden_core::types::Credential;

    fn target() -> SshTarget {
        SshTarget {
            host: "nas.local".to_string(),
            port: 22,
            username: "admin".to_string(),
            credential: Credential::Password("pw".to_string()),
            accept_new_host_key: true,
        }
    }

    #[test]
    fn spawn_args_wrap_command_in_login_shell() {
        let backend = ScriptedBackend::new(&ExecConfig::default());
        let args = backend.spawn_args(&target(), "echo hi");
        assert_eq!(
            args,
            [
                "ssh",
                "-tt",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "22",
                "admin@nas.local",
                "sh -lc 'echo hi'"
            ]
        );
    }

    #[test]
    fn classify_exit_statuses() {
        assert_eq!(classify(0, "hi\r\n".to_string(), 30).unwrap().output, "hi\r\n");

        assert!(matches!(
            classify(124, String::new(), 30),
            Err(ExecError::TimedOut { seconds: 30 })
        ));

        assert!(matches!(
            classify(255, "admin@nas: Permission denied (publickey,password).".to_string(), 30),
            Err(ExecError::AuthenticationFailed { .. })
        ));

        // ssh uses 255 for connection errors too.
        assert!(matches!(
            classify(255, "ssh: connect to host nas port 22: Connection refused".to_string(), 30),
            Err(ExecError::CommandFailed { code: 255, .. })
        ));

        match classify(1, "sudo: a password is required".to_string(), 30) {
            Err(ExecError::CommandFailed { code, output }) => {
                assert_eq!(code, 1);
                assert!(output.contains("sudo"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_expect_is_a_launch_failure() {
        let config = ExecConfig {
            expect_path: "/nonexistent/hostwarden-expect".to_string(),
            ..Default::default()
        };
        let err = ScriptedBackend::new(&config)
            .execute(&target(), "true")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
    }
}
