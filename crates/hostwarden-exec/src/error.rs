//! Error types for the hostwarden-exec crate.

use thiserror::Error;

/// A failed remote execution.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote command failed ({code}): {output}")]
    CommandFailed { code: i32, output: String },

    #[error("SSH authentication failed: {output}")]
    AuthenticationFailed { output: String },

    #[error("SSH session timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("SSH library error: {0}")]
    Native(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),
}

impl ExecError {
    /// Diagnostic text of the failure, as seen by the escalation classifier.
    pub fn output(&self) -> String {
        match self {
            Self::CommandFailed { output, .. } | Self::AuthenticationFailed { output } => {
                output.clone()
            }
            other => other.to_string(),
        }
    }

    /// Exit code of the remote process, when one was observed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A failed host-key scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostKeyError {
    #[error("No host keys discovered")]
    NoKeysFound,

    #[error("Host key scan failed: {0}")]
    ScanFailed(String),
}

/// A failed step of the sudo escalation flow.
#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("No escalation request is pending")]
    NoPendingRequest,

    #[error("Registry error: {0}")]
    Registry(#[from] hostwarden_registry::RegistryError),

    #[error("Retry failed: {0}")]
    Retry(#[source] ExecError),
}

pub type Result<T> = std::result::Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_prefers_raw_process_output() {
        let err = ExecError::CommandFailed {
            code: 1,
            output: "sudo: a password is required\n".to_string(),
        };
        assert_eq!(err.output(), "sudo: a password is required\n");
        assert_eq!(err.exit_code(), Some(1));

        let err = ExecError::TimedOut { seconds: 30 };
        assert!(err.output().contains("30s"));
        assert_eq!(err.exit_code(), None);
    }
}
