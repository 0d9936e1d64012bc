use shellbridge_protocol::ShellKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Executable not found for shell: {shell}; try using another shell")]
    ShellNotFound { shell: ShellKind },
    #[error("session {session_id} already has a live process")]
    SessionBusy { session_id: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
