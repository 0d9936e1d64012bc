use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use shellbridge_protocol::ShellKind;

/// Session id used when a `run` request carries no correlation id.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Record of a session's live child process.
///
/// Only the pid is retained here: the execution engine keeps the
/// `tokio::process::Child` for waiting, while the kill path signals by pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) cwd: PathBuf,
    pub(crate) process: Option<ProcessHandle>,
}

/// A logical terminal context: a shell kind fixed at creation, a mutable
/// working directory, and at most one live process at any instant.
///
/// Every read-modify-write of the stored process handle (store on spawn,
/// clear on exit, take on kill) goes through [`TerminalSession::lock_state`],
/// so a spawn and a kill can never race on the same slot.
#[derive(Debug)]
pub struct TerminalSession {
    id: String,
    shell: ShellKind,
    state: Mutex<SessionState>,
}

impl TerminalSession {
    fn new(id: String, shell: ShellKind, cwd: Option<PathBuf>) -> Self {
        let cwd = cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            id,
            shell,
            state: Mutex::new(SessionState { cwd, process: None }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shell(&self) -> ShellKind {
        self.shell
    }

    pub fn cwd(&self) -> PathBuf {
        self.lock_state().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: PathBuf) {
        self.lock_state().cwd = cwd;
    }

    pub fn live_process(&self) -> Option<ProcessHandle> {
        self.lock_state().process
    }

    /// Take the stored handle, leaving the session idle. No-op when idle.
    pub fn take_process(&self) -> Option<ProcessHandle> {
        self.lock_state().process.take()
    }

    /// Clear the stored handle after the process exits. Idempotent: a
    /// concurrent kill may already have taken it.
    pub fn clear_process(&self) {
        self.lock_state().process = None;
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide map from session id to [`TerminalSession`].
///
/// Sessions are created on first reference and live until destroyed; there
/// is no expiry. One instance is expected per process, owned by the
/// dispatcher rather than stashed in a global.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<TerminalSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it if absent. The supplied
    /// shell and cwd only apply at creation; an existing session keeps its
    /// own.
    pub fn get_or_create(
        &self,
        id: &str,
        shell: ShellKind,
        cwd: Option<PathBuf>,
    ) -> Arc<TerminalSession> {
        let mut sessions = self.lock_sessions();
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            Arc::new(TerminalSession::new(id.to_string(), shell, cwd))
        }))
    }

    pub fn get(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.lock_sessions().get(id).cloned()
    }

    /// Remove the entry, handing the session back for finalization (the
    /// killer takes care of any live process). No-op when absent.
    pub fn remove(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.lock_sessions().remove(id)
    }

    /// Snapshot of every live session, for kill-all.
    pub fn sessions(&self) -> Vec<Arc<TerminalSession>> {
        self.lock_sessions().values().cloned().collect()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<TerminalSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn get_or_create_reuses_existing_sessions() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create("s1", ShellKind::Bash, Some(PathBuf::from("/tmp")));
        let second =
            registry.get_or_create("s1", ShellKind::Powershell, Some(PathBuf::from("/var")));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.shell(), ShellKind::Bash);
        assert_eq!(second.cwd(), PathBuf::from("/tmp"));
    }

    #[test]
    fn new_sessions_default_to_the_daemon_working_directory() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s1", ShellKind::Cmd, None);
        let expected = std::env::current_dir().expect("current dir");
        assert_eq!(session.cwd(), expected);
    }

    #[test]
    fn process_handle_take_and_clear_are_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("s1", ShellKind::Bash, None);

        assert_eq!(session.take_process(), None);

        session.lock_state().process = Some(ProcessHandle { pid: 1234 });
        assert_eq!(session.live_process(), Some(ProcessHandle { pid: 1234 }));
        assert_eq!(session.take_process(), Some(ProcessHandle { pid: 1234 }));
        assert_eq!(session.take_process(), None);

        session.clear_process();
        assert_eq!(session.live_process(), None);
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1", ShellKind::Bash, None);

        assert!(registry.remove("s1").is_some());
        assert!(registry.get("s1").is_none());
        assert!(registry.remove("s1").is_none());
    }

    #[test]
    fn sessions_snapshots_every_entry() {
        let registry = SessionRegistry::new();
        registry.get_or_create("a", ShellKind::Bash, None);
        registry.get_or_create("b", ShellKind::Cmd, None);
        assert_eq!(registry.sessions().len(), 2);
    }
}
