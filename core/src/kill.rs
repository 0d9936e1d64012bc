use std::io;
use std::sync::Arc;

use async_channel::Sender;

use crate::session::ProcessHandle;
use crate::session::SessionRegistry;
use crate::session::TerminalSession;
use shellbridge_protocol::Event;

/// Platform-specific delivery of the termination signal. Selected once at
/// compile time; both implementations are best-effort and the caller treats
/// failures as non-fatal.
trait TerminateProcess {
    fn terminate(&self, handle: ProcessHandle) -> io::Result<()>;
}

#[cfg(unix)]
struct PosixKiller;

#[cfg(unix)]
impl TerminateProcess for PosixKiller {
    fn terminate(&self, handle: ProcessHandle) -> io::Result<()> {
        // SAFETY: kill(2) on a pid we spawned; no memory is touched.
        let rc = unsafe { libc::kill(handle.pid as i32, libc::SIGKILL) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
struct ConsoleBreakKiller;

#[cfg(windows)]
impl TerminateProcess for ConsoleBreakKiller {
    fn terminate(&self, handle: ProcessHandle) -> io::Result<()> {
        // The child was spawned into its own process group, so the tree
        // termination reaches the whole group without touching the
        // controller.
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &handle.pid.to_string(), "/T", "/F"])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {status}")))
        }
    }
}

fn platform_killer() -> &'static dyn TerminateProcess {
    #[cfg(unix)]
    {
        &PosixKiller
    }
    #[cfg(windows)]
    {
        &ConsoleBreakKiller
    }
}

/// Kill the live process of one session. No-op when the session is unknown,
/// idle, or already dead; signaling failures surface as `error` events and
/// never reach the caller.
pub async fn kill_session(registry: &SessionRegistry, session_id: &str, events: &Sender<Event>) {
    let Some(session) = registry.get(session_id) else {
        return;
    };
    kill_live_process(&session, events).await;
}

/// Kill the live process of every session currently in the registry.
pub async fn kill_all(registry: &SessionRegistry, events: &Sender<Event>) {
    for session in registry.sessions() {
        kill_live_process(&session, events).await;
    }
}

/// Remove the session from the registry, killing any live process first.
pub async fn destroy_session(registry: &SessionRegistry, session_id: &str, events: &Sender<Event>) {
    let Some(session) = registry.remove(session_id) else {
        return;
    };
    kill_live_process(&session, events).await;
}

async fn kill_live_process(session: &Arc<TerminalSession>, events: &Sender<Event>) {
    // Taking the handle and delivering the signal are decoupled: the take is
    // the synchronized step, the signal is best-effort against a pid that
    // may have exited already.
    let Some(handle) = session.take_process() else {
        return;
    };
    tracing::debug!(
        pid = handle.pid,
        session_id = session.id(),
        "killing process"
    );
    if let Err(err) = signal_termination(handle) {
        tracing::warn!(pid = handle.pid, error = %err, "failed to deliver kill signal");
        let _ = events
            .send(Event::Error {
                data: format!("Error killing process: {err}"),
                id: None,
            })
            .await;
    }
}

fn signal_termination(handle: ProcessHandle) -> io::Result<()> {
    platform_killer().terminate(handle)
}
