#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::io;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;

use async_channel::Sender;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;

use crate::error::ExecError;
use crate::session::ProcessHandle;
use crate::session::TerminalSession;
use shellbridge_protocol::Event;
use shellbridge_protocol::ShellKind;

// Hardcode these since it does not seem worth including the libc crate just
// for these.
const EXIT_CODE_SIGNAL_BASE: i32 = 128; // conventional shell: 128 + signal
const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

const LINE_BUFFER_INITIAL_CAPACITY: usize = 1024;

/// Spawn in a dedicated process group so a group-scoped break can reach the
/// child without touching the controller.
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn event(self, data: String, id: Option<String>) -> Event {
        match self {
            StreamKind::Stdout => Event::Stdout { data, id },
            StreamKind::Stderr => Event::Stderr { data, id },
        }
    }
}

/// Run `command` in the session's shell and stream its lifecycle onto
/// `events`.
///
/// Every successful spawn ends with a `close` event, emitted only after both
/// output pumps have drained their streams. Spawn and wait failures surface
/// as `error` events; the stored process handle is cleared on every exit
/// path.
pub async fn execute(
    session: &Arc<TerminalSession>,
    command: &str,
    request_id: Option<String>,
    events: &Sender<Event>,
) {
    let mut child = match spawn_shell(session, command) {
        Ok(child) => child,
        Err(err) => {
            report_spawn_failure(err, request_id, events).await;
            return;
        }
    };

    let pid = child.id().unwrap_or_default();
    tracing::debug!(pid, session_id = session.id(), "process started");
    let _ = events
        .send(Event::Start {
            pid,
            id: request_id.clone(),
        })
        .await;

    match stream_to_exit(&mut child, request_id.clone(), events).await {
        Ok(code) => {
            let _ = events
                .send(Event::Close {
                    code,
                    id: request_id,
                })
                .await;
        }
        Err(err) => {
            tracing::warn!(pid, error = %err, "command execution failed");
            let _ = events
                .send(Event::Error {
                    data: err.to_string(),
                    id: request_id,
                })
                .await;
        }
    }

    session.clear_process();
}

/// Build the invocation, spawn it, and store the handle on the session — one
/// critical section, so a concurrent kill can never observe a half-updated
/// slot. A session that already holds a live handle rejects the run.
fn spawn_shell(session: &TerminalSession, command: &str) -> Result<Child, ExecError> {
    let mut state = session.lock_state();
    if state.process.is_some() {
        return Err(ExecError::SessionBusy {
            session_id: session.id().to_string(),
        });
    }

    let mut cmd = build_invocation(session.shell(), command);
    cmd.current_dir(&state.cwd);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ExecError::ShellNotFound {
                shell: session.shell(),
            }
        } else {
            ExecError::Io(err)
        }
    })?;

    state.process = Some(ProcessHandle {
        pid: child.id().unwrap_or_default(),
    });
    Ok(child)
}

fn build_invocation(shell: ShellKind, command: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = match shell {
        ShellKind::Powershell => {
            // Force UTF-8 console output so the pumps see well-formed text.
            let wrapped =
                format!("[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; {command}");
            let mut cmd = Command::new("powershell");
            cmd.args([
                "-NoProfile",
                "-NoLogo",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
            ]);
            cmd.arg(wrapped);
            cmd
        }
        ShellKind::Bash => {
            let mut cmd = Command::new("bash");
            cmd.arg("-c");
            cmd.arg(command);
            cmd
        }
        ShellKind::Cmd => native_interpreter(command),
    };

    #[cfg(windows)]
    {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd
}

#[cfg(windows)]
fn native_interpreter(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C");
    cmd.arg(command);
    cmd
}

#[cfg(not(windows))]
fn native_interpreter(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c");
    cmd.arg(command);
    cmd
}

async fn stream_to_exit(
    child: &mut Child,
    request_id: Option<String>,
    events: &Sender<Event>,
) -> Result<i32, ExecError> {
    let stdout = child.stdout.take().ok_or_else(|| {
        ExecError::Io(io::Error::other(
            "stdout pipe was unexpectedly not available",
        ))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        ExecError::Io(io::Error::other(
            "stderr pipe was unexpectedly not available",
        ))
    })?;

    let stdout_pump = tokio::spawn(pump_stream(
        BufReader::new(stdout),
        StreamKind::Stdout,
        request_id.clone(),
        events.clone(),
    ));
    let stderr_pump = tokio::spawn(pump_stream(
        BufReader::new(stderr),
        StreamKind::Stderr,
        request_id,
        events.clone(),
    ));

    let status = child.wait().await?;

    // Join both pumps before reporting the exit, so no output trails the
    // close event.
    let _ = stdout_pump.await;
    let _ = stderr_pump.await;

    Ok(exit_code(status))
}

/// Drain one output stream line-by-line into events, preserving per-stream
/// order. Runs until end-of-stream; read errors from a pipe torn down by a
/// concurrent kill count as end-of-stream, not failures.
async fn pump_stream<R>(mut reader: R, kind: StreamKind, id: Option<String>, events: Sender<Event>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(LINE_BUFFER_INITIAL_CAPACITY);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let data = String::from_utf8_lossy(&buf).into_owned();
                if events.send(kind.event(data, id.clone())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn report_spawn_failure(err: ExecError, request_id: Option<String>, events: &Sender<Event>) {
    tracing::warn!(error = %err, "failed to start command");
    let _ = events
        .send(Event::Error {
            data: err.to_string(),
            id: request_id.clone(),
        })
        .await;
    // A missing shell executable or a busy session is a recoverable
    // per-request failure and still terminates the request with a close.
    if matches!(
        err,
        ExecError::ShellNotFound { .. } | ExecError::SessionBusy { .. }
    ) {
        let _ = events
            .send(Event::Close {
                code: SPAWN_FAILURE_EXIT_CODE,
                id: request_id,
            })
            .await;
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            if let Some(signal) = status.signal() {
                return EXIT_CODE_SIGNAL_BASE + signal;
            }
        }
        -1
    })
}
