use std::borrow::Cow;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Sender;
use path_absolutize::Absolutize;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use shellbridge_core::DEFAULT_SESSION_ID;
use shellbridge_core::SessionRegistry;
use shellbridge_core::TerminalSession;
use shellbridge_protocol::Event;
use shellbridge_protocol::Request;
use shellbridge_protocol::RequestAction;
use shellbridge_protocol::ShellKind;

const INVALID_JSON_MESSAGE: &str = "Invalid JSON Input";
const CD_PREFIX: &str = "cd ";

/// Run the protocol loop over the process's stdin/stdout.
pub async fn run_stdio(registry: Arc<SessionRegistry>) -> anyhow::Result<()> {
    run(registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Drive the protocol loop over arbitrary byte channels.
///
/// Three tasks cooperate: the reader parses request lines, dispatching
/// `kill` immediately and queueing `run`; the run loop consumes queued runs
/// strictly one at a time; the writer serializes events onto the output one
/// JSON object per line. Killing therefore stays deliverable while a run is
/// blocking the loop. Returns once the input reaches end-of-stream and all
/// queued work has drained.
pub async fn run<R, W>(registry: Arc<SessionRegistry>, input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events_tx, events_rx) = async_channel::unbounded::<Event>();
    let (runs_tx, runs_rx) = mpsc::unbounded_channel::<Request>();

    let writer = tokio::spawn(write_events(events_rx, output));
    let run_loop = tokio::spawn(serve_runs(Arc::clone(&registry), runs_rx, events_tx.clone()));

    let read_result = read_requests(&registry, input, runs_tx, events_tx).await;

    // The reader dropped its channel ends: the run loop drains what is
    // queued, then the writer flushes the tail of the event stream.
    run_loop.await?;
    writer.await??;
    read_result
}

async fn read_requests<R>(
    registry: &SessionRegistry,
    input: R,
    runs: mpsc::UnboundedSender<Request>,
    events: Sender<Event>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // Byte-level reads: an invalid UTF-8 request line is decoded lossily
        // rather than rejected at the transport.
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting malformed request line");
                let _ = events
                    .send(Event::Error {
                        data: INVALID_JSON_MESSAGE.to_string(),
                        id: None,
                    })
                    .await;
                continue;
            }
        };

        match request.action {
            RequestAction::Kill => match request.id.as_deref() {
                Some(id) => shellbridge_core::kill_session(registry, id, &events).await,
                None => shellbridge_core::kill_all(registry, &events).await,
            },
            RequestAction::Run => {
                if runs.send(request).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn serve_runs(
    registry: Arc<SessionRegistry>,
    mut runs: mpsc::UnboundedReceiver<Request>,
    events: Sender<Event>,
) {
    while let Some(request) = runs.recv().await {
        process_run(&registry, request, &events).await;
    }
}

/// Handle one `run` request to completion: resolve the session, then either
/// the `cd` built-in or a full execution.
async fn process_run(registry: &SessionRegistry, request: Request, events: &Sender<Event>) {
    let shell = ShellKind::from_request(request.shell.as_deref());
    let session_id = request
        .id
        .clone()
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
    let session = registry.get_or_create(&session_id, shell, request.cwd.map(PathBuf::from));

    if let Some(target) = cd_target(&request.command) {
        change_directory(&session, target, request.id, events).await;
        return;
    }

    shellbridge_core::execute(&session, &request.command, request.id, events).await;
}

fn cd_target(command: &str) -> Option<&str> {
    let trimmed = command.trim();
    trimmed.strip_prefix(CD_PREFIX).map(str::trim)
}

/// The `cd` built-in. Never spawns a process: resolves the target against
/// the session's current working directory (`~` expands to the caller's
/// home), updates the session when the directory exists, and reports a
/// missing target on stderr.
async fn change_directory(
    session: &TerminalSession,
    target: &str,
    request_id: Option<String>,
    events: &Sender<Event>,
) {
    match resolve_target(&session.cwd(), target) {
        Ok(path) if path.is_dir() => {
            session.set_cwd(path.clone());
            tracing::debug!(session_id = session.id(), cwd = %path.display(), "working directory updated");
            let _ = events
                .send(Event::CwdUpdate {
                    data: path.display().to_string(),
                    id: request_id.clone(),
                })
                .await;
            let _ = events
                .send(Event::Close {
                    code: 0,
                    id: request_id,
                })
                .await;
        }
        Ok(path) => {
            let _ = events
                .send(Event::Stderr {
                    data: format!("Path not found: {}", path.display()),
                    id: request_id.clone(),
                })
                .await;
            let _ = events
                .send(Event::Close {
                    code: 1,
                    id: request_id,
                })
                .await;
        }
        Err(message) => {
            // Resolution failures surface on stderr; no close is guaranteed
            // on this path.
            let _ = events
                .send(Event::Stderr {
                    data: message,
                    id: request_id,
                })
                .await;
        }
    }
}

fn resolve_target(base: &Path, target: &str) -> Result<PathBuf, String> {
    if target == "~" {
        return dirs::home_dir().ok_or_else(|| "could not determine home directory".to_string());
    }
    Path::new(target)
        .absolutize_from(base)
        .map(Cow::into_owned)
        .map_err(|err| err.to_string())
}

async fn write_events<W>(events: async_channel::Receiver<Event>, mut output: W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(event) = events.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}
