//! PTY-backed process bridge
//!
//! Each session owns a pseudo-terminal pair and one child shell:
//! - A background thread reads PTY output and forwards it as `Data` events
//! - On EOF the thread reaps the child and emits a single `Exit` event
//! - Input, resize, and kill go straight to the PTY master / child killer

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::oneshot;

use crate::bridge::{CommandOutcome, ProcessBridge, SessionHandle};
use crate::error::BridgeError;
use crate::event::{BridgeEvent, EventChannel, EventReceiver, EventSender};
use crate::marker::{new_token, wrap_command, PendingCommand};
use crate::Result;

const FALLBACK_SHELL: &str = "/bin/sh";

/// How sessions are spawned.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Shell override; `$SHELL` and then `/bin/sh` are tried when unset
    pub shell: Option<String>,
    pub shell_args: Vec<String>,
    /// Extra environment for every session
    pub env: Vec<(String, String)>,
    /// Initial grid before the first fit
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: Vec::new(),
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

impl PtyConfig {
    /// Resolve the shell program to an executable path.
    pub fn resolve_shell(&self) -> Result<PathBuf> {
        let candidates = self
            .shell
            .clone()
            .into_iter()
            .chain(std::env::var("SHELL").ok())
            .chain(std::iter::once(FALLBACK_SHELL.to_string()));

        for candidate in candidates {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            match which::which(candidate) {
                Ok(path) => return Ok(path),
                Err(err) => {
                    tracing::debug!(shell = %candidate, error = %err, "Shell candidate not usable");
                }
            }
        }

        Err(BridgeError::Spawn("no usable shell found".to_string()))
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    /// Locked per session so a slow write never holds the session map
    writer: SharedWriter,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pending: Arc<Mutex<Vec<PendingCommand>>>,
}

/// Process bridge over the platform's native PTY.
pub struct PtyBridge {
    config: PtyConfig,
    sessions: Arc<Mutex<HashMap<String, PtyProcess>>>,
    events: EventChannel,
}

impl PtyBridge {
    pub fn new(config: PtyConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events: EventChannel::new(),
        }
    }

    /// Number of sessions whose process has not been killed or reaped
    pub fn live_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn with_process<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PtyProcess) -> T,
    ) -> Option<T> {
        self.sessions.lock().get_mut(id).map(f)
    }
}

#[async_trait]
impl ProcessBridge for PtyBridge {
    async fn create(&self, cwd: &Path, title: &str) -> Result<SessionHandle> {
        let config = self.config.clone();
        let cwd = cwd.to_path_buf();
        let title = title.to_string();
        let sessions = Arc::clone(&self.sessions);
        let events = self.events.sender();

        tokio::task::spawn_blocking(move || spawn_session(&config, &cwd, &title, sessions, events))
            .await
            .map_err(|err| BridgeError::Spawn(err.to_string()))?
    }

    async fn write(&self, id: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let writer = self
            .with_process(id, |process| Arc::clone(&process.writer))
            .ok_or_else(|| BridgeError::UnknownSession(id.to_string()))?;

        write_blocking(id, writer, bytes.to_vec()).await
    }

    async fn run_command(&self, id: &str, command: &str) -> Result<CommandOutcome> {
        let token = new_token();
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped = wrap_command(command, &token);

        let (writer, pending) = self
            .with_process(id, |process| {
                process
                    .pending
                    .lock()
                    .push(PendingCommand::new(command, token.clone(), reply_tx));
                (Arc::clone(&process.writer), Arc::clone(&process.pending))
            })
            .ok_or_else(|| BridgeError::UnknownSession(id.to_string()))?;

        if let Err(err) = write_blocking(id, writer, wrapped.into_bytes()).await {
            pending.lock().retain(|p| p.token() != token);
            return Err(err);
        }

        tracing::debug!(session_id = %id, command = %command, "Command issued");

        reply_rx
            .await
            .map_err(|_| BridgeError::SessionExited(id.to_string()))
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) {
        let size = PtySize {
            rows: rows.max(1),
            cols: cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        };
        let result = self.with_process(id, |process| process.master.resize(size));

        match result {
            Some(Ok(())) => {
                tracing::debug!(session_id = %id, cols = size.cols, rows = size.rows, "Resized PTY");
            }
            Some(Err(err)) => {
                let err = BridgeError::Resize {
                    id: id.to_string(),
                    reason: err.to_string(),
                };
                tracing::warn!(error = %err, "Resize failed");
            }
            None => {
                tracing::warn!(session_id = %id, "Resize for unknown session ignored");
            }
        }
    }

    async fn kill(&self, id: &str) {
        let process = self.sessions.lock().remove(id);
        let Some(mut process) = process else {
            tracing::debug!(session_id = %id, "Kill for unknown or exited session ignored");
            return;
        };

        if let Err(err) = process.killer.kill() {
            // Usually the child is already gone; the reader thread reports the exit.
            tracing::debug!(session_id = %id, error = %err, "Kill signal not delivered");
        }
        tracing::info!(session_id = %id, "Killed session process");
    }

    fn take_events(&self) -> Option<EventReceiver> {
        self.events.take()
    }
}

/// Write on the blocking pool; a full PTY buffer must not stall the runtime.
async fn write_blocking(id: &str, writer: SharedWriter, bytes: Vec<u8>) -> Result<()> {
    let to_error = |reason: String| BridgeError::Write {
        id: id.to_string(),
        reason,
    };

    tokio::task::spawn_blocking(move || {
        let mut writer = writer.lock();
        writer.write_all(&bytes).and_then(|_| writer.flush())
    })
    .await
    .map_err(|err| to_error(err.to_string()))?
    .map_err(|err| to_error(err.to_string()))
}

fn spawn_session(
    config: &PtyConfig,
    cwd: &Path,
    title: &str,
    sessions: Arc<Mutex<HashMap<String, PtyProcess>>>,
    events: EventSender,
) -> Result<SessionHandle> {
    let shell = config.resolve_shell()?;
    if !cwd.is_dir() {
        return Err(BridgeError::Spawn(format!(
            "working directory does not exist: {}",
            cwd.display()
        )));
    }

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: config.rows.max(1),
            cols: config.cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| BridgeError::Spawn(err.to_string()))?;

    let mut cmd = CommandBuilder::new(&shell);
    if !config.shell_args.is_empty() {
        cmd.args(config.shell_args.iter().map(|arg| arg.as_str()));
    }
    cmd.cwd(cwd);
    cmd.env("TERM", "xterm-256color");
    cmd.env("TERMDOCK_TITLE", title);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| BridgeError::Spawn(err.to_string()))?;
    // The reader only sees EOF once every slave handle is closed.
    drop(pair.slave);

    let killer = child.clone_killer();
    let reader = pair.master.try_clone_reader();
    let writer = pair.master.take_writer();
    let (mut reader, writer) = match (reader, writer) {
        (Ok(reader), Ok(writer)) => (reader, writer),
        (Err(err), _) | (_, Err(err)) => {
            let _ = child.kill();
            return Err(BridgeError::Spawn(err.to_string()));
        }
    };

    let handle = SessionHandle::new(child.process_id());
    let pending: Arc<Mutex<Vec<PendingCommand>>> = Arc::new(Mutex::new(Vec::new()));

    sessions.lock().insert(
        handle.id.clone(),
        PtyProcess {
            master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            killer,
            pending: Arc::clone(&pending),
        },
    );

    let id = handle.id.clone();
    let reader_sessions = Arc::clone(&sessions);
    let spawned = thread::Builder::new()
        .name(format!("termdock-pty-{}", &id[..8]))
        .spawn(move || {
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(size) => {
                        let chunk = &buffer[..size];
                        pending.lock().retain_mut(|command| !command.feed(chunk));
                        // Keep draining even without a listener so the child never blocks.
                        let _ = events.send(BridgeEvent::Data {
                            id: id.clone(),
                            bytes: chunk.to_vec(),
                        });
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }

            // Dropping unanswered commands fails their callers with SessionExited.
            pending.lock().clear();
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(err) => {
                    tracing::warn!(session_id = %id, error = %err, "Failed to reap session process");
                    -1
                }
            };
            reader_sessions.lock().remove(&id);

            tracing::info!(session_id = %id, code, "Session process exited");
            let _ = events.send(BridgeEvent::Exit { id, code });
        });

    if let Err(err) = spawned {
        if let Some(mut process) = sessions.lock().remove(&handle.id) {
            let _ = process.killer.kill();
        }
        return Err(BridgeError::Spawn(err.to_string()));
    }

    tracing::info!(
        session_id = %handle.id,
        pid = ?handle.pid,
        shell = %shell.display(),
        cwd = %cwd.display(),
        "Spawned session"
    );

    Ok(handle)
}
