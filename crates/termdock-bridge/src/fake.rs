//! In-memory process bridge for tests
//!
//! Records every call, can hold `create()` open until released, and lets a
//! test inject output and exit events by hand.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::bridge::{CommandOutcome, ProcessBridge, SessionHandle};
use crate::error::BridgeError;
use crate::event::{BridgeEvent, EventChannel, EventReceiver};
use crate::Result;

/// Exit code reported for sessions ended through `kill`
pub const KILLED_EXIT_CODE: i32 = 137;

#[derive(Default)]
struct FakeState {
    created: Vec<(String, PathBuf, String)>,
    kills: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
    commands: Vec<(String, String)>,
    resizes: Vec<(String, u16, u16)>,
    live: HashSet<String>,
    fail_next_create: Option<String>,
    command_outcome: Option<CommandOutcome>,
    next_pid: u32,
}

pub struct FakeBridge {
    state: Mutex<FakeState>,
    hold: watch::Sender<bool>,
    events: EventChannel,
}

impl FakeBridge {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Mutex::new(FakeState {
                next_pid: 1000,
                ..FakeState::default()
            }),
            hold,
            events: EventChannel::new(),
        }
    }

    /// Make every `create()` wait until `release_creates` is called.
    pub fn hold_creates(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_creates(&self) {
        self.hold.send_replace(false);
    }

    pub fn fail_next_create(&self, reason: &str) {
        self.state.lock().fail_next_create = Some(reason.to_string());
    }

    pub fn set_command_outcome(&self, outcome: CommandOutcome) {
        self.state.lock().command_outcome = Some(outcome);
    }

    /// Inject an output chunk for a live session.
    pub fn emit_data(&self, id: &str, bytes: &[u8]) {
        if self.state.lock().live.contains(id) {
            let _ = self.events.sender().send(BridgeEvent::Data {
                id: id.to_string(),
                bytes: bytes.to_vec(),
            });
        }
    }

    /// End a live session. Exit fires at most once per id.
    pub fn emit_exit(&self, id: &str, code: i32) {
        if self.state.lock().live.remove(id) {
            let _ = self.events.sender().send(BridgeEvent::Exit {
                id: id.to_string(),
                code,
            });
        }
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().created.len()
    }

    pub fn created_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .created
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    pub fn created_cwds(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .created
            .iter()
            .map(|(_, cwd, _)| cwd.clone())
            .collect()
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.lock().kills.clone()
    }

    pub fn kill_count(&self, id: &str) -> usize {
        self.state.lock().kills.iter().filter(|k| *k == id).count()
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().commands.clone()
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.state.lock().resizes.clone()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.state.lock().live.contains(id)
    }
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessBridge for FakeBridge {
    async fn create(&self, cwd: &Path, title: &str) -> Result<SessionHandle> {
        let mut held = self.hold.subscribe();
        // The sender lives in self, so this only ends when the hold is lifted.
        let _ = held.wait_for(|held| !*held).await;

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_create.take() {
            return Err(BridgeError::Spawn(reason));
        }

        state.next_pid += 1;
        let handle = SessionHandle::new(Some(state.next_pid));
        state
            .created
            .push((handle.id.clone(), cwd.to_path_buf(), title.to_string()));
        state.live.insert(handle.id.clone());
        Ok(handle)
    }

    async fn write(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.live.contains(id) {
            return Err(BridgeError::UnknownSession(id.to_string()));
        }
        state.writes.push((id.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn run_command(&self, id: &str, command: &str) -> Result<CommandOutcome> {
        let mut state = self.state.lock();
        if !state.live.contains(id) {
            return Err(BridgeError::UnknownSession(id.to_string()));
        }
        state.commands.push((id.to_string(), command.to_string()));
        Ok(state.command_outcome.clone().unwrap_or(CommandOutcome {
            output: String::new(),
            exit_code: 0,
        }))
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) {
        self.state
            .lock()
            .resizes
            .push((id.to_string(), cols.max(1), rows.max(1)));
    }

    async fn kill(&self, id: &str) {
        self.state.lock().kills.push(id.to_string());
        self.emit_exit(id, KILLED_EXIT_CODE);
    }

    fn take_events(&self) -> Option<EventReceiver> {
        self.events.take()
    }
}
