//! Scripted local engine.

use async_trait::async_trait;
use fedbridge_core::{EngineError, EngineStatus, LocalEngine};
use std::sync::{Arc, Mutex, PoisonError};

/// Command the engine received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Pause,
    Stop,
}

#[derive(Debug)]
struct EngineState {
    /// Status polls answered with Busy before the final status
    busy_polls: u32,
    final_status: EngineStatus,
    running: bool,
    commands: Vec<EngineCommand>,
    reject_next: Option<String>,
}

/// In-memory engine whose readiness is scripted.
#[derive(Debug)]
pub struct SimEngine {
    state: Mutex<EngineState>,
}

impl SimEngine {
    /// Engine that becomes ready after `busy_polls` status polls.
    pub fn ready_after(busy_polls: u32) -> Arc<Self> {
        Self::scripted(busy_polls, EngineStatus::Ready)
    }

    /// Engine whose preparation fails with `detail`.
    pub fn failing(detail: &str) -> Arc<Self> {
        Self::scripted(0, EngineStatus::Failed(detail.to_string()))
    }

    fn scripted(busy_polls: u32, final_status: EngineStatus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState {
                busy_polls,
                final_status,
                running: false,
                commands: Vec::new(),
                reject_next: None,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects the next control call with `reason`.
    pub fn reject_next(&self, reason: &str) {
        self.lock().reject_next = Some(reason.to_string());
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.lock().commands.clone()
    }

    /// Number of start calls (loads plus explicit starts).
    pub fn starts(&self) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| **c == EngineCommand::Start)
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    fn apply(&self, command: EngineCommand) -> Result<(), EngineError> {
        let mut state = self.lock();
        if let Some(reason) = state.reject_next.take() {
            return Err(EngineError::Rejected(reason));
        }
        state.commands.push(command);
        state.running = command == EngineCommand::Start;
        Ok(())
    }
}

#[async_trait]
impl LocalEngine for SimEngine {
    async fn start_simulation(&self) -> Result<(), EngineError> {
        self.apply(EngineCommand::Start)
    }

    async fn pause_simulation(&self) -> Result<(), EngineError> {
        self.apply(EngineCommand::Pause)
    }

    async fn stop_simulation(&self) -> Result<(), EngineError> {
        self.apply(EngineCommand::Stop)
    }

    async fn status(&self) -> EngineStatus {
        let mut state = self.lock();
        if state.busy_polls > 0 {
            state.busy_polls -= 1;
            return EngineStatus::Busy;
        }
        state.final_status.clone()
    }
}
