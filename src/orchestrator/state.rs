//! Per-task lifecycle state machine.

use std::fmt;

use tracing::debug;

use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Loading,
    WorkspaceReady,
    AgentRunning,
    Validating,
    Done,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Error)
    }

    /// Forward edges plus `Error` from any non-terminal state.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (s, TaskState::Error) => !s.is_terminal(),
            (TaskState::Loading, TaskState::WorkspaceReady)
            | (TaskState::WorkspaceReady, TaskState::AgentRunning)
            | (TaskState::AgentRunning, TaskState::Validating)
            | (TaskState::Validating, TaskState::Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::WorkspaceReady => write!(f, "workspace_ready"),
            Self::AgentRunning => write!(f, "agent_running"),
            Self::Validating => write!(f, "validating"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
pub struct TaskStateMachine {
    instance_id: String,
    state: TaskState,
}

impl TaskStateMachine {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            state: TaskState::Loading,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Instance id is only known after the task file parses.
    pub fn rename(&mut self, instance_id: impl Into<String>) {
        self.instance_id = instance_id.into();
    }

    pub fn transition(&mut self, next: TaskState) -> Result<(), HarnessError> {
        if !self.state.can_transition_to(next) {
            return Err(HarnessError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(
            instance_id = %self.instance_id,
            from = %self.state,
            to = %next,
            "Task state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Moves to `Error` unless the task already reached a terminal state.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            debug!(instance_id = %self.instance_id, from = %self.state, "Task failed");
            self.state = TaskState::Error;
        }
    }
}
