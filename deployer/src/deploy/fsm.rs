//! Finite State Machine for one deployment run

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Initial state, nothing done yet
    Created,

    /// Staging the image through the registry
    RegistrySetup,

    /// Rendering and copying files to the cluster master
    Transferring,

    /// Remote shell open, commands being written
    SessionOpen,

    /// Session closed, printing its output
    Reporting,

    /// Container launch submitted to the cluster
    LaunchRequested,

    /// Deployment finished
    Done,

    /// Transport to the cluster master broke
    Aborted,

    /// Deployment stopped on a non-transport error
    Failed,
}

impl DeploymentState {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Done | DeploymentState::Aborted | DeploymentState::Failed
        )
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start the run
    Start,

    /// Image staged (or staging skipped)
    RegistryReady,

    /// All files copied
    Transferred,

    /// Session closed with a transcript
    SessionClosed,

    /// Output reported
    Reported,

    /// Launch accepted by the cluster
    Launched,

    /// Fatal transport failure
    Abort(String),

    /// Any other failure
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in created state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Created,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeploymentState::Created, DeploymentEvent::Start) => DeploymentState::RegistrySetup,
            (DeploymentState::RegistrySetup, DeploymentEvent::RegistryReady) => {
                DeploymentState::Transferring
            }
            (DeploymentState::Transferring, DeploymentEvent::Transferred) => {
                DeploymentState::SessionOpen
            }
            (DeploymentState::SessionOpen, DeploymentEvent::SessionClosed) => {
                DeploymentState::Reporting
            }
            (DeploymentState::Reporting, DeploymentEvent::Reported) => {
                DeploymentState::LaunchRequested
            }
            (DeploymentState::LaunchRequested, DeploymentEvent::Launched) => DeploymentState::Done,

            // Transport failures only happen while copying or in the session
            (
                DeploymentState::Transferring | DeploymentState::SessionOpen,
                DeploymentEvent::Abort(err),
            ) => {
                self.error = Some(err.clone());
                DeploymentState::Aborted
            }

            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
