//! The replica's fault state, as dictated by the controller.

use std::sync::Arc;

use parking_lot::Mutex;

use acsim_wire::ControllerCommand;

/// A point-in-time copy of the fault flags.
#[derive(Debug, Clone, Copy)]
pub struct FaultStatus {
    pub is_down: bool,
    pub is_byzantine: bool,
    pub is_done: bool,
}

/// Shared fault state. Replicas start down and honest, and wait for the
/// controller's start command before participating.
///
/// The done flag latches: neither a later command nor anything else clears
/// it, and every runtime activity exits once it observes the latch.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    inner: Arc<Mutex<FaultStatus>>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FaultStatus {
                is_down: true,
                is_byzantine: false,
                is_done: false,
            })),
        }
    }

    /// Apply a controller command. A permanent command is a crash and
    /// latches the done flag.
    pub fn apply(&self, command: &ControllerCommand) {
        let mut status = self.inner.lock();
        status.is_down = command.is_down;
        status.is_byzantine = command.is_byzantine;
        if command.is_permanent {
            status.is_done = true;
        }
    }

    pub fn snapshot(&self) -> FaultStatus {
        *self.inner.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().is_done
    }

    /// Force the done latch, used by the supervisor when an activity dies.
    pub fn latch_done(&self) {
        self.inner.lock().is_done = true;
    }
}

impl Default for ReplicaState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_down_and_not_done() {
        let state = ReplicaState::new();
        let status = state.snapshot();
        assert!(status.is_down);
        assert!(!status.is_byzantine);
        assert!(!status.is_done);
    }

    #[test]
    fn permanent_command_latches_done() {
        let state = ReplicaState::new();
        state.apply(&ControllerCommand::start());
        assert!(!state.snapshot().is_down);

        state.apply(&ControllerCommand::crash());
        assert!(state.is_finished());

        // A later non-permanent command cannot clear the latch.
        state.apply(&ControllerCommand::start());
        assert!(state.is_finished());
    }
}
