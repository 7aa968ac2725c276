//! Node lifecycle state machine
//!
//! ```text
//!            start            stop
//! Created ─────────► Running ──────► Stopped
//!    │     (Starting)   │  (Stopping)   │
//!    │                  │ subscribe     │ start
//!    │                  │ unsubscribe   ▼
//!    │                  │ send        Running
//!    │
//!    └──── destroy, from any live state ────► Destroyed
//! ```
//!
//! A rejected start or stop leaves the node `Failed`; start or stop may be
//! retried from there.

use derive_more::Display;

use delivery_core::{DeliveryError, DeliveryResult};

/// Lifecycle state of a node context
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    #[default]
    #[display("created")]
    Created,
    #[display("starting")]
    Starting,
    #[display("running")]
    Running,
    #[display("stopping")]
    Stopping,
    #[display("stopped")]
    Stopped,
    #[display("failed")]
    Failed,
    #[display("destroyed")]
    Destroyed,
}

/// Host commands subject to state checks
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    #[display("start")]
    Start,
    #[display("stop")]
    Stop,
    #[display("subscribe")]
    Subscribe,
    #[display("unsubscribe")]
    Unsubscribe,
    #[display("send")]
    Send,
    #[display("set event callback")]
    SetEventCallback,
    #[display("destroy")]
    Destroy,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::Send => "send",
            Command::SetEventCallback => "set event callback",
            Command::Destroy => "destroy",
        }
    }
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
            NodeState::Failed => "failed",
            NodeState::Destroyed => "destroyed",
        }
    }

    /// Whether `command` may be issued in this state
    pub fn accepts(self, command: Command) -> bool {
        match command {
            Command::Start => matches!(
                self,
                NodeState::Created | NodeState::Stopped | NodeState::Failed
            ),
            // A failed node may still hold engine resources
            Command::Stop => matches!(self, NodeState::Running | NodeState::Failed),
            Command::Subscribe | Command::Unsubscribe | Command::Send => {
                self == NodeState::Running
            }
            Command::SetEventCallback | Command::Destroy => self != NodeState::Destroyed,
        }
    }

    /// Check `command` against this state
    ///
    /// A destroyed node reports an invalid handle rather than a state
    /// violation, since nothing is valid on it.
    pub fn ensure(self, command: Command) -> DeliveryResult<()> {
        if self.accepts(command) {
            Ok(())
        } else if self == NodeState::Destroyed {
            Err(DeliveryError::InvalidHandle)
        } else {
            Err(DeliveryError::InvalidState {
                command: command.as_str(),
                state: self.as_str(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [NodeState; 7] = [
        NodeState::Created,
        NodeState::Starting,
        NodeState::Running,
        NodeState::Stopping,
        NodeState::Stopped,
        NodeState::Failed,
        NodeState::Destroyed,
    ];

    #[test]
    fn test_start_states() {
        assert!(NodeState::Created.accepts(Command::Start));
        assert!(NodeState::Stopped.accepts(Command::Start));
        assert!(NodeState::Failed.accepts(Command::Start));
        assert!(!NodeState::Running.accepts(Command::Start));
        assert!(!NodeState::Starting.accepts(Command::Start));
    }

    #[test]
    fn test_messaging_requires_running() {
        for state in ALL_STATES {
            for command in [Command::Subscribe, Command::Unsubscribe, Command::Send] {
                assert_eq!(state.accepts(command), state == NodeState::Running, "{state} {command}");
            }
        }
    }

    #[test]
    fn test_stop_states() {
        for state in ALL_STATES {
            let expected = matches!(state, NodeState::Running | NodeState::Failed);
            assert_eq!(state.accepts(Command::Stop), expected, "{state}");
        }
    }

    #[test]
    fn test_destroy_from_every_live_state() {
        for state in ALL_STATES {
            assert_eq!(state.accepts(Command::Destroy), state != NodeState::Destroyed);
        }
    }

    #[test]
    fn test_transitional_rejects_all_but_destroy() {
        for state in [NodeState::Starting, NodeState::Stopping] {
            for command in [Command::Start, Command::Stop, Command::Subscribe, Command::Send] {
                assert!(!state.accepts(command));
            }
            assert!(state.accepts(Command::Destroy));
        }
    }

    #[test]
    fn test_violation_error() {
        let err = NodeState::Created.ensure(Command::Send).unwrap_err();
        assert_eq!(
            err,
            DeliveryError::InvalidState {
                command: "send",
                state: "created"
            }
        );
        assert_eq!(err.to_string(), "cannot send while node is created");
    }

    #[test]
    fn test_destroyed_is_invalid_handle() {
        assert_eq!(
            NodeState::Destroyed.ensure(Command::Destroy),
            Err(DeliveryError::InvalidHandle)
        );
    }

    #[test]
    fn test_display_matches_as_str() {
        for state in ALL_STATES {
            assert_eq!(state.to_string(), state.as_str());
        }
    }
}
