use serde::Serialize;

/// Identifier reported on the status surface.
pub const PUBLISHER_STATUS_ID: &str = "PUBLISHER_MANAGER";

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SupervisorState {
    /// Waiting for the next tick
    Idle = 0,
    /// Trying to take the lock
    Acquiring = 1,
    /// Lock held, consumer reading
    Running = 2,
    /// Shut down; no further ticks
    Stopped = 3,
}

impl From<u8> for SupervisorState {
    fn from(value: u8) -> Self {
        match value {
            1 => SupervisorState::Acquiring,
            2 => SupervisorState::Running,
            3 => SupervisorState::Stopped,
            _ => SupervisorState::Idle,
        }
    }
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Acquiring => "acquiring",
            SupervisorState::Running => "running",
            SupervisorState::Stopped => "stopped",
        }
    }
}

/// `{id: "PUBLISHER_MANAGER", enable, is_smtp_active, running}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherStatus {
    pub id: &'static str,
    pub enable: bool,
    pub is_smtp_active: bool,
    pub running: bool,
}

impl PublisherStatus {
    pub fn new(enable: bool, is_smtp_active: bool, running: bool) -> Self {
        Self {
            id: PUBLISHER_STATUS_ID,
            enable,
            is_smtp_active,
            running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_shape() {
        let status = PublisherStatus::new(true, false, true);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({
                "id": "PUBLISHER_MANAGER",
                "enable": true,
                "is_smtp_active": false,
                "running": true
            })
        );
    }

    #[test]
    fn test_state_roundtrips_through_u8() {
        for state in [
            SupervisorState::Idle,
            SupervisorState::Acquiring,
            SupervisorState::Running,
            SupervisorState::Stopped,
        ] {
            assert_eq!(SupervisorState::from(state as u8), state);
        }
    }
}
