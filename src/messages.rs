// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::imu::classifier::Classification;
use crate::motion::choreography::{PoseName, SequenceName, Side};
use crate::motion::pose::{ActuatorId, Pose};

/// Command from host/scripts -> runtime
///
/// `id` is echoed in every reply so a caller can match them up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Re-read and return every actuator position
    ReportPositions,
    MoveTo {
        pose: PoseName,
        #[serde(default)]
        smooth: bool,
    },
    RunSequence {
        sequence: SequenceName,
    },
    /// Empty `ids` means every actuator
    SetTorque {
        #[serde(default)]
        ids: Vec<u8>,
        enabled: bool,
    },
    StartPropulsion,
    StopPropulsion,
    /// Abort the running sequence at the next waypoint and drop queued work
    Stop,
    QueryOrientation,
}

/// Per-command acknowledgement from runtime -> host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// Queued behind `queued` other jobs
    Accepted { request: u64, queued: usize },
    Done { request: u64 },
    /// Dropped by a stop before it finished
    Cancelled { request: u64 },
    Positions {
        request: u64,
        positions: Vec<ActuatorPosition>,
        missing: Vec<ActuatorId>,
    },
    Torque { request: u64, results: Vec<TorqueResult> },
    Orientation {
        request: u64,
        classification: Option<Classification>,
        average_tilt: Option<f64>,
        last_tilt: Option<f64>,
        propulsion: bool,
    },
    Rejected { request: u64, reason: String },
}

impl Reply {
    pub fn request(&self) -> u64 {
        match self {
            Reply::Accepted { request, .. }
            | Reply::Done { request }
            | Reply::Cancelled { request }
            | Reply::Positions { request, .. }
            | Reply::Torque { request, .. }
            | Reply::Orientation { request, .. }
            | Reply::Rejected { request, .. } => *request,
        }
    }

    /// Whether no further replies will follow for this request
    pub fn is_final(&self) -> bool {
        !matches!(self, Reply::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorPosition {
    pub id: ActuatorId,
    pub tick: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorqueResult {
    pub id: ActuatorId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the sequencer is busy with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Sequence { name: String, remaining: usize },
    Propel { side: Side, remaining: usize },
}

/// Published every loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub state: SequencerState,
    pub propulsion: bool,
    pub queued: usize,
    pub classification: Option<Classification>,
    pub average_tilt: Option<f64>,
    pub last_tilt: Option<f64>,
    pub rejected_samples: u64,
    pub pose: Pose,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    /// A bus or sensor transaction failed this iteration
    Degraded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_to() {
        let req: CommandRequest =
            serde_json::from_str(r#"{"id": 7, "command": "move_to", "pose": "perfect_circle"}"#).unwrap();
        assert_eq!(req.id, 7);
        assert_eq!(
            req.command,
            Command::MoveTo {
                pose: PoseName::PerfectCircle,
                smooth: false
            }
        );
    }

    #[test]
    fn test_parse_without_id() {
        let req: CommandRequest = serde_json::from_str(r#"{"command": "stop"}"#).unwrap();
        assert_eq!(req.id, 0);
        assert_eq!(req.command, Command::Stop);
    }

    #[test]
    fn test_parse_sequence_names() {
        let req: CommandRequest =
            serde_json::from_str(r#"{"command": "run_sequence", "sequence": "circle_to_walk"}"#).unwrap();
        assert_eq!(
            req.command,
            Command::RunSequence {
                sequence: SequenceName::CircleToWalk
            }
        );
    }

    #[test]
    fn test_unknown_command_is_error() {
        assert!(serde_json::from_str::<CommandRequest>(r#"{"command": "fly"}"#).is_err());
        assert!(serde_json::from_str::<CommandRequest>(r#"{"command": "move_to", "pose": "nope"}"#).is_err());
    }

    #[test]
    fn test_reply_is_tagged() {
        let json = serde_json::to_value(Reply::Done { request: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "done", "request": 3}));

        let json = serde_json::to_value(Reply::Torque {
            request: 1,
            results: vec![TorqueResult {
                id: ActuatorId::new(4).unwrap(),
                ok: true,
                error: None,
            }],
        })
        .unwrap();
        assert_eq!(json["results"][0], serde_json::json!({"id": 4, "ok": true}));
    }

    #[test]
    fn test_health_format() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Degraded).unwrap(), "\"degraded\"");
    }
}
