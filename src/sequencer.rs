// Motion sequencer: decides what the robot does next
//
// Pure state machine, no I/O. The runtime calls `tick` once per loop
// iteration with the latest IMU sample and executes the returned `Step`.
// Commands arrive through `submit` between ticks, which is always a
// waypoint boundary.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::hardware::Readback;
use crate::imu::classifier::{Decision, OrientationClassifier, RawImuSample};
use crate::messages::{Command, CommandRequest, Reply, SequencerState, Telemetry};
use crate::motion::choreography::{Choreography, Side, Waypoint};
use crate::motion::pose::{ActuatorId, Pose};

/// Jobs waiting behind the running one
pub const MAX_QUEUED_JOBS: usize = 16;

const MOVE_SETTLE: Duration = Duration::from_millis(100);

/// Picks a side when the orientation is ambiguous
pub trait TieBreak: Send {
    fn pick(&mut self) -> Side;
}

/// Uniform coin flip per ambiguous decision
pub struct RandomTieBreak {
    rng: SmallRng,
}

impl RandomTieBreak {
    pub fn from_entropy() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl TieBreak for RandomTieBreak {
    fn pick(&mut self) -> Side {
        if self.rng.gen_bool(0.5) {
            Side::Yellow
        } else {
            Side::Blue
        }
    }
}

/// One unit of hardware work for the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Drive one waypoint; `completes` is the request finished by it
    Dispatch { waypoint: Waypoint, completes: Option<u64> },
    Torque { request: u64, ids: Vec<ActuatorId>, enabled: bool },
    ReportPositions { request: u64 },
}

#[derive(Debug)]
enum Job {
    Sequence {
        request: u64,
        name: String,
        waypoints: Vec<Waypoint>,
    },
    Torque {
        request: u64,
        ids: Vec<ActuatorId>,
        enabled: bool,
    },
    ReportPositions {
        request: u64,
    },
}

impl Job {
    fn request(&self) -> u64 {
        match self {
            Job::Sequence { request, .. } | Job::Torque { request, .. } | Job::ReportPositions { request } => *request,
        }
    }
}

#[derive(Debug)]
enum Activity {
    Idle,
    Sequence {
        request: u64,
        name: String,
        remaining: VecDeque<Waypoint>,
    },
    Propel {
        side: Side,
        remaining: VecDeque<Waypoint>,
    },
}

pub struct Sequencer {
    choreography: Choreography,
    classifier: OrientationClassifier,
    tie_break: Box<dyn TieBreak>,
    activity: Activity,
    queue: VecDeque<Job>,
    propulsion: bool,
    last_decision: Option<Decision>,
    current: Pose,
    smooth_steps: usize,
}

impl Sequencer {
    pub fn new(
        choreography: Choreography,
        classifier: OrientationClassifier,
        tie_break: Box<dyn TieBreak>,
        smooth_steps: usize,
    ) -> Self {
        Self {
            choreography,
            classifier,
            tie_break,
            activity: Activity::Idle,
            queue: VecDeque::new(),
            propulsion: false,
            last_decision: None,
            current: Pose::default(),
            smooth_steps,
        }
    }

    /// Accept one host command and return the immediate replies
    pub fn submit(&mut self, req: CommandRequest) -> Vec<Reply> {
        let request = req.id;
        info!("Received command {}: {:?}", request, req.command);

        let job = match req.command {
            Command::StartPropulsion => {
                self.propulsion = true;
                return vec![Reply::Done { request }];
            }
            Command::StopPropulsion => {
                self.propulsion = false;
                return vec![Reply::Done { request }];
            }
            Command::Stop => {
                let mut replies = self.cancel_all();
                replies.push(Reply::Done { request });
                return replies;
            }
            Command::QueryOrientation => {
                return vec![Reply::Orientation {
                    request,
                    classification: self.last_decision.map(|d| d.classification),
                    average_tilt: self.last_decision.map(|d| d.average_tilt),
                    last_tilt: self.classifier.last_tilt(),
                    propulsion: self.propulsion,
                }];
            }
            Command::ReportPositions => Job::ReportPositions { request },
            Command::SetTorque { ids, enabled } => match parse_ids(&ids) {
                Ok(ids) => Job::Torque { request, ids, enabled },
                Err(reason) => return vec![reject(request, reason)],
            },
            Command::MoveTo { pose, smooth } => {
                let mut waypoint = Waypoint::new(pose.as_str(), self.choreography.pose(pose), MOVE_SETTLE);
                if smooth {
                    waypoint = waypoint.smooth(self.smooth_steps);
                }
                Job::Sequence {
                    request,
                    name: format!("move_to {}", pose.as_str()),
                    waypoints: vec![waypoint],
                }
            }
            Command::RunSequence { sequence } => Job::Sequence {
                request,
                name: sequence.as_str().to_string(),
                waypoints: self.choreography.sequence(sequence),
            },
        };

        if self.queue.len() >= MAX_QUEUED_JOBS {
            return vec![reject(request, "command queue full".to_string())];
        }
        let queued = self.queue.len() + usize::from(!matches!(self.activity, Activity::Idle));
        self.queue.push_back(job);
        vec![Reply::Accepted { request, queued }]
    }

    /// Drop the running sequence, every queued job, and propulsion
    fn cancel_all(&mut self) -> Vec<Reply> {
        self.propulsion = false;
        let mut replies = Vec::new();
        match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Sequence { request, name, remaining } => {
                info!("Stopping {} with {} waypoints left", name, remaining.len());
                replies.push(Reply::Cancelled { request });
            }
            Activity::Propel { side, .. } => info!("Stopping {:?} propel cycle", side),
            Activity::Idle => {}
        }
        replies.extend(self.queue.drain(..).map(|job| Reply::Cancelled { request: job.request() }));
        replies
    }

    /// Advance one loop iteration
    ///
    /// `sample` is `None` when the sensor read failed. Explicit commands
    /// start before orientation-driven propulsion, and nothing interrupts
    /// a running sequence except `Stop`.
    pub fn tick(&mut self, sample: Option<&RawImuSample>) -> Option<Step> {
        let decision = self.classifier.observe(sample);
        if let Some(d) = decision {
            self.last_decision = Some(d);
        }

        if matches!(self.activity, Activity::Idle) {
            if let Some(job) = self.queue.pop_front() {
                if let Some(step) = self.start(job) {
                    return Some(step);
                }
            } else if let (true, Some(d)) = (self.propulsion, decision) {
                let side = match d.classification.side() {
                    Some(side) => side,
                    None => {
                        let side = self.tie_break.pick();
                        debug!("Ambiguous tilt {:.1} deg, tie-break picked {:?}", d.average_tilt, side);
                        side
                    }
                };
                info!("Propelling {:?} side (tilt {:.1} deg)", side, d.average_tilt);
                self.activity = Activity::Propel {
                    side,
                    remaining: self.choreography.propel_cycle(side).into(),
                };
            }
        }

        self.next_waypoint()
    }

    fn start(&mut self, job: Job) -> Option<Step> {
        match job {
            Job::Sequence { request, name, waypoints } => {
                info!("Starting {} ({} waypoints)", name, waypoints.len());
                self.activity = Activity::Sequence {
                    request,
                    name,
                    remaining: waypoints.into(),
                };
                None
            }
            Job::Torque { request, ids, enabled } => Some(Step::Torque { request, ids, enabled }),
            Job::ReportPositions { request } => Some(Step::ReportPositions { request }),
        }
    }

    fn next_waypoint(&mut self) -> Option<Step> {
        let (waypoint, finished, completes) = match &mut self.activity {
            Activity::Idle => return None,
            Activity::Sequence { request, remaining, .. } => {
                let waypoint = remaining.pop_front();
                (waypoint, remaining.is_empty(), Some(*request))
            }
            Activity::Propel { remaining, .. } => {
                let waypoint = remaining.pop_front();
                (waypoint, remaining.is_empty(), None)
            }
        };

        if finished {
            self.activity = Activity::Idle;
        }
        match waypoint {
            Some(waypoint) => Some(Step::Dispatch {
                waypoint,
                completes: if finished { completes } else { None },
            }),
            None => {
                // Only reachable for an empty sequence
                warn!("Sequence had no waypoints");
                completes.map(|request| Step::Dispatch {
                    waypoint: Waypoint::new("hold", self.current, Duration::ZERO),
                    completes: Some(request),
                })
            }
        }
    }

    /// Record positions read back from the bus; missing IDs keep their last value
    pub fn commit_readback(&mut self, readback: &Readback) {
        for &(id, tick) in &readback.positions {
            self.current.set(id, tick);
        }
    }

    pub fn current_pose(&self) -> Pose {
        self.current
    }

    pub fn propulsion(&self) -> bool {
        self.propulsion
    }

    pub fn set_propulsion(&mut self, enabled: bool) {
        self.propulsion = enabled;
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    pub fn state(&self) -> SequencerState {
        match &self.activity {
            Activity::Idle => SequencerState::Idle,
            Activity::Sequence { name, remaining, .. } => SequencerState::Sequence {
                name: name.clone(),
                remaining: remaining.len(),
            },
            Activity::Propel { side, remaining } => SequencerState::Propel {
                side: *side,
                remaining: remaining.len(),
            },
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            state: self.state(),
            propulsion: self.propulsion,
            queued: self.queue.len(),
            classification: self.last_decision.map(|d| d.classification),
            average_tilt: self.last_decision.map(|d| d.average_tilt),
            last_tilt: self.classifier.last_tilt(),
            rejected_samples: self.classifier.rejected(),
            pose: self.current,
        }
    }
}

fn reject(request: u64, reason: String) -> Reply {
    warn!("Rejected command {}: {}", request, reason);
    Reply::Rejected { request, reason }
}

fn parse_ids(ids: &[u8]) -> Result<Vec<ActuatorId>, String> {
    if ids.is_empty() {
        return Ok(ActuatorId::all().collect());
    }
    ids.iter().map(|&id| ActuatorId::try_from(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::classifier::{Classification, ClassifierConfig, ImuScale};
    use crate::messages::Command;
    use crate::motion::choreography::{PoseName, SequenceName};
    use crate::motor::calibration::Calibration;
    use crate::sim::SimulatedImu;

    /// Tie-break that replays a fixed script
    struct Scripted(VecDeque<Side>);

    impl TieBreak for Scripted {
        fn pick(&mut self) -> Side {
            self.0.pop_front().expect("tie-break script exhausted")
        }
    }

    fn sequencer(script: &[Side]) -> Sequencer {
        let choreography = Choreography::builder(Calibration::default()).build();
        Sequencer::new(
            choreography,
            OrientationClassifier::new(ClassifierConfig::default()),
            Box::new(Scripted(script.iter().copied().collect())),
            5,
        )
    }

    fn tilted(degrees: f64) -> RawImuSample {
        SimulatedImu::sample_for(degrees, &ImuScale::default())
    }

    fn cmd(id: u64, command: Command) -> CommandRequest {
        CommandRequest { id, command }
    }

    fn label(step: Option<Step>) -> String {
        match step {
            Some(Step::Dispatch { waypoint, .. }) => waypoint.label,
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_twice_dispatches_both_times() {
        let mut seq = sequencer(&[Side::Blue, Side::Yellow]);
        seq.set_propulsion(true);
        let s = tilted(90.0);

        assert_eq!(seq.tick(Some(&s)), None);
        assert_eq!(label(seq.tick(Some(&s))), "blue_propel");
        assert_eq!(seq.last_decision().unwrap().classification, Classification::Ambiguous);
        assert_eq!(label(seq.tick(Some(&s))), "perfect_circle");
        assert_eq!(seq.state(), SequencerState::Idle);

        // The next window completes right as the cycle ends
        assert_eq!(label(seq.tick(Some(&s))), "yellow_propel");
    }

    #[test]
    fn test_classified_side_is_propelled() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        let s = tilted(140.0);

        seq.tick(Some(&s));
        assert_eq!(label(seq.tick(Some(&s))), "blue_propel");

        let s = tilted(10.0);
        assert_eq!(label(seq.tick(Some(&s))), "perfect_circle");
        assert_eq!(label(seq.tick(Some(&s))), "yellow_propel");
    }

    #[test]
    fn test_propel_cycle_has_hold_then_circle() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        let s = tilted(10.0);
        seq.tick(Some(&s));
        match seq.tick(Some(&s)) {
            Some(Step::Dispatch { waypoint, completes }) => {
                assert_eq!(waypoint.settle.as_millis(), 700);
                assert_eq!(completes, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_propulsion_when_disabled() {
        let mut seq = sequencer(&[]);
        let s = tilted(10.0);
        assert_eq!(seq.tick(Some(&s)), None);
        assert_eq!(seq.tick(Some(&s)), None);
        assert_eq!(seq.last_decision().unwrap().classification, Classification::YellowUnder);
    }

    #[test]
    fn test_invalid_samples_delay_decision() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        let s = tilted(10.0);
        assert_eq!(seq.tick(Some(&s)), None);
        assert_eq!(seq.tick(None), None);
        assert_eq!(label(seq.tick(Some(&s))), "yellow_propel");
    }

    #[test]
    fn test_command_runs_before_propulsion() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        let replies = seq.submit(cmd(
            1,
            Command::MoveTo {
                pose: PoseName::HomeStance,
                smooth: false,
            },
        ));
        assert_eq!(replies, vec![Reply::Accepted { request: 1, queued: 0 }]);

        let s = tilted(10.0);
        match seq.tick(Some(&s)) {
            Some(Step::Dispatch { waypoint, completes }) => {
                assert_eq!(waypoint.label, "home_stance");
                assert_eq!(completes, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(label(seq.tick(Some(&s))), "yellow_propel");
    }

    #[test]
    fn test_command_preempts_pending_decision() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        let s = tilted(10.0);
        seq.tick(Some(&s));
        seq.submit(cmd(
            2,
            Command::MoveTo {
                pose: PoseName::HomeStance,
                smooth: true,
            },
        ));

        // The window completes on this tick but the queued command wins
        match seq.tick(Some(&s)) {
            Some(Step::Dispatch { waypoint, completes }) => {
                assert_eq!(waypoint.pose, seq.choreography.pose(PoseName::HomeStance));
                assert_eq!(waypoint.motion, crate::motion::choreography::Motion::Smooth { steps: 5 });
                assert_eq!(completes, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_orientation_never_preempts_sequence() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        seq.submit(cmd(
            3,
            Command::RunSequence {
                sequence: SequenceName::CircleToWalk,
            },
        ));
        let s = tilted(140.0);
        let mut labels = Vec::new();
        let mut completed = None;
        for _ in 0..8 {
            match seq.tick(Some(&s)) {
                Some(Step::Dispatch { waypoint, completes }) => {
                    labels.push(waypoint.label);
                    completed = completes.or(completed);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(labels.first().map(String::as_str), Some("perfect_circle"));
        assert_eq!(labels.last().map(String::as_str), Some("home_stance"));
        assert!(labels.iter().all(|l| !l.contains("propel")));
        assert_eq!(completed, Some(3));

        // Propulsion resumes on the first decision after the sequence
        assert_eq!(seq.tick(Some(&s)), None);
        assert_eq!(label(seq.tick(Some(&s))), "blue_propel");
    }

    #[test]
    fn test_stop_cancels_at_waypoint_boundary() {
        let mut seq = sequencer(&[]);
        seq.set_propulsion(true);
        seq.submit(cmd(
            1,
            Command::RunSequence {
                sequence: SequenceName::RecoverLeft,
            },
        ));
        seq.submit(cmd(2, Command::ReportPositions));
        seq.tick(None);

        let replies = seq.submit(cmd(3, Command::Stop));
        assert_eq!(
            replies,
            vec![
                Reply::Cancelled { request: 1 },
                Reply::Cancelled { request: 2 },
                Reply::Done { request: 3 }
            ]
        );
        assert!(!seq.propulsion());
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.tick(None), None);
    }

    #[test]
    fn test_invalid_torque_ids_rejected() {
        let mut seq = sequencer(&[]);
        let replies = seq.submit(cmd(
            4,
            Command::SetTorque {
                ids: vec![1, 13],
                enabled: false,
            },
        ));
        assert!(matches!(replies.as_slice(), [Reply::Rejected { request: 4, .. }]));
        assert_eq!(seq.tick(None), None);
    }

    #[test]
    fn test_torque_and_report_steps() {
        let mut seq = sequencer(&[]);
        seq.submit(cmd(
            5,
            Command::SetTorque {
                ids: vec![],
                enabled: true,
            },
        ));
        seq.submit(cmd(6, Command::ReportPositions));

        match seq.tick(None) {
            Some(Step::Torque { request, ids, enabled }) => {
                assert_eq!(request, 5);
                assert_eq!(ids.len(), 12);
                assert!(enabled);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(seq.tick(None), Some(Step::ReportPositions { request: 6 }));
    }

    #[test]
    fn test_queue_limit() {
        let mut seq = sequencer(&[]);
        for id in 0..MAX_QUEUED_JOBS as u64 {
            seq.submit(cmd(id, Command::ReportPositions));
        }
        let replies = seq.submit(cmd(99, Command::ReportPositions));
        assert!(matches!(replies.as_slice(), [Reply::Rejected { request: 99, .. }]));
    }

    #[test]
    fn test_readback_keeps_missing_positions() {
        let mut seq = sequencer(&[]);
        let id1 = ActuatorId::new(1).unwrap();
        let id2 = ActuatorId::new(2).unwrap();
        seq.commit_readback(&Readback {
            positions: vec![(id1, 100)],
            missing: vec![id2],
        });
        assert_eq!(seq.current_pose().get(id1), 100);
        assert_eq!(seq.current_pose().get(id2), 2048);
    }

    #[test]
    fn test_query_orientation_reports_last_decision() {
        let mut seq = sequencer(&[]);
        let s = tilted(140.0);
        seq.tick(Some(&s));
        seq.tick(Some(&s));
        match seq.submit(cmd(8, Command::QueryOrientation)).as_slice() {
            [Reply::Orientation {
                request: 8,
                classification: Some(Classification::BlueUnder),
                propulsion: false,
                ..
            }] => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_seeded_tie_break_is_reproducible() {
        let mut a = RandomTieBreak::seeded(42);
        let mut b = RandomTieBreak::seeded(42);
        let picks_a: Vec<Side> = (0..16).map(|_| a.pick()).collect();
        let picks_b: Vec<Side> = (0..16).map(|_| b.pick()).collect();
        assert_eq!(picks_a, picks_b);
    }
}
