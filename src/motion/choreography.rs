// Named poses and waypoint sequences for walking and rolling
//
// Everything here is built once at startup from a base pose plus layered
// single-joint moves, then only read. Nothing is ever re-derived from the
// robot's live pose, so every run of a sequence commands the same ticks.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::pose::Pose;
use crate::motor::calibration::{Axis, Calibration, Direction, Leg};
use crate::motor::kinematics::step_joint;

/// Settle time after the last waypoint of a sequence
const FINAL_SETTLE: Duration = Duration::from_millis(100);

/// Which half of the shell a maneuver acts on
///
/// Yellow is legs 1 and 2, blue is legs 3 and 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yellow,
    Blue,
}

impl Side {
    pub fn legs(self) -> [Leg; 2] {
        match self {
            Side::Yellow => [Leg::One, Leg::Two],
            Side::Blue => [Leg::Three, Leg::Four],
        }
    }

    /// Roll-joint direction that folds this side's legs into the shell
    ///
    /// The blue legs are mounted mirrored and fold towards their down limit.
    pub fn fold_direction(self) -> Direction {
        match self {
            Side::Yellow => Direction::TowardHigh,
            Side::Blue => Direction::TowardLow,
        }
    }
}

/// Turning direction of the forward gait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    /// Order in which legs step; each leg starts from the previous leg's final pose
    pub fn leg_order(self) -> [Leg; 4] {
        match self {
            Turn::Right => [Leg::Four, Leg::Three, Leg::One, Leg::Two],
            Turn::Left => [Leg::Three, Leg::Four, Leg::Two, Leg::One],
        }
    }
}

/// How a waypoint is driven onto the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Motion {
    /// Write the target pose in one transaction
    Direct,
    /// Sub-step from the current pose (see `trajectory`)
    Smooth { steps: usize },
}

/// One pose dispatch inside a sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub label: String,
    pub pose: Pose,
    pub settle: Duration,
    pub motion: Motion,
}

impl Waypoint {
    pub fn new(label: impl Into<String>, pose: Pose, settle: Duration) -> Self {
        Self {
            label: label.into(),
            pose,
            settle,
            motion: Motion::Direct,
        }
    }

    pub fn smooth(mut self, steps: usize) -> Self {
        self.motion = Motion::Smooth { steps };
        self
    }
}

/// Lift and swing magnitudes for one leg pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stride {
    pub lift_degrees: f64,
    pub swing_degrees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitConfig {
    /// Legs 3 and 4
    pub front: Stride,
    /// Legs 1 and 2
    pub back: Stride,
    /// Yaw direction that swings each leg forward, indexed by leg number - 1
    pub forward_swing: [Direction; 4],
    pub settle_ms: u64,
}

impl GaitConfig {
    fn stride(&self, leg: Leg) -> Stride {
        match leg {
            Leg::One | Leg::Two => self.back,
            Leg::Three | Leg::Four => self.front,
        }
    }

    fn forward_swing(&self, leg: Leg) -> Direction {
        self.forward_swing[leg as usize - 1]
    }
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            front: Stride {
                lift_degrees: 30.0,
                swing_degrees: 10.0,
            },
            back: Stride {
                lift_degrees: 22.0,
                swing_degrees: 20.0,
            },
            forward_swing: [
                Direction::TowardHigh,
                Direction::TowardLow,
                Direction::TowardLow,
                Direction::TowardHigh,
            ],
            settle_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollConfig {
    /// Roll-joint travel that folds one side into the shell
    pub fold_degrees: f64,
    /// Smaller lift used for orientation-driven propel cycles
    pub propel_degrees: f64,
    /// Travel back out of the fold after the roll; `None` skips the down phase
    #[serde(default)]
    pub down_degrees: Option<f64>,
    /// Hold time on the propel pose before returning to the circle
    pub propel_hold_ms: u64,
    /// Settle after returning to the circle
    pub return_settle_ms: u64,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            fold_degrees: 50.0,
            propel_degrees: 30.0,
            down_degrees: None,
            propel_hold_ms: 700,
            return_settle_ms: 100,
        }
    }
}

/// Full-body poses recorded by hand on the physical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedPoses {
    pub home_stance: Pose,
    pub home_stance_thin: Pose,
    pub aligned_before_rolling: Pose,
    pub walk_to_circle: Pose,
    pub perfect_circle: Pose,
    pub circle_to_blue3_180: Pose,
    pub circle_to_both_blues_180: Pose,
    pub circle_to_yellow_up60: Pose,
    pub circle_to_yellow_up90: Pose,
    pub s_shape_30_out: Pose,
    pub s_shape_full_90_out: Pose,
    pub blue3_180: Pose,
}

impl Default for RecordedPoses {
    fn default() -> Self {
        let p = Pose::from_ticks;
        Self {
            home_stance: p([2745, 2187, 3062, 1343, 1890, 1025, 2752, 2190, 3072, 2429, 1864, 1050]),
            home_stance_thin: p([2207, 2325, 3053, 1818, 1789, 1020, 2226, 2299, 3070, 2833, 1786, 1049]),
            aligned_before_rolling: p([2045, 2053, 3049, 2054, 2035, 1014, 2044, 2047, 3071, 3051, 2043, 1056]),
            walk_to_circle: p([2045, 1637, 3059, 2052, 2435, 1017, 2045, 1983, 2726, 3051, 2085, 1396]),
            perfect_circle: p([2040, 1098, 3081, 2054, 2997, 1007, 2041, 2993, 1045, 3054, 1095, 3091]),
            circle_to_blue3_180: p([2047, 1041, 3089, 2050, 3043, 996, 2086, 2987, 3082, 3054, 1099, 3098]),
            circle_to_both_blues_180: p([2047, 974, 3096, 2049, 3088, 993, 2086, 2979, 3082, 3054, 1101, 1052]),
            circle_to_yellow_up60: p([2045, 1281, 3096, 2045, 2829, 989, 2103, 2987, 3062, 3053, 1100, 1052]),
            circle_to_yellow_up90: p([2046, 1631, 3097, 2042, 2485, 984, 2105, 2990, 3060, 3053, 1104, 1052]),
            s_shape_30_out: p([2023, 1458, 3088, 2059, 2640, 977, 2081, 2642, 1018, 3085, 1459, 3099]),
            s_shape_full_90_out: p([2023, 2140, 3071, 2091, 1958, 962, 2064, 2051, 1003, 3087, 2045, 3098]),
            blue3_180: p([2020, 2140, 3069, 2140, 1958, 946, 1997, 2051, 3070, 3097, 2043, 3081]),
        }
    }
}

/// Poses the host may request by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseName {
    HomeStance,
    HomeStanceThin,
    AlignedBeforeRolling,
    WalkToCircle,
    PerfectCircle,
    CircleToBlue3_180,
    #[serde(rename = "circle_to_both_blues_180")]
    CircleToBothBlues180,
    CircleToYellowUp60,
    CircleToYellowUp90,
    #[serde(rename = "s_shape_30_out")]
    SShape30Out,
    #[serde(rename = "s_shape_full_90_out")]
    SShapeFull90Out,
    Blue3_180,
    YellowFold,
    BlueFold,
    YellowPropel,
    BluePropel,
}

impl PoseName {
    pub fn as_str(self) -> &'static str {
        match self {
            PoseName::HomeStance => "home_stance",
            PoseName::HomeStanceThin => "home_stance_thin",
            PoseName::AlignedBeforeRolling => "aligned_before_rolling",
            PoseName::WalkToCircle => "walk_to_circle",
            PoseName::PerfectCircle => "perfect_circle",
            PoseName::CircleToBlue3_180 => "circle_to_blue3_180",
            PoseName::CircleToBothBlues180 => "circle_to_both_blues_180",
            PoseName::CircleToYellowUp60 => "circle_to_yellow_up60",
            PoseName::CircleToYellowUp90 => "circle_to_yellow_up90",
            PoseName::SShape30Out => "s_shape_30_out",
            PoseName::SShapeFull90Out => "s_shape_full_90_out",
            PoseName::Blue3_180 => "blue3_180",
            PoseName::YellowFold => "yellow_fold",
            PoseName::BlueFold => "blue_fold",
            PoseName::YellowPropel => "yellow_propel",
            PoseName::BluePropel => "blue_propel",
        }
    }
}

/// Multi-waypoint choreographies the host may request by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceName {
    Home,
    Circle,
    Align,
    WalkToCircle,
    CircleToWalk,
    RecoverLeft,
    RollYellow,
    RollBlue,
    RollForward,
    PropelYellow,
    PropelBlue,
    WalkRight,
    WalkLeft,
}

impl SequenceName {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceName::Home => "home",
            SequenceName::Circle => "circle",
            SequenceName::Align => "align",
            SequenceName::WalkToCircle => "walk_to_circle",
            SequenceName::CircleToWalk => "circle_to_walk",
            SequenceName::RecoverLeft => "recover_left",
            SequenceName::RollYellow => "roll_yellow",
            SequenceName::RollBlue => "roll_blue",
            SequenceName::RollForward => "roll_forward",
            SequenceName::PropelYellow => "propel_yellow",
            SequenceName::PropelBlue => "propel_blue",
            SequenceName::WalkRight => "walk_right",
            SequenceName::WalkLeft => "walk_left",
        }
    }
}

/// Read-only table of every named pose and sequence
#[derive(Debug, Clone)]
pub struct Choreography {
    recorded: RecordedPoses,
    fold: [Pose; 2],
    propel: [Pose; 2],
    down: Option<[Pose; 2]>,
    walk_right: Vec<Waypoint>,
    walk_left: Vec<Waypoint>,
    roll: RollConfig,
}

/// Collects the inputs for a [`Choreography`] and generates it once
pub struct ChoreographyBuilder {
    calibration: Calibration,
    recorded: RecordedPoses,
    gait: GaitConfig,
    roll: RollConfig,
}

impl ChoreographyBuilder {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            recorded: RecordedPoses::default(),
            gait: GaitConfig::default(),
            roll: RollConfig::default(),
        }
    }

    pub fn recorded(mut self, recorded: RecordedPoses) -> Self {
        self.recorded = recorded;
        self
    }

    pub fn gait(mut self, gait: GaitConfig) -> Self {
        self.gait = gait;
        self
    }

    pub fn roll(mut self, roll: RollConfig) -> Self {
        self.roll = roll;
        self
    }

    pub fn build(self) -> Choreography {
        let cal = &self.calibration;
        let circle = self.recorded.perfect_circle;

        info!("Generating rolling poses from perfect circle");
        let side_pose = |side: Side, direction: Direction, degrees: f64| {
            side.legs().iter().fold(circle, |pose, &leg| {
                step_joint(cal, pose, leg, Axis::Roll, direction, degrees)
            })
        };
        let fold = [Side::Yellow, Side::Blue]
            .map(|side| side_pose(side, side.fold_direction(), self.roll.fold_degrees));
        let propel = [Side::Yellow, Side::Blue]
            .map(|side| side_pose(side, side.fold_direction(), self.roll.propel_degrees));
        let down = self.roll.down_degrees.map(|degrees| {
            [Side::Yellow, Side::Blue]
                .map(|side| side_pose(side, side.fold_direction().reversed(), degrees))
        });

        info!("Generating walking gaits from home stance");
        let home = self.recorded.home_stance;
        let walk_right = generate_gait(cal, &self.gait, home, Turn::Right);
        let walk_left = generate_gait(cal, &self.gait, home, Turn::Left);

        Choreography {
            recorded: self.recorded,
            fold,
            propel,
            down,
            walk_right,
            walk_left,
            roll: self.roll,
        }
    }
}

/// Lift, swing and lower every leg in turn, chaining each leg off the last
pub fn generate_gait(cal: &Calibration, gait: &GaitConfig, base: Pose, turn: Turn) -> Vec<Waypoint> {
    let settle = Duration::from_millis(gait.settle_ms);
    let mut pose = base;
    let mut waypoints = Vec::with_capacity(12);

    for leg in turn.leg_order() {
        let stride = gait.stride(leg);
        let n = leg.number();

        pose = step_joint(cal, pose, leg, Axis::Roll, Direction::TowardHigh, stride.lift_degrees);
        waypoints.push(Waypoint::new(format!("leg{}_lift", n), pose, settle));

        pose = step_joint(cal, pose, leg, Axis::Yaw, gait.forward_swing(leg), stride.swing_degrees);
        waypoints.push(Waypoint::new(format!("leg{}_swing", n), pose, settle));

        pose = step_joint(cal, pose, leg, Axis::Roll, Direction::TowardLow, stride.lift_degrees);
        waypoints.push(Waypoint::new(format!("leg{}_lower", n), pose, settle));

        debug!("Gait {:?}: leg {} placed", turn, n);
    }
    waypoints
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Yellow => 0,
        Side::Blue => 1,
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

impl Choreography {
    pub fn builder(calibration: Calibration) -> ChoreographyBuilder {
        ChoreographyBuilder::new(calibration)
    }

    pub fn pose(&self, name: PoseName) -> Pose {
        let r = &self.recorded;
        match name {
            PoseName::HomeStance => r.home_stance,
            PoseName::HomeStanceThin => r.home_stance_thin,
            PoseName::AlignedBeforeRolling => r.aligned_before_rolling,
            PoseName::WalkToCircle => r.walk_to_circle,
            PoseName::PerfectCircle => r.perfect_circle,
            PoseName::CircleToBlue3_180 => r.circle_to_blue3_180,
            PoseName::CircleToBothBlues180 => r.circle_to_both_blues_180,
            PoseName::CircleToYellowUp60 => r.circle_to_yellow_up60,
            PoseName::CircleToYellowUp90 => r.circle_to_yellow_up90,
            PoseName::SShape30Out => r.s_shape_30_out,
            PoseName::SShapeFull90Out => r.s_shape_full_90_out,
            PoseName::Blue3_180 => r.blue3_180,
            PoseName::YellowFold => self.fold_pose(Side::Yellow),
            PoseName::BlueFold => self.fold_pose(Side::Blue),
            PoseName::YellowPropel => self.propel_pose(Side::Yellow),
            PoseName::BluePropel => self.propel_pose(Side::Blue),
        }
    }

    pub fn fold_pose(&self, side: Side) -> Pose {
        self.fold[side_index(side)]
    }

    pub fn propel_pose(&self, side: Side) -> Pose {
        self.propel[side_index(side)]
    }

    /// Down-phase pose, if the down phase is enabled
    pub fn down_pose(&self, side: Side) -> Option<Pose> {
        self.down.map(|poses| poses[side_index(side)])
    }

    /// Push the grounded side: propel pose, hold, back to the circle
    pub fn propel_cycle(&self, side: Side) -> Vec<Waypoint> {
        vec![
            Waypoint::new(
                format!("{:?}_propel", side).to_lowercase(),
                self.propel_pose(side),
                ms(self.roll.propel_hold_ms),
            ),
            Waypoint::new(
                "perfect_circle",
                self.recorded.perfect_circle,
                ms(self.roll.return_settle_ms),
            ),
        ]
    }

    fn roll_side(&self, side: Side) -> Vec<Waypoint> {
        let circle = self.recorded.perfect_circle;
        let name = format!("{:?}", side).to_lowercase();
        let mut waypoints = vec![
            Waypoint::new("perfect_circle", circle, FINAL_SETTLE),
            Waypoint::new(format!("{}_fold", name), self.fold_pose(side), ms(300)),
        ];
        if let Some(down) = self.down_pose(side) {
            waypoints.push(Waypoint::new(format!("{}_down", name), down, ms(300)));
        }
        waypoints.push(Waypoint::new("perfect_circle", circle, ms(100)));
        waypoints
    }

    pub fn sequence(&self, name: SequenceName) -> Vec<Waypoint> {
        let r = &self.recorded;
        let circle = || Waypoint::new("perfect_circle", r.perfect_circle, FINAL_SETTLE);
        match name {
            SequenceName::Home => vec![Waypoint::new("home_stance", r.home_stance, FINAL_SETTLE)],
            SequenceName::Circle => vec![circle()],
            SequenceName::Align => vec![Waypoint::new(
                "aligned_before_rolling",
                r.aligned_before_rolling,
                FINAL_SETTLE,
            )],
            SequenceName::WalkToCircle => vec![
                Waypoint::new("aligned_before_rolling", r.aligned_before_rolling, ms(500)),
                Waypoint::new("walk_to_circle", r.walk_to_circle, ms(300)),
                circle(),
            ],
            SequenceName::CircleToWalk => vec![
                Waypoint::new("perfect_circle", r.perfect_circle, ms(700)),
                Waypoint::new("circle_to_blue3_180", r.circle_to_blue3_180, ms(1000)),
                Waypoint::new("circle_to_both_blues_180", r.circle_to_both_blues_180, ms(1000)),
                Waypoint::new("circle_to_yellow_up60", r.circle_to_yellow_up60, ms(1000)),
                Waypoint::new("circle_to_yellow_up90", r.circle_to_yellow_up90, ms(1000)),
                Waypoint::new("aligned_before_rolling", r.aligned_before_rolling, ms(1000)),
                Waypoint::new("home_stance_thin", r.home_stance_thin, ms(1000)),
                Waypoint::new("home_stance", r.home_stance, FINAL_SETTLE),
            ],
            SequenceName::RecoverLeft => vec![
                Waypoint::new("perfect_circle", r.perfect_circle, ms(500)),
                Waypoint::new("s_shape_30_out", r.s_shape_30_out, ms(500)),
                Waypoint::new("s_shape_full_90_out", r.s_shape_full_90_out, ms(500)),
                Waypoint::new("blue3_180", r.blue3_180, FINAL_SETTLE),
            ],
            SequenceName::RollYellow => self.roll_side(Side::Yellow),
            SequenceName::RollBlue => self.roll_side(Side::Blue),
            SequenceName::RollForward => vec![
                Waypoint::new("yellow_fold", self.fold_pose(Side::Yellow), ms(300)),
                Waypoint::new("perfect_circle", r.perfect_circle, ms(300)),
                Waypoint::new("blue_fold", self.fold_pose(Side::Blue), ms(300)),
                Waypoint::new("perfect_circle", r.perfect_circle, ms(300)),
            ],
            SequenceName::PropelYellow | SequenceName::PropelBlue => {
                let side = if name == SequenceName::PropelYellow {
                    Side::Yellow
                } else {
                    Side::Blue
                };
                let mut waypoints = vec![circle()];
                waypoints.extend(self.propel_cycle(side).into_iter().map(|mut w| {
                    w.settle = ms(self.roll.propel_hold_ms);
                    w
                }));
                waypoints
            }
            SequenceName::WalkRight => self.walk_right.clone(),
            SequenceName::WalkLeft => self.walk_left.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::pose::id;

    fn choreography() -> Choreography {
        Choreography::builder(Calibration::default()).build()
    }

    fn labels(waypoints: &[Waypoint]) -> Vec<&str> {
        waypoints.iter().map(|w| w.label.as_str()).collect()
    }

    #[test]
    fn test_turn_right_leg_order() {
        let c = choreography();
        let walk = c.sequence(SequenceName::WalkRight);
        assert_eq!(
            labels(&walk),
            vec![
                "leg4_lift", "leg4_swing", "leg4_lower",
                "leg3_lift", "leg3_swing", "leg3_lower",
                "leg1_lift", "leg1_swing", "leg1_lower",
                "leg2_lift", "leg2_swing", "leg2_lower",
            ]
        );
    }

    #[test]
    fn test_turn_left_leg_order() {
        let c = choreography();
        let walk = c.sequence(SequenceName::WalkLeft);
        let legs: Vec<&str> = walk.iter().step_by(3).map(|w| &w.label[..4]).collect();
        assert_eq!(legs, vec!["leg3", "leg4", "leg2", "leg1"]);
    }

    #[test]
    fn test_turn_right_chains_from_previous_leg() {
        let c = choreography();
        let home = RecordedPoses::default().home_stance;
        let walk = c.sequence(SequenceName::WalkRight);

        // Leg 4 (roll 11, yaw 10): up subtracts ticks on this unit
        assert_eq!(walk[0].pose.get(id(11)), 1864 - 341);
        assert_eq!(walk[1].pose.get(id(10)), 2429 + 114);
        assert_eq!(walk[2].pose.get(id(11)), 1864);

        // Leg 3's lift keeps leg 4's swung yaw rather than the home value
        let leg4_done = walk[2].pose;
        let leg3_lift = walk[3].pose;
        assert_eq!(leg3_lift.get(id(10)), leg4_done.get(id(10)));
        assert_ne!(leg3_lift.get(id(10)), home.get(id(10)));
        assert_eq!(leg3_lift.get(id(8)), 2190 + 341);
        for (actuator, tick) in leg3_lift.iter() {
            if actuator != id(8) {
                assert_eq!(tick, leg4_done.get(actuator), "actuator {}", actuator);
            }
        }
    }

    #[test]
    fn test_fold_and_propel_poses() {
        let c = choreography();
        let circle = RecordedPoses::default().perfect_circle;

        let yellow = c.pose(PoseName::YellowFold);
        assert_eq!(yellow.get(id(2)), 1098 + 569);
        assert_eq!(yellow.get(id(5)), 2997 - 569);
        assert_eq!(yellow.get(id(8)), circle.get(id(8)));

        let blue = c.pose(PoseName::BluePropel);
        assert_eq!(blue.get(id(11)), 1095 + 341);
        assert_eq!(blue.get(id(8)), 2993 - 341);
        assert_eq!(blue.get(id(2)), circle.get(id(2)));
    }

    #[test]
    fn test_propel_cycle_shape() {
        let c = choreography();
        let cycle = c.propel_cycle(Side::Yellow);
        assert_eq!(cycle.len(), 2);
        assert_eq!(cycle[0].pose, c.pose(PoseName::YellowPropel));
        assert_eq!(cycle[0].settle, Duration::from_millis(700));
        assert_eq!(cycle[1].pose, c.pose(PoseName::PerfectCircle));
    }

    #[test]
    fn test_down_phase_is_optional() {
        let c = choreography();
        assert!(c.down_pose(Side::Blue).is_none());
        assert_eq!(c.sequence(SequenceName::RollBlue).len(), 3);

        let roll = RollConfig {
            down_degrees: Some(20.0),
            ..RollConfig::default()
        };
        let c = Choreography::builder(Calibration::default()).roll(roll).build();
        let seq = c.sequence(SequenceName::RollBlue);
        assert_eq!(labels(&seq), vec!["perfect_circle", "blue_fold", "blue_down", "perfect_circle"]);
    }

    #[test]
    fn test_circle_to_walk_ends_at_home() {
        let c = choreography();
        let seq = c.sequence(SequenceName::CircleToWalk);
        assert_eq!(seq.len(), 8);
        assert_eq!(seq.last().unwrap().pose, c.pose(PoseName::HomeStance));
        assert!(seq.iter().all(|w| w.settle >= Duration::from_millis(100)));
    }
}
