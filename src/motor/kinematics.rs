// Joint-space kinematic mapping for the four legs
// Converts a degree command for one leg joint into an absolute tick target,
// never past the joint's calibrated limit.

use crate::motion::pose::{MAX_TICK, Pose};

use super::calibration::{Axis, Calibration, Direction, Leg};

/// Motor resolution: 4096 steps per revolution
const STEPS_PER_REVOLUTION: f64 = 4096.0;

/// Convert a degree magnitude into a relative tick offset
pub fn degrees_to_ticks(degrees: f64) -> i32 {
    (degrees / 360.0 * STEPS_PER_REVOLUTION).round() as i32
}

/// Convert a tick offset back to degrees (telemetry only)
pub fn ticks_to_degrees(ticks: i32) -> f64 {
    ticks as f64 * 360.0 / STEPS_PER_REVOLUTION
}

/// Absolute tick for moving one joint `degrees` towards one of its limits
///
/// The move starts from the joint's entry in `current` and stops at the
/// limit in the direction of travel. Whether that means adding or
/// subtracting ticks depends on how the limit pair is ordered for this
/// physical joint. The result always lies within the calibrated range.
///
/// # Arguments
/// * `degrees` - Magnitude of the move; negative or NaN values are treated
///   as zero, huge or infinite ones run to the limit
pub fn target_for(
    calibration: &Calibration,
    leg: Leg,
    axis: Axis,
    direction: Direction,
    degrees: f64,
    current: &Pose,
) -> u16 {
    let joint = calibration.joint(leg, axis);
    let limits = joint.limits;
    // i64 so a saturated offset cannot overflow against the start position
    let diff = i64::from(degrees_to_ticks(degrees.max(0.0)));
    let position = i64::from(current.get(joint.id));

    // Heading towards `high` adds ticks only when the pair is ascending
    let towards_larger = match direction {
        Direction::TowardHigh => limits.ascending(),
        Direction::TowardLow => !limits.ascending(),
    };
    let moved = if towards_larger {
        position + diff
    } else {
        position - diff
    };

    moved
        .clamp(i64::from(limits.min()), i64::from(limits.max()))
        .clamp(0, i64::from(MAX_TICK)) as u16
}

/// Apply one joint move to a pose, returning the updated copy
pub fn step_joint(
    calibration: &Calibration,
    pose: Pose,
    leg: Leg,
    axis: Axis,
    direction: Direction,
    degrees: f64,
) -> Pose {
    let id = calibration.joint(leg, axis).id;
    pose.with(id, target_for(calibration, leg, axis, direction, degrees, &pose))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::pose::ActuatorId;

    fn pose_with(id: u8, tick: u16) -> Pose {
        Pose::default().with(ActuatorId::new(id).unwrap(), tick)
    }

    #[test]
    fn test_degree_conversion() {
        assert_eq!(degrees_to_ticks(0.0), 0);
        assert_eq!(degrees_to_ticks(360.0), 4096);
        assert_eq!(degrees_to_ticks(30.0), 341);
        assert_eq!(degrees_to_ticks(50.0), 569);
        assert_eq!(degrees_to_ticks(22.0), 250);
        assert!((ticks_to_degrees(4096) - 360.0).abs() < 1e-9);
    }

    #[test]
    fn test_ascending_joint_moves() {
        // Leg 3 roll: down 2051 -> up 3204
        let cal = Calibration::default();
        let current = pose_with(8, 2190);
        let up = target_for(&cal, Leg::Three, Axis::Roll, Direction::TowardHigh, 30.0, &current);
        assert_eq!(up, 2190 + 341);
        let down = target_for(&cal, Leg::Three, Axis::Roll, Direction::TowardLow, 30.0, &current);
        assert_eq!(down, 2051, "must stop at the down limit");
    }

    #[test]
    fn test_descending_joint_moves() {
        // Leg 4 roll: down 2044 -> up 957, so "up" subtracts ticks
        let cal = Calibration::default();
        let current = pose_with(11, 1864);
        let up = target_for(&cal, Leg::Four, Axis::Roll, Direction::TowardHigh, 30.0, &current);
        assert_eq!(up, 1864 - 341);
        let down = target_for(&cal, Leg::Four, Axis::Roll, Direction::TowardLow, 30.0, &current);
        assert_eq!(down, 2044);
        let far_up = target_for(&cal, Leg::Four, Axis::Roll, Direction::TowardHigh, 180.0, &current);
        assert_eq!(far_up, 957);
    }

    #[test]
    fn test_zero_degrees_keeps_position() {
        let cal = Calibration::default();
        let current = pose_with(10, 2429);
        for direction in [Direction::TowardLow, Direction::TowardHigh] {
            let tick = target_for(&cal, Leg::Four, Axis::Yaw, direction, 0.0, &current);
            assert_eq!(tick, 2429);
        }
    }

    #[test]
    fn test_output_always_within_calibrated_range() {
        let cal = Calibration::default();
        let starts = [0u16, 500, 1020, 2048, 3100, 4095];
        let degrees = [0.0, 1.0, 17.5, 45.0, 90.0, 360.0, 720.0, 1e10, f64::INFINITY, f64::NAN];
        for leg in Leg::ALL {
            for axis in [Axis::Roll, Axis::Yaw, Axis::Fold] {
                let joint = cal.joint(leg, axis);
                for &start in &starts {
                    let current = Pose::default().with(joint.id, start);
                    for &deg in &degrees {
                        for direction in [Direction::TowardLow, Direction::TowardHigh] {
                            let tick = target_for(&cal, leg, axis, direction, deg, &current);
                            assert!(
                                joint.limits.contains(tick),
                                "leg {:?} {:?} {:?} {} deg from {} gave {}",
                                leg,
                                axis,
                                direction,
                                deg,
                                start,
                                tick
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_huge_move_stops_at_limit() {
        // Leg 1 roll from the middle of its range
        let cal = Calibration::default();
        let joint = cal.joint(Leg::One, Axis::Roll);
        let current = Pose::default().with(joint.id, 2048);
        for degrees in [1e10, f64::INFINITY] {
            let up = target_for(&cal, Leg::One, Axis::Roll, Direction::TowardHigh, degrees, &current);
            assert_eq!(up, joint.limits.high);
            let down = target_for(&cal, Leg::One, Axis::Roll, Direction::TowardLow, degrees, &current);
            assert_eq!(down, joint.limits.low);
        }
    }

    #[test]
    fn test_step_joint_only_touches_one_actuator() {
        let cal = Calibration::default();
        let start = Pose::default();
        let moved = step_joint(&cal, start, Leg::Two, Axis::Yaw, Direction::TowardLow, 20.0);
        let yaw_id = cal.joint(Leg::Two, Axis::Yaw).id;
        for (id, tick) in moved.iter() {
            if id == yaw_id {
                assert_eq!(tick, 2048 - 228);
            } else {
                assert_eq!(tick, start.get(id));
            }
        }
    }
}
