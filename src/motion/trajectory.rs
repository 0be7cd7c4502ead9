// Linear sub-stepping between two full-body poses
//
// Large single jumps near the calibrated limits jerk the joints, so moves
// can be broken into a fixed number of evenly spaced intermediate poses.

use super::pose::{ActuatorId, NUM_ACTUATORS, Pose};

/// Default number of intermediate poses per smooth move
pub const DEFAULT_STEPS: usize = 17;

/// Lazy sequence of poses from `current` to `target`
///
/// Yields exactly `steps` poses; the last one is always `target` itself.
#[derive(Debug, Clone)]
pub struct Trajectory {
    start: Pose,
    target: Pose,
    deltas: [f64; NUM_ACTUATORS],
    steps: usize,
    emitted: usize,
}

impl Iterator for Trajectory {
    type Item = Pose;

    fn next(&mut self) -> Option<Pose> {
        if self.emitted >= self.steps {
            return None;
        }
        self.emitted += 1;

        if self.emitted == self.steps {
            return Some(self.target);
        }

        // Round the running offset rather than each increment so error never accumulates
        let k = self.emitted as f64;
        let mut pose = self.start;
        for (i, id) in ActuatorId::all().enumerate() {
            let offset = (self.deltas[i] * k).round() as i32;
            let tick = (self.start.get(id) as i32 + offset).max(0) as u16;
            pose.set(id, tick);
        }
        Some(pose)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.steps - self.emitted;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Trajectory {}

/// Interpolate from `current` to `target` in `steps` poses
///
/// A step count of zero is treated as a single direct move.
pub fn interpolate(target: Pose, current: Pose, steps: usize) -> Trajectory {
    let steps = steps.max(1);
    let mut deltas = [0.0f64; NUM_ACTUATORS];
    for (i, id) in ActuatorId::all().enumerate() {
        deltas[i] = (target.get(id) as f64 - current.get(id) as f64) / steps as f64;
    }

    Trajectory {
        start: current,
        target,
        deltas,
        steps,
        emitted: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::pose::id;

    #[test]
    fn test_ten_steps_to_one_hundred() {
        let current = Pose::uniform(0);
        let target = current.with(id(1), 100);

        let poses: Vec<Pose> = interpolate(target, current, 10).collect();
        assert_eq!(poses.len(), 10);
        for (k, pose) in poses.iter().enumerate() {
            assert_eq!(pose.get(id(1)), 10 * (k as u16 + 1));
            assert_eq!(pose.get(id(2)), 0, "untouched actuators stay put");
        }
        assert_eq!(*poses.last().unwrap(), target);
    }

    #[test]
    fn test_last_pose_is_exact_target() {
        let current = Pose::from_ticks([
            2045, 2053, 3049, 2054, 2035, 1014, 2044, 2047, 3071, 3051, 2043, 1056,
        ]);
        let target = Pose::from_ticks([
            2040, 1098, 3081, 2054, 2997, 1007, 2041, 2993, 1045, 3054, 1095, 3091,
        ]);
        for steps in [1, 2, 3, 7, 17, 100] {
            let poses: Vec<Pose> = interpolate(target, current, steps).collect();
            assert_eq!(poses.len(), steps);
            assert_eq!(*poses.last().unwrap(), target, "steps={}", steps);
        }
    }

    #[test]
    fn test_descending_moves_are_monotonic() {
        let current = Pose::uniform(3000);
        let target = Pose::uniform(1000);
        let mut last = 3000;
        for pose in interpolate(target, current, DEFAULT_STEPS) {
            let tick = pose.get(id(7));
            assert!(tick <= last);
            last = tick;
        }
        assert_eq!(last, 1000);
    }

    #[test]
    fn test_zero_steps_is_single_move() {
        let target = Pose::uniform(1234);
        let mut traj = interpolate(target, Pose::default(), 0);
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.next(), Some(target));
        assert_eq!(traj.next(), None);
    }
}
