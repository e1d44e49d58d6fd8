use serde::{Deserialize, Serialize};

use crate::geometry::{pose_from_parts, relative, Pose};
use crate::global_types::Timestamp;

/// Synchronised camera pose of one frame, as written to `poses.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePoseSave {
    pub index: usize,
    pub timestamp: i64,
    /// world <- camera
    pub translation: [f64; 3],
    pub rotation_wxyz: [f64; 4],
    /// previous camera <- this camera, absent for the first frame
    pub relative_to_previous: Option<([f64; 3], [f64; 4])>,
}

fn parts(pose: &Pose) -> ([f64; 3], [f64; 4]) {
    let t = pose.translation.vector;
    let q = pose.rotation.quaternion();
    ([t.x, t.y, t.z], [q.w, q.i, q.j, q.k])
}

impl FramePoseSave {
    pub fn new(index: usize, timestamp: Timestamp, t_w_cam: &Pose, previous: Option<&Pose>) -> Self {
        let (translation, rotation_wxyz) = parts(t_w_cam);
        Self {
            index,
            timestamp: timestamp.0,
            translation,
            rotation_wxyz,
            relative_to_previous: previous.map(|t_w_prev| parts(&relative(t_w_prev, t_w_cam))),
        }
    }

    /// Every frame of a sequence, relative poses chained to the predecessor.
    pub fn sequence(timestamps: &[Timestamp], poses: &[Pose]) -> Vec<Self> {
        timestamps
            .iter()
            .zip(poses)
            .enumerate()
            .map(|(i, (t, pose))| Self::new(i, *t, pose, i.checked_sub(1).map(|p| &poses[p])))
            .collect()
    }

    pub fn pose(&self) -> Pose {
        pose_from_parts(self.translation, self.rotation_wxyz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};

    #[test]
    fn sequence_chains_relative_poses() {
        let poses = vec![
            Isometry3::new(Vector3::new(0.0, 0.0, 1.0), Vector3::zeros()),
            Isometry3::new(Vector3::new(0.5, 0.0, 1.0), Vector3::new(0.0, 0.0, 0.1)),
        ];
        let saves = FramePoseSave::sequence(&[Timestamp(5), Timestamp(9)], &poses);
        assert_eq!(saves.len(), 2);
        assert!(saves[0].relative_to_previous.is_none());
        assert_eq!(saves[1].timestamp, 9);
        let (t, _) = saves[1].relative_to_previous.unwrap();
        assert_relative_eq!(t[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(saves[1].pose(), poses[1], epsilon = 1e-12);

        let text = serde_json::to_string(&saves[0]).unwrap();
        assert!(text.contains("\"rotation_wxyz\":[1.0,0.0,0.0,0.0]"));
    }
}
