use crate::config::DepthFilterConfig;
use crate::geometry::{relative, rotation_angle, translation_norm, Pose};

/// Later frames whose flow to `current` is fused into its seeds.
///
/// Frames closer than `nearby_distance` to `current` are skipped first so the
/// first neighbour has a usable baseline. From then on each neighbour is the
/// first frame that moved at least `nearby_distance` or rotated at least
/// `nearby_angle_deg` away from the previous neighbour. `poses` are world
/// poses of every frame.
pub fn select_nearby_frames(poses: &[Pose], current: usize, config: &DepthFilterConfig) -> Vec<usize> {
    let n = poses.len();
    let max_angle = config.nearby_angle_deg.to_radians();
    let close = |e: usize, s: usize| translation_norm(&relative(&poses[e], &poses[s])) < config.nearby_distance;
    let similar = |e: usize, s: usize| rotation_angle(&relative(&poses[e], &poses[s])) < max_angle;

    let mut nearby = Vec::with_capacity(config.nearby_frames);
    let (mut s, mut e) = (current, current);
    while e < n && close(e, s) {
        e += 1;
    }
    while nearby.len() < config.nearby_frames {
        e = e.max(s + 1);
        while e < n && close(e, s) && similar(e, s) {
            e += 1;
        }
        if e >= n {
            break;
        }
        nearby.push(e);
        s = e;
    }
    nearby
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Vector3};

    fn trajectory(n: usize, step: f64, yaw_deg: f64) -> Vec<Pose> {
        (0..n)
            .map(|i| {
                Isometry3::new(
                    Vector3::new(0.0, 0.0, step * i as f64),
                    Vector3::new(0.0, (yaw_deg * i as f64).to_radians(), 0.0),
                )
            })
            .collect()
    }

    #[test]
    fn spaced_by_distance() {
        let config = DepthFilterConfig::default();
        let poses = trajectory(20, 0.04, 0.0);
        assert_eq!(select_nearby_frames(&poses, 0, &config), vec![3, 6, 9, 12, 15]);
        assert_eq!(select_nearby_frames(&poses, 12, &config), vec![15, 18]);
        assert!(select_nearby_frames(&poses, 19, &config).is_empty());
    }

    #[test]
    fn rotation_shortens_spacing() {
        let config = DepthFilterConfig::default();
        let poses = trajectory(20, 0.04, 2.0);
        assert_eq!(select_nearby_frames(&poses, 0, &config), vec![3, 5, 7, 9, 11]);
    }

    #[test]
    fn pure_rotation_has_no_baseline() {
        let config = DepthFilterConfig::default();
        let poses = trajectory(10, 0.0, 2.0);
        assert!(select_nearby_frames(&poses, 0, &config).is_empty());
    }

    #[test]
    fn respects_frame_count() {
        let config = DepthFilterConfig {
            nearby_frames: 2,
            ..Default::default()
        };
        let poses = trajectory(20, 0.2, 0.0);
        assert_eq!(select_nearby_frames(&poses, 4, &config), vec![5, 6]);
    }
}
