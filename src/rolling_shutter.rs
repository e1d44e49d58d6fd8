//! Ground-truth flow from a rolling-shutter image to its global-shutter equivalent.

use nalgebra::{Point2, Vector2};
use ndarray::Array2;
use rayon::prelude::*;

use crate::camera::{CameraTrait, PinholeCamera};
use crate::error::PipelineError;
use crate::geometry::{back_project, relative, round_in_bounds, Pose};
use crate::grid::{DepthMap, FlowField};

/// Pose of every sensor row relative to row 0 (`T_row0_rowv`).
#[derive(Debug, Clone)]
pub struct RowPoses {
    relative: Vec<Pose>,
    /// raw sensor row each rectified pixel was read out at
    row_lut: Option<Array2<u32>>,
}

impl RowPoses {
    /// From world poses of each row, `poses[0]` being the reference row.
    pub fn from_world(poses: &[Pose]) -> Self {
        let relative = match poses.first() {
            Some(t_w_row0) => poses.iter().map(|t_w_row| relative(t_w_row0, t_w_row)).collect(),
            None => Vec::new(),
        };
        Self {
            relative,
            row_lut: None,
        }
    }

    pub fn with_row_lut(mut self, lut: Array2<u32>) -> Result<Self, PipelineError> {
        if let Some(bad) = lut.iter().find(|&&r| r as usize >= self.relative.len()) {
            return Err(PipelineError::malformed(
                "row_lut",
                format!("row {} exceeds {} sensor rows", bad, self.relative.len()),
            ));
        }
        self.row_lut = Some(lut);
        Ok(self)
    }

    /// `T_row0_row` for the row pixel `(u, v)` was exposed at.
    pub fn pose_for_pixel(&self, u: usize, v: usize) -> Option<&Pose> {
        let row = match &self.row_lut {
            Some(lut) => *lut.get((v, u))? as usize,
            None => v,
        };
        self.relative.get(row)
    }
}

/// Horizontal shift into a second rectified camera: `cx_dst - cx_src + ftx / z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoOffset {
    pub cx_src: f64,
    pub cx_dst: f64,
    /// focal length times baseline of the destination camera
    pub ftx: f64,
}

impl StereoOffset {
    pub fn between(src: &PinholeCamera, dst: &PinholeCamera) -> Self {
        Self {
            cx_src: src.parameters.cx,
            cx_dst: dst.parameters.cx,
            ftx: dst.parameters.ftx,
        }
    }

    #[inline]
    pub fn shift(&self, z: f64) -> f64 {
        self.cx_dst - self.cx_src + self.ftx / z
    }
}

/// Rolling-shutter to global-shutter correction flow.
///
/// Every pixel with known range is lifted with the pose of its own row and
/// projected with the row-0 pose. The displacement back to the captured pixel
/// is written at the rounded row-0 location. With `stereo`, the row-0 location
/// is moved into the second camera first. Destinations hit twice keep the
/// pixel visited last in row-major order.
pub fn synthesize_rolling_shutter_flow<C: CameraTrait + Sync>(
    depth: &DepthMap,
    camera: &C,
    rows: &RowPoses,
    stereo: Option<&StereoOffset>,
) -> FlowField {
    let (w, h) = (depth.width(), depth.height());
    let known: Vec<_> = depth.iter_known().collect();
    let writes: Vec<((usize, usize), Vector2<f32>)> = known
        .par_iter()
        .filter_map(|&((u, v), d)| {
            let t_ref_row = rows.pose_for_pixel(u, v)?;
            let p = Point2::new(u as f64, v as f64);
            let x = back_project(camera, &p, d, t_ref_row);
            let mut gs = camera.project(&x)?;
            if let Some(stereo) = stereo {
                gs.x += stereo.shift(x.z);
            }
            let dst = round_in_bounds(&gs, w, h)?;
            Some((dst, Vector2::new((p.x - gs.x) as f32, (p.y - gs.y) as f32)))
        })
        .collect();

    let mut flow = FlowField::unknown(w, h);
    for ((u, v), f) in writes {
        flow.set(u, v, Some(f));
    }
    flow
}

/// Unrolling flow from a measured stereo correspondence.
///
/// `flow01` maps the global-shutter image of camera 0 into the rolling-shutter
/// image of camera 1. The global-shutter location in camera 1 follows from the
/// camera-0 depth; the displacement to the measured location is written there.
pub fn stereo_unrolling_flow(
    flow01: &FlowField,
    depth0: &DepthMap,
    cam0: &PinholeCamera,
    cam1: &PinholeCamera,
) -> Result<FlowField, PipelineError> {
    depth0.ensure_same_size(flow01)?;
    let (w, h) = (depth0.width(), depth0.height());
    let offset = StereoOffset::between(cam0, cam1);

    let known: Vec<_> = depth0.iter_known().collect();
    let writes: Vec<((usize, usize), Vector2<f32>)> = known
        .par_iter()
        .filter_map(|&((u0, v0), d)| {
            let z0 = cam0.ray(&Point2::new(u0 as f64, v0 as f64)).z * d;
            if z0 <= 0.0 {
                return None;
            }
            let u1_gs = u0 as f64 + offset.shift(z0);
            let (u1, _) = round_in_bounds(&Point2::new(u1_gs, v0 as f64), w, h)?;
            let f = flow01.get(u0, v0)?;
            let u1_rs = u0 as f64 + f.x as f64;
            let v1_rs = v0 as f64 + f.y as f64;
            Some(((u1, v0), Vector2::new((u1_rs - u1_gs) as f32, (v1_rs - v0 as f64) as f32)))
        })
        .collect();

    let mut flow = FlowField::unknown(w, h);
    for ((u, v), f) in writes {
        flow.set(u, v, Some(f));
    }
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};

    fn camera() -> PinholeCamera {
        PinholeCamera::from_intrinsics(24, 16, 30.0, 30.0, 11.5, 7.5)
    }

    #[test]
    fn no_skew_gives_zero_flow() {
        let camera = camera();
        let mut depth = DepthMap::filled(24, 16, 3.0);
        depth.set(4, 4, None);
        let rows = RowPoses::from_world(&vec![Isometry3::translation(1.0, 2.0, 3.0); 16]);
        let flow = synthesize_rolling_shutter_flow(&depth, &camera, &rows, None);
        assert_eq!(flow.get(4, 4), None);
        for ((_, _), f) in flow.iter_known() {
            assert_relative_eq!(f, Vector2::zeros(), epsilon = 1e-5);
        }
        assert_eq!(flow.known_count(), 24 * 16 - 1);
    }

    #[test]
    fn no_skew_stereo_gives_disparity() {
        let camera = camera();
        let mut dst = camera.clone();
        dst.parameters.cx = 12.0;
        dst.parameters.ftx = -3.0;
        let offset = StereoOffset::between(&camera, &dst);

        let depth = DepthMap::filled(24, 16, 4.0);
        let rows = RowPoses::from_world(&[Pose::identity(); 16]);
        let flow = synthesize_rolling_shutter_flow(&depth, &camera, &rows, Some(&offset));
        assert_eq!(flow.known_count(), 24 * 16);
        for v in 0..16 {
            for u in 0..24 {
                let z = camera.ray(&Point2::new(u as f64, v as f64)).z * 4.0;
                // shift stays within half a pixel, so every pixel lands on its own column
                let f = flow.get(u, v).unwrap();
                assert_relative_eq!(f.x as f64, -offset.shift(z), epsilon = 1e-4);
                assert_relative_eq!(f.y, 0.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn skewed_rows_move_pixels() {
        let camera = camera();
        let depth = DepthMap::filled(24, 16, 2.0);
        // camera slides along x while rows are read out
        let poses: Vec<Pose> = (0..16)
            .map(|v| Isometry3::translation(0.01 * v as f64, 0.0, 0.0))
            .collect();
        let rows = RowPoses::from_world(&poses);
        let flow = synthesize_rolling_shutter_flow(&depth, &camera, &rows, None);

        // row 0 is the reference
        assert_relative_eq!(flow.get(10, 0).unwrap(), Vector2::zeros(), epsilon = 1e-5);
        // row 10: point seen at (10, 10) sits 0.1 to the right of the reference camera
        let p = Point2::new(10.0, 10.0);
        let x = rows.pose_for_pixel(10, 10).unwrap() * nalgebra::Point3::from(camera.ray(&p) * 2.0);
        let gs = camera.project(&x).unwrap();
        let (du, dv) = round_in_bounds(&gs, 24, 16).unwrap();
        let f = flow.get(du, dv).unwrap();
        assert_relative_eq!(f.x as f64, p.x - gs.x, epsilon = 1e-4);
        assert!(f.x < 0.0);
    }

    #[test]
    fn row_lut_selects_pose() {
        let poses: Vec<Pose> = (0..4)
            .map(|v| Isometry3::new(Vector3::new(0.1 * v as f64, 0.0, 0.0), Vector3::zeros()))
            .collect();
        let lut = Array2::from_shape_fn((2, 3), |(v, u)| ((u + v) % 4) as u32);
        let rows = RowPoses::from_world(&poses).with_row_lut(lut).unwrap();
        assert_relative_eq!(rows.pose_for_pixel(2, 1).unwrap().translation.vector.x, 0.3, epsilon = 1e-12);
        assert!(rows.pose_for_pixel(3, 0).is_none());

        let bad = Array2::from_elem((2, 3), 4u32);
        assert!(RowPoses::from_world(&poses).with_row_lut(bad).is_err());
    }

    #[test]
    fn stereo_unrolling_from_measured_flow() {
        let cam0 = PinholeCamera::from_intrinsics(20, 10, 20.0, 20.0, 9.5, 4.5);
        let mut cam1 = cam0.clone();
        cam1.parameters.ftx = -8.0;
        let depth = DepthMap::filled(20, 10, 2.0);
        let mut flow01 = FlowField::unknown(20, 10);
        // centre pixel: z = 2, disparity -4, measured 0.5 px further and 0.25 px down
        flow01.set(10, 5, Some(Vector2::new(-3.5, 0.25)));

        let out = stereo_unrolling_flow(&flow01, &depth, &cam0, &cam1).unwrap();
        assert_eq!(out.known_count(), 1);
        let z = cam0.ray(&Point2::new(10.0, 5.0)).z * 2.0;
        let u1_gs = 10.0 - 8.0 / z;
        let (u1, _) = round_in_bounds(&Point2::new(u1_gs, 5.0), 20, 10).unwrap();
        let f = out.get(u1, 5).unwrap();
        assert_relative_eq!(f.x as f64, 10.0 - 3.5 - u1_gs, epsilon = 1e-5);
        assert_relative_eq!(f.y, 0.25);

        let small = FlowField::unknown(10, 10);
        assert!(stereo_unrolling_flow(&small, &depth, &cam0, &cam1).is_err());
    }
}
