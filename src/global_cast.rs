//! Conversions between OpenCV containers and the crate's nalgebra/ndarray types.

use anyhow::{ensure, Result};
use nalgebra::*;
use opencv::core::{Mat, Vec2f, CV_32FC2, CV_64F};
use opencv::prelude::*;
use std::fmt::Display;

use crate::grid::FlowField;

/// 4x4 homogeneous transform.
#[derive(Debug, Clone, Default)]
pub struct Matrix4d(pub Matrix4<f64>);

impl Display for Matrix4d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&Mat> for Matrix4d {
    type Error = anyhow::Error;

    fn try_from(mat: &Mat) -> Result<Self> {
        ensure!(
            mat.rows() == 4 && mat.cols() == 4,
            "expected a 4x4 matrix, got {}x{}",
            mat.rows(),
            mat.cols()
        );
        let mut mat64 = Mat::default();
        mat.convert_to(&mut mat64, CV_64F, 1.0, 0.0)?;
        let mut matrix = Matrix4::<f64>::zeros();
        for i in 0..4 {
            for j in 0..4 {
                matrix[(i, j)] = *mat64.at_2d::<f64>(i as i32, j as i32)?;
            }
        }
        Ok(Matrix4d(matrix))
    }
}

impl TryFrom<Matrix4d> for Mat {
    type Error = opencv::Error;

    fn try_from(matrix: Matrix4d) -> opencv::Result<Mat> {
        let mut mat = Mat::zeros_nd(&[4, 4], CV_64F)?.to_mat()?;
        for i in 0..4 {
            for j in 0..4 {
                *mat.at_2d_mut::<f64>(i as i32, j as i32)? = matrix.0[(i, j)];
            }
        }
        Ok(mat)
    }
}

/// Rigid part of the homogeneous matrix; the rotation block is re-orthogonalized.
impl From<Matrix4d> for Isometry3<f64> {
    fn from(matrix: Matrix4d) -> Self {
        let rotation = Rotation3::from_matrix(&matrix.0.fixed_view::<3, 3>(0, 0).into_owned());
        let translation = Vector3::new(matrix.0[(0, 3)], matrix.0[(1, 3)], matrix.0[(2, 3)]);
        Isometry3::from_parts(
            Translation3::from(translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }
}

/// Dense `CV_32FC2` flow; non-finite vectors become unknown cells.
impl TryFrom<&Mat> for FlowField {
    type Error = anyhow::Error;

    fn try_from(mat: &Mat) -> Result<Self> {
        ensure!(mat.typ() == CV_32FC2, "flow must be CV_32FC2");
        let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
        let mut flow = FlowField::unknown(cols, rows);
        for v in 0..rows {
            for u in 0..cols {
                let d = mat.at_2d::<Vec2f>(v as i32, u as i32)?;
                if d[0].is_finite() && d[1].is_finite() {
                    flow.set(u, v, Some(Vector2::new(d[0], d[1])));
                }
            }
        }
        Ok(flow)
    }
}

#[test]
fn test_matrix_round_trip() {
    let pose = Isometry3::new(Vector3::new(1.0, -2.0, 0.5), Vector3::new(0.1, 0.2, -0.3));
    let mat: Mat = Matrix4d(pose.to_homogeneous()).try_into().unwrap();
    let matrix = Matrix4d::try_from(&mat).unwrap();
    let back: Isometry3<f64> = matrix.into();
    assert!((back.translation.vector - pose.translation.vector).norm() < 1e-12);
    assert!(back.rotation.angle_to(&pose.rotation) < 1e-9);
}

#[test]
fn test_mat_to_flow() {
    let mut mat = Mat::new_rows_cols_with_default(2, 3, CV_32FC2, opencv::core::Scalar::all(0.0)).unwrap();
    *mat.at_2d_mut::<Vec2f>(1, 2).unwrap() = Vec2f::from([1.5, -0.5]);
    *mat.at_2d_mut::<Vec2f>(0, 1).unwrap() = Vec2f::from([f32::NAN, 0.0]);
    let flow = FlowField::try_from(&mat).unwrap();
    assert_eq!(flow.width(), 3);
    assert_eq!(flow.height(), 2);
    assert_eq!(flow.get(2, 1), Some(Vector2::new(1.5, -0.5)));
    assert_eq!(flow.get(1, 0), None);
    assert_eq!(flow.get(0, 0), Some(Vector2::zeros()));
}
