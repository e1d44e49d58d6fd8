//! Rigid transforms and back-projection through the camera model.

use nalgebra::{Isometry3, Point2, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

use crate::camera::CameraTrait;

/// Rigid transform. `T_a_b` maps points expressed in frame `b` into frame `a`.
pub type Pose = Isometry3<f64>;

/// Build a pose from a translation and a `(w, x, y, z)` quaternion.
pub fn pose_from_parts(translation: [f64; 3], wxyz: [f64; 4]) -> Pose {
    let [w, x, y, z] = wxyz;
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
    Isometry3::from_parts(Translation3::from(Vector3::from(translation)), rotation)
}

/// `T_a_b * T_b_c = T_a_c`
#[inline]
pub fn compose(t_a_b: &Pose, t_b_c: &Pose) -> Pose {
    t_a_b * t_b_c
}

#[inline]
pub fn invert(t_a_b: &Pose) -> Pose {
    t_a_b.inverse()
}

/// Relative transform `T_a_b` from two world poses `T_w_a` and `T_w_b`.
#[inline]
pub fn relative(t_w_a: &Pose, t_w_b: &Pose) -> Pose {
    compose(&invert(t_w_a), t_w_b)
}

/// Rotation angle in radians.
#[inline]
pub fn rotation_angle(pose: &Pose) -> f64 {
    pose.rotation.angle()
}

#[inline]
pub fn translation_norm(pose: &Pose) -> f64 {
    pose.translation.vector.norm()
}

/// Point seen at `pixel` with range `depth` in camera `a`, transformed into frame `b`.
#[inline]
pub fn back_project<C: CameraTrait>(camera: &C, pixel: &Point2<f64>, depth: f64, t_b_a: &Pose) -> Point3<f64> {
    t_b_a * Point3::from(camera.ray(pixel) * depth)
}

/// Nearest integer pixel, `None` outside a `width x height` image.
#[inline]
pub fn round_in_bounds(pixel: &Point2<f64>, width: usize, height: usize) -> Option<(usize, usize)> {
    let u = (pixel.x + 0.5).floor();
    let v = (pixel.y + 0.5).floor();
    if u >= 0.0 && v >= 0.0 && u < width as f64 && v < height as f64 {
        Some((u as usize, v as usize))
    } else {
        None
    }
}
