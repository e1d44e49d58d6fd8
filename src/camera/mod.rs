mod pinhole_camera;
pub use pinhole_camera::{PinholeCamera, PinholeParameters};

use nalgebra::{Point2, Point3, Vector3};

/// Camera models that can be rectified to the pinhole case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    /// - Ideal projection, intrinsics only.
    /// - Every stream is rectified to this model before depth estimation.
    Pinhole,
}

/// Projection model of a rectified camera.
pub trait CameraTrait {
    /// Lift a pixel onto the z = 1 plane.
    fn lift_projective(&self, p: &Point2<f64>) -> Vector3<f64>;
    /// Project a point in the camera frame, `None` if it is not in front of the camera.
    fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>>;
    fn get_camera_type(&self) -> CameraType;
    fn image_size(&self) -> (usize, usize);
    /// Angle subtended by the assumed pixel noise.
    fn px_error_angle(&self) -> f64;

    /// Unit-norm viewing ray through a pixel.
    ///
    /// Scaling it by a range gives the 3D point, so depth maps store the
    /// distance along this ray.
    fn ray(&self, p: &Point2<f64>) -> Vector3<f64> {
        self.lift_projective(p).normalize()
    }
}

/// Camera parameters stored as OpenCV YAML.
pub trait CameraParametersTrait: Sized {
    const CAMERA_TYPE: &'static str;
    fn read_from_yaml(path: &std::path::Path) -> anyhow::Result<Self>;
    fn write_to_yaml(&self, path: &std::path::Path) -> anyhow::Result<()>;
}
