use std::path::Path;

use anyhow::Context;
use nalgebra::{Point2, Point3, Vector3};
use opencv::core::{FileNodeTraitConst, FileStorageTrait, FileStorageTraitConst};

use super::{CameraParametersTrait, CameraTrait, CameraType};
use crate::config::PIXEL_NOISE;
use crate::error::PipelineError;
use crate::geometry::Pose;
use crate::global_cast::Matrix4d;

#[derive(Debug, Clone)]
pub struct PinholeParameters {
    pub camera_name: String,
    // size
    pub image_width: i32,
    pub image_height: i32,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// focal length times stereo baseline, P[0, 3] of the rectified projection
    pub ftx: f64,
    /// body (trajectory) frame <- camera frame
    pub t_body_cam: Pose,
}

impl Default for PinholeParameters {
    fn default() -> Self {
        Self {
            camera_name: String::new(),
            image_width: 0,
            image_height: 0,
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
            ftx: 0.0,
            t_body_cam: Pose::identity(),
        }
    }
}

fn optional_f64(node: &opencv::core::FileNode, key: &str) -> anyhow::Result<Option<f64>> {
    let value = node.get(key)?;
    if value.is_none()? {
        Ok(None)
    } else {
        Ok(Some(value.to_f64()?))
    }
}

fn required_f64(node: &opencv::core::FileNode, key: &str, path: &Path) -> anyhow::Result<f64> {
    optional_f64(node, key)?
        .ok_or_else(|| PipelineError::malformed(path, format!("missing {}", key)).into())
}

impl CameraParametersTrait for PinholeParameters {
    const CAMERA_TYPE: &'static str = "PINHOLE";

    fn read_from_yaml(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingArtifact(path.to_path_buf()).into());
        }
        let name = path
            .to_str()
            .ok_or_else(|| PipelineError::malformed(path, "path is not utf-8"))?;
        let fs = opencv::core::FileStorage::new(
            name,
            opencv::core::FileStorage_Mode::READ as i32,
            "utf-8",
        )
        .with_context(|| format!("cannot parse {}", path.display()))?;
        if !fs.is_opened()? {
            return Err(PipelineError::malformed(path, "not a FileStorage document").into());
        }

        let model_type = fs.get("model_type")?;
        if !model_type.is_none()? {
            let model_type = model_type.to_string()?;
            if model_type != Self::CAMERA_TYPE {
                return Err(PipelineError::malformed(
                    path,
                    format!("model type {} is not {}", model_type, Self::CAMERA_TYPE),
                )
                .into());
            }
        }
        let camera_name = fs.get("camera_name")?;
        let camera_name = if camera_name.is_none()? {
            String::new()
        } else {
            camera_name.to_string()?
        };
        // image
        let image_width = fs.get("image_width")?.to_i32()?;
        let image_height = fs.get("image_height")?.to_i32()?;
        if image_width <= 0 || image_height <= 0 {
            return Err(PipelineError::malformed(path, "image size must be positive").into());
        }
        // intrinsic
        let projection_parameters = fs.get("projection_parameters")?;
        if projection_parameters.is_none()? {
            return Err(PipelineError::malformed(path, "missing projection_parameters").into());
        }
        let fx = required_f64(&projection_parameters, "fx", path)?;
        let fy = required_f64(&projection_parameters, "fy", path)?;
        let cx = required_f64(&projection_parameters, "cx", path)?;
        let cy = required_f64(&projection_parameters, "cy", path)?;
        let ftx = optional_f64(&projection_parameters, "ftx")?.unwrap_or(0.0);
        if fx <= 0.0 || fy <= 0.0 {
            return Err(PipelineError::malformed(path, "focal length must be positive").into());
        }
        // extrinsic
        let t_body_cam = fs.get("T_body_cam")?;
        let t_body_cam = if t_body_cam.is_none()? {
            Pose::identity()
        } else {
            Matrix4d::try_from(&t_body_cam.mat()?)
                .map_err(|e| PipelineError::malformed(path, e))?
                .into()
        };

        Ok(Self {
            camera_name,
            image_width,
            image_height,
            fx,
            fy,
            cx,
            cy,
            ftx,
            t_body_cam,
        })
    }

    fn write_to_yaml(&self, path: &Path) -> anyhow::Result<()> {
        let name = path
            .to_str()
            .ok_or_else(|| PipelineError::malformed(path, "path is not utf-8"))?;
        let mut fs = opencv::core::FileStorage::new(
            name,
            opencv::core::FileStorage_Mode::WRITE as i32,
            "utf-8",
        )?;

        fs.write_str("model_type", Self::CAMERA_TYPE)?;
        fs.write_str("camera_name", &self.camera_name)?;
        fs.write_i32("image_width", self.image_width)?;
        fs.write_i32("image_height", self.image_height)?;

        fs.start_write_struct("projection_parameters", opencv::core::FileNode_MAP, "")?;
        fs.write_f64("fx", self.fx)?;
        fs.write_f64("fy", self.fy)?;
        fs.write_f64("cx", self.cx)?;
        fs.write_f64("cy", self.cy)?;
        fs.write_f64("ftx", self.ftx)?;
        fs.end_write_struct()?;

        let t_body_cam: opencv::core::Mat = Matrix4d(self.t_body_cam.to_homogeneous()).try_into()?;
        fs.write_mat("T_body_cam", &t_body_cam)?;
        fs.release()?;
        Ok(())
    }
}

/// Rectified pinhole camera plus the angular uncertainty of one pixel.
#[derive(Debug, Clone)]
pub struct PinholeCamera {
    pub parameters: PinholeParameters,
    /// Angle subtended by the pixel noise, used as triangulation error budget.
    pub px_error_angle: f64,
}

impl PinholeCamera {
    pub fn new(camera_file: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_parameters(PinholeParameters::read_from_yaml(
            camera_file,
        )?))
    }

    pub fn from_parameters(parameters: PinholeParameters) -> Self {
        let px_error_angle = Self::error_angle(PIXEL_NOISE, parameters.fx);
        Self {
            parameters,
            px_error_angle,
        }
    }

    #[cfg(test)]
    pub fn from_intrinsics(width: usize, height: usize, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::from_parameters(PinholeParameters {
            image_width: width as i32,
            image_height: height as i32,
            fx,
            fy,
            cx,
            cy,
            ..Default::default()
        })
    }

    pub fn with_pixel_noise(mut self, pixel_noise: f64) -> Self {
        self.px_error_angle = Self::error_angle(pixel_noise, self.parameters.fx);
        self
    }

    #[inline]
    fn error_angle(pixel_noise: f64, fx: f64) -> f64 {
        (pixel_noise / (2.0 * fx.abs())).atan() * 2.0
    }
}

impl CameraTrait for PinholeCamera {
    fn lift_projective(&self, p: &Point2<f64>) -> Vector3<f64> {
        let x = (p.x - self.parameters.cx) / self.parameters.fx;
        let y = (p.y - self.parameters.cy) / self.parameters.fy;
        Vector3::new(x, y, 1.0)
    }

    fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z.is_nan() || p.z <= 0.0 {
            return None;
        }
        let u = p.x / p.z * self.parameters.fx + self.parameters.cx;
        let v = p.y / p.z * self.parameters.fy + self.parameters.cy;
        Some(Point2::new(u, v))
    }

    fn px_error_angle(&self) -> f64 {
        self.px_error_angle
    }

    fn get_camera_type(&self) -> CameraType {
        CameraType::Pinhole
    }

    fn image_size(&self) -> (usize, usize) {
        (
            self.parameters.image_width as usize,
            self.parameters.image_height as usize,
        )
    }
}
