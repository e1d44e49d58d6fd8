//! 数据集处理
//!
//! Rolling shutter sequences stored in EuRoC-style camera folders.
mod euroc;

use std::path::PathBuf;

use ndarray::Array2;

use crate::camera::PinholeCamera;
use crate::global_types::Timestamp;
use crate::trajectory::PoseTrajectory;

pub type DefaultDataset = euroc::EuRoCDataset;

/// One captured image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub timestamp: Timestamp,
    pub path: PathBuf,
}

pub trait DatasetTrait {
    /// 读取图像列表
    /// 返回时间戳和图像路径
    fn frames(&self, camera: usize) -> &[ImageRecord];
    /// Rectified calibration of a camera stream, `None` if absent.
    fn camera(&self, camera: usize) -> Option<&PinholeCamera>;
    /// Ground-truth body trajectory in the world frame.
    fn trajectory(&self) -> &PoseTrajectory;
    /// Raw sensor row of each rectified pixel of the secondary camera.
    fn row_lut(&self) -> Option<&Array2<u32>>;

    fn timestamps(&self, camera: usize) -> Vec<Timestamp> {
        self.frames(camera).iter().map(|f| f.timestamp).collect()
    }

    fn image_paths(&self) -> Vec<Vec<PathBuf>> {
        [0, 1]
            .iter()
            .map(|&c| self.frames(c).iter().map(|f| f.path.clone()).collect())
            .collect()
    }
}
