use std::path::Path;

use anyhow::Context;
use ndarray::Array2;

use super::{DatasetTrait, ImageRecord};
use crate::camera::PinholeCamera;
use crate::error::PipelineError;
use crate::geometry::pose_from_parts;
use crate::global_types::{PoseSample, Timestamp};
use crate::trajectory::PoseTrajectory;

#[derive(Debug)]
pub struct EuRoCDataset {
    pub cam0s: Vec<ImageRecord>,
    pub cam1s: Vec<ImageRecord>,
    pub cameras: [Option<PinholeCamera>; 2],
    pub trajectory: PoseTrajectory,
    pub row_lut: Option<Array2<u32>>,
}

/// `#timestamp [ns],px,py,pz,qw,qx,qy,qz`
type PoseRow = (i64, f64, f64, f64, f64, f64, f64, f64);

impl EuRoCDataset {
    const EUROC_CAM0_PATH: &'static str = "cam0";
    const EUROC_CAM1_PATH: &'static str = "cam1";
    const GT_POSE_FILE: &'static str = "gt_pose.csv";
    const CAMERA_FILE: &'static str = "camera.yaml";
    const ROW_LUT_FILE: &'static str = "row_lut.csv";

    fn csv_reader(path: &Path, has_headers: bool) -> anyhow::Result<csv::Reader<std::fs::File>> {
        if !path.exists() {
            return Err(PipelineError::MissingArtifact(path.to_path_buf()).into());
        }
        csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("cannot open {}", path.display()))
    }

    pub fn read_cam(path: &Path) -> anyhow::Result<Vec<ImageRecord>> {
        let csv_path = path.join("data.csv");
        let data_path = path.join("data");
        let mut reader = Self::csv_reader(&csv_path, true)?;
        reader
            .deserialize::<(i64, String)>()
            .enumerate()
            .map(|(line, record)| -> anyhow::Result<ImageRecord> {
                let (timestamp, name) = record
                    .map_err(|e| PipelineError::malformed(&csv_path, format!("record {}: {}", line, e)))?;
                Ok(ImageRecord {
                    timestamp: Timestamp(timestamp),
                    path: data_path.join(name),
                })
            })
            .collect()
    }

    pub fn read_trajectory(path: &Path) -> anyhow::Result<PoseTrajectory> {
        let mut reader = Self::csv_reader(path, true)?;
        let samples = reader
            .deserialize::<PoseRow>()
            .enumerate()
            .map(|(line, record)| -> anyhow::Result<PoseSample> {
                let (t, px, py, pz, qw, qx, qy, qz) = record
                    .map_err(|e| PipelineError::malformed(path, format!("record {}: {}", line, e)))?;
                Ok(PoseSample::new(
                    Timestamp(t),
                    pose_from_parts([px, py, pz], [qw, qx, qy, qz]),
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        PoseTrajectory::new(samples).with_context(|| format!("invalid trajectory {}", path.display()))
    }

    /// `h` lines of `w` comma separated sensor rows.
    pub fn read_row_lut(path: &Path) -> anyhow::Result<Array2<u32>> {
        let mut reader = Self::csv_reader(path, false)?;
        let mut values = Vec::new();
        let mut width = None;
        let mut height = 0;
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| PipelineError::malformed(path, format!("line {}: {}", line, e)))?;
            if *width.get_or_insert(record.len()) != record.len() {
                return Err(PipelineError::malformed(path, format!("line {} has {} columns", line, record.len())).into());
            }
            for field in record.iter() {
                let row = field
                    .parse::<u32>()
                    .map_err(|e| PipelineError::malformed(path, format!("line {}: {}", line, e)))?;
                values.push(row);
            }
            height += 1;
        }
        let width = width.ok_or_else(|| PipelineError::malformed(path, "empty row table"))?;
        Array2::from_shape_vec((height, width), values).map_err(|e| PipelineError::malformed(path, e).into())
    }

    fn read_camera(path: &Path) -> anyhow::Result<PinholeCamera> {
        PinholeCamera::new(&path.join(Self::CAMERA_FILE))
    }

    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let cam0_base_path = path.join(Self::EUROC_CAM0_PATH);
        let cam1_base_path = path.join(Self::EUROC_CAM1_PATH);
        // read cam0
        let cam0s = Self::read_cam(&cam0_base_path)?;
        let camera0 = Self::read_camera(&cam0_base_path)?;
        // read cam1
        let (cam1s, camera1, row_lut) = if cam1_base_path.is_dir() {
            let lut_path = cam1_base_path.join(Self::ROW_LUT_FILE);
            let row_lut = if lut_path.exists() {
                Some(Self::read_row_lut(&lut_path)?)
            } else {
                None
            };
            (
                Self::read_cam(&cam1_base_path)?,
                Some(Self::read_camera(&cam1_base_path)?),
                row_lut,
            )
        } else {
            (Vec::new(), None, None)
        };
        // read ground truth
        let trajectory = Self::read_trajectory(&path.join(Self::GT_POSE_FILE))?;
        log::info!(
            "dataset {}: {} cam0 frames, {} cam1 frames, {} poses",
            path.display(),
            cam0s.len(),
            cam1s.len(),
            trajectory.len()
        );
        Ok(Self {
            cam0s,
            cam1s,
            cameras: [Some(camera0), camera1],
            trajectory,
            row_lut,
        })
    }
}

impl DatasetTrait for EuRoCDataset {
    fn frames(&self, camera: usize) -> &[ImageRecord] {
        match camera {
            0 => &self.cam0s,
            1 => &self.cam1s,
            _ => &[],
        }
    }

    fn camera(&self, camera: usize) -> Option<&PinholeCamera> {
        self.cameras.get(camera).and_then(|c| c.as_ref())
    }

    fn trajectory(&self) -> &PoseTrajectory {
        &self.trajectory
    }

    fn row_lut(&self) -> Option<&Array2<u32>> {
        self.row_lut.as_ref()
    }
}
