//! Batch driver: depth for every frame, then the ground-truth flows.

use ndarray::Array2;

use crate::camera::{CameraTrait, PinholeCamera};
use crate::config::PipelineConfig;
use crate::dataset::DatasetTrait;
use crate::depth_filter::DepthFilter;
use crate::error::PipelineError;
use crate::flow::{BidirectionalFlow, FlowEstimator, ImageKey};
use crate::geometry::{compose, relative, translation_norm, Pose};
use crate::global_types::Timestamp;
use crate::grid::DepthMap;
use crate::rolling_shutter::{stereo_unrolling_flow, synthesize_rolling_shutter_flow, RowPoses, StereoOffset};
use crate::save::{ArtifactStore, FlowKind, FramePoseSave};
use crate::trajectory::TrajectoryCursor;

pub struct Pipeline<'a, D, E> {
    dataset: &'a D,
    config: &'a PipelineConfig,
    store: ArtifactStore,
    flows: BidirectionalFlow<E>,
    /// depth camera, with the configured pixel noise
    camera: PinholeCamera,
    /// secondary camera of the stereo variant
    camera1: Option<PinholeCamera>,
}

impl<'a, D, E> Pipeline<'a, D, E>
where
    D: DatasetTrait,
    E: FlowEstimator,
{
    pub fn new(dataset: &'a D, config: &'a PipelineConfig, store: ArtifactStore, estimator: E) -> anyhow::Result<Self> {
        let camera = dataset
            .camera(0)
            .ok_or_else(|| PipelineError::MissingArtifact("cam0/camera.yaml".into()))?
            .clone()
            .with_pixel_noise(config.depth_filter.pixel_noise);
        let camera1 = dataset.camera(1).cloned();
        if config.stereo && camera1.is_none() {
            return Err(PipelineError::MissingArtifact("cam1/camera.yaml".into()).into());
        }
        let (w, h) = camera.image_size();
        log::info!("cam0: {:?} {}x{}", camera.get_camera_type(), w, h);
        Ok(Self {
            dataset,
            config,
            store,
            flows: BidirectionalFlow::new(estimator, config.bi_flow_threshold, w, h),
            camera,
            camera1,
        })
    }

    /// World <- camera pose of every frame of a camera stream.
    pub fn camera_poses(&self, camera: usize) -> Vec<Pose> {
        let t_body_cam = match camera {
            0 => self.camera.parameters.t_body_cam,
            _ => self
                .camera1
                .as_ref()
                .map_or_else(Pose::identity, |c| c.parameters.t_body_cam),
        };
        self.dataset
            .trajectory()
            .synchronize(&self.dataset.timestamps(camera))
            .into_iter()
            .map(|t_w_body| compose(&t_w_body, &t_body_cam))
            .collect()
    }

    pub fn run(&mut self, depth: bool, flow: bool) -> anyhow::Result<()> {
        let poses = self.camera_poses(0);
        let timestamps = self.dataset.timestamps(0);
        if self.config.resume {
            self.check_saved_poses(&poses);
        }
        self.store.save_poses(&FramePoseSave::sequence(&timestamps, &poses))?;
        log::info!(
            "{} frames, artifacts in {}",
            poses.len(),
            self.store.root().display()
        );

        if depth {
            self.depth_stage(&poses)?;
        }
        if flow {
            self.flow_stage()?;
        }
        Ok(())
    }

    /// Warn when resumed artifacts were computed along another trajectory.
    fn check_saved_poses(&self, poses: &[Pose]) {
        let Ok(saved) = self.store.load_poses() else {
            return;
        };
        let moved = saved
            .iter()
            .filter(|s| {
                poses
                    .get(s.index)
                    .map_or(true, |p| translation_norm(&relative(&s.pose(), p)) > 1e-6)
            })
            .count();
        if moved > 0 || saved.len() != poses.len() {
            log::warn!(
                "{} of {} saved poses differ from the trajectory, resumed artifacts may be stale",
                moved,
                saved.len()
            );
        }
    }

    /// First frame to compute and the depth it inherits.
    fn resume_point(&self, frames: usize) -> anyhow::Result<(usize, DepthMap)> {
        let (w, h) = self.camera.image_size();
        let empty = DepthMap::unknown(w, h);
        if !self.config.resume {
            return Ok((0, empty));
        }
        let done = self.store.depth_prefix_len(frames);
        if done == 0 {
            return Ok((0, empty));
        }
        let previous = self.store.load_depth(done - 1)?;
        previous.ensure_same_size(&empty)?;
        log::info!("resuming depth at frame {}", done);
        Ok((done, previous))
    }

    pub fn depth_stage(&mut self, poses: &[Pose]) -> anyhow::Result<()> {
        let n = poses.len();
        let (start, mut previous) = self.resume_point(n)?;
        let filter = DepthFilter::new(&self.camera, poses, &self.config.depth_filter);
        for i in start..n {
            let (depth, stats) = filter.process_frame(previous, i, &mut self.flows)?;
            self.store.save_depth(i, &depth)?;
            log::info!(
                "depth {}/{}: {} reprojected, {} seeds, {} neighbours, {} updates, {} resolved, {} unknown",
                i + 1,
                n,
                stats.reprojected,
                stats.seeds,
                stats.neighbors,
                stats.updates,
                stats.resolved,
                depth.width() * depth.height() - depth.known_count()
            );
            previous = depth;
        }
        Ok(())
    }

    fn skip(&self, kind: FlowKind, frame: usize) -> bool {
        self.config.resume && self.store.has_flow(kind, frame)
    }

    pub fn flow_stage(&mut self) -> anyhow::Result<()> {
        let dataset = self.dataset;
        let frames0 = dataset.frames(0);
        let frames1 = dataset.frames(1);
        let (_, h) = self.camera.image_size();
        let mut cursor0 = dataset.trajectory().cursor();
        let mut cursor1 = dataset.trajectory().cursor();

        for (i, frame) in frames0.iter().enumerate() {
            let stereo = match (&self.camera1, frames1.get(i)) {
                (Some(camera1), Some(frame1)) if self.config.stereo => Some((camera1, frame1)),
                _ => None,
            };
            let need_gs = !self.skip(FlowKind::Gs2Rs, i);
            let need_stereo = stereo.is_some() && !(self.skip(FlowKind::Stereo, i) && self.skip(FlowKind::Unroll, i));
            if !need_gs && !need_stereo {
                continue;
            }
            let depth = self.store.load_depth(i)?;

            if need_gs {
                let rows = row_poses(
                    &mut cursor0,
                    frame.timestamp,
                    h,
                    self.config.line_delay_ns,
                    &self.camera.parameters.t_body_cam,
                );
                let flow = synthesize_rolling_shutter_flow(&depth, &self.camera, &rows, None);
                self.store.save_flow(FlowKind::Gs2Rs, i, &flow)?;
                log::info!("gs2rs flow {}: {} pixels", i, flow.known_count());
            }

            if let (true, Some((camera1, frame1))) = (need_stereo, stereo) {
                let lut = dataset.row_lut();
                let rows = lut.map_or(h, |lut| sensor_rows(lut).max(h));
                let mut rows1 = row_poses(
                    &mut cursor1,
                    frame1.timestamp,
                    rows,
                    self.config.line_delay_ns,
                    &self.camera.parameters.t_body_cam,
                );
                if let Some(lut) = lut {
                    rows1 = rows1.with_row_lut(lut.clone())?;
                }
                let offset = StereoOffset::between(&self.camera, camera1);
                let flow = synthesize_rolling_shutter_flow(&depth, &self.camera, &rows1, Some(&offset));
                self.store.save_flow(FlowKind::Stereo, i, &flow)?;

                let measured = self.flows.consistent_flow(ImageKey::cam0(i), ImageKey::cam1(i))?;
                let unroll = stereo_unrolling_flow(&measured, &depth, &self.camera, camera1)?;
                self.store.save_flow(FlowKind::Unroll, i, &unroll)?;
                log::info!(
                    "stereo flow {}: {} synthesized, {} unrolled pixels",
                    i,
                    flow.known_count(),
                    unroll.known_count()
                );
            }
        }
        Ok(())
    }
}

/// Camera pose of every sensor row, row `v` exposed at `t + v * line_delay_ns`.
fn row_poses(
    cursor: &mut TrajectoryCursor<'_>,
    t: Timestamp,
    rows: usize,
    line_delay_ns: i64,
    t_body_cam: &Pose,
) -> RowPoses {
    let poses: Vec<Pose> = (0..rows as i64)
        .map(|v| compose(&cursor.pose_at(t.offset_ns(v * line_delay_ns)), t_body_cam))
        .collect();
    RowPoses::from_world(&poses)
}

fn sensor_rows(lut: &Array2<u32>) -> usize {
    lut.iter().max().map_or(0, |&r| r as usize + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageRecord;
    use crate::geometry::invert;
    use crate::global_types::PoseSample;
    use crate::grid::FlowField;
    use crate::trajectory::PoseTrajectory;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Point2, Point3, Vector2};
    use std::path::PathBuf;

    const PLANE_Z: f64 = 5.0;
    const STEP_Z: f64 = 0.15;
    const SIZE: usize = 16;

    struct PlaneDataset {
        frames: Vec<ImageRecord>,
        camera: PinholeCamera,
        camera1: Option<PinholeCamera>,
        trajectory: PoseTrajectory,
    }

    impl PlaneDataset {
        fn new(frames: usize) -> Self {
            let records = (0..frames)
                .map(|i| ImageRecord {
                    timestamp: Timestamp(100 * i as i64),
                    path: PathBuf::from(format!("{}.png", i)),
                })
                .collect();
            let samples = (0..frames)
                .map(|i| {
                    PoseSample::new(
                        Timestamp(100 * i as i64),
                        Isometry3::translation(0.0, 0.0, STEP_Z * i as f64),
                    )
                })
                .collect();
            Self {
                frames: records,
                camera: PinholeCamera::from_intrinsics(SIZE, SIZE, 200.0, 200.0, 7.45, 7.5),
                camera1: None,
                trajectory: PoseTrajectory::new(samples).unwrap(),
            }
        }

        /// Rectified second camera `baseline` to the right of the first.
        fn with_stereo(mut self, baseline: f64) -> Self {
            let mut camera1 = self.camera.clone();
            camera1.parameters.ftx = -camera1.parameters.fx * baseline;
            self.camera1 = Some(camera1);
            self
        }
    }

    impl DatasetTrait for PlaneDataset {
        fn frames(&self, camera: usize) -> &[ImageRecord] {
            match (camera, &self.camera1) {
                (0, _) | (1, Some(_)) => &self.frames,
                _ => &[],
            }
        }
        fn camera(&self, camera: usize) -> Option<&PinholeCamera> {
            match camera {
                0 => Some(&self.camera),
                1 => self.camera1.as_ref(),
                _ => None,
            }
        }
        fn trajectory(&self) -> &PoseTrajectory {
            &self.trajectory
        }
        fn row_lut(&self) -> Option<&Array2<u32>> {
            None
        }
    }

    /// Exact flow between views of the plane `z = PLANE_Z`.
    struct PlaneFlow {
        camera: PinholeCamera,
        poses: Vec<Pose>,
        calls: usize,
        /// `ftx` of the second camera
        ftx: f64,
        /// when false, cam1 -> cam0 repeats the cam0 -> cam1 disparity
        stereo_consistent: bool,
    }

    impl PlaneFlow {
        fn new(dataset: &PlaneDataset, stereo_consistent: bool) -> Self {
            Self {
                camera: dataset.camera.clone(),
                poses: dataset.trajectory.samples().iter().map(|s| s.pose).collect(),
                calls: 0,
                ftx: dataset.camera1.as_ref().map_or(0.0, |c| c.parameters.ftx),
                stereo_consistent,
            }
        }
    }

    impl FlowEstimator for PlaneFlow {
        fn estimate_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField> {
            self.calls += 1;
            if from.camera != to.camera {
                let z = PLANE_Z - self.poses[from.frame].translation.vector.z;
                let mut d = (self.ftx / z) as f32;
                if from.camera == 1 && self.stereo_consistent {
                    d = -d;
                }
                return Ok(FlowField::par_from_fn(SIZE, SIZE, |_, _| Some(Vector2::new(d, 0.0))));
            }
            let t_w_a = self.poses[from.frame];
            let t_b_w = invert(&self.poses[to.frame]);
            let camera = &self.camera;
            Ok(FlowField::par_from_fn(SIZE, SIZE, |u, v| {
                let p = Point2::new(u as f64, v as f64);
                let dir = t_w_a.rotation * camera.ray(&p);
                let origin = t_w_a.translation.vector;
                let s = (PLANE_Z - origin.z) / dir.z;
                let x_w = Point3::from(origin + dir * s);
                let q = camera.project(&(t_b_w * x_w))?;
                Some(Vector2::new((q.x - p.x) as f32, (q.y - p.y) as f32))
            }))
        }
    }

    fn plane_pipeline<'a>(
        dataset: &'a PlaneDataset,
        config: &'a PipelineConfig,
        root: &std::path::Path,
    ) -> Pipeline<'a, PlaneDataset, PlaneFlow> {
        let estimator = PlaneFlow::new(dataset, true);
        Pipeline::new(dataset, config, ArtifactStore::new(root).unwrap(), estimator).unwrap()
    }

    #[test]
    fn frontal_plane_three_frames() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = PlaneDataset::new(3);
        let config = PipelineConfig::default();
        let mut pipeline = plane_pipeline(&dataset, &config, dir.path());
        pipeline.run(true, true).unwrap();

        let store = ArtifactStore::new(dir.path()).unwrap();
        let expected = PLANE_Z - 2.0 * STEP_Z;
        let depth = store.load_depth(2).unwrap();
        assert_eq!(depth.known_count(), SIZE * SIZE);
        for ((_, _), d) in depth.iter_known() {
            assert_relative_eq!(d, expected, max_relative = 0.01);
        }

        // no line delay: the correction is zero wherever depth is known
        let flow = store.load_flow(FlowKind::Gs2Rs, 2).unwrap();
        assert_eq!(flow.known_count(), SIZE * SIZE);
        for ((_, _), f) in flow.iter_known() {
            assert_relative_eq!(f, Vector2::zeros(), epsilon = 1e-4);
        }
        assert!(!store.has_flow(FlowKind::Stereo, 0));
        assert_eq!(store.load_poses().unwrap().len(), 3);
    }

    #[test]
    fn resume_continues_after_saved_depth() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = PlaneDataset::new(3);
        let config = PipelineConfig::default();
        plane_pipeline(&dataset, &config, dir.path()).run(true, false).unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let reference = store.load_depth(2).unwrap();
        std::fs::remove_file(store.depth_path(2)).unwrap();

        let config = PipelineConfig {
            resume: true,
            ..Default::default()
        };
        let mut pipeline = plane_pipeline(&dataset, &config, dir.path());
        pipeline.run(true, false).unwrap();
        // frame 2 has no later neighbours; it only reprojects frame 1
        assert_eq!(pipeline.flows.estimator().calls, 0);
        assert_eq!(store.load_depth(2).unwrap(), reference);
    }

    #[test]
    fn line_delay_produces_correction() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = PlaneDataset::new(3);
        let config = PipelineConfig {
            line_delay_ns: 5,
            ..Default::default()
        };
        plane_pipeline(&dataset, &config, dir.path()).run(true, true).unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let flow = store.load_flow(FlowKind::Gs2Rs, 1).unwrap();
        assert_eq!(flow.known_count(), SIZE * SIZE);
        // row 0 is the reference exposure
        assert_relative_eq!(flow.get(0, 0).unwrap(), Vector2::zeros(), epsilon = 1e-4);
        // later rows are exposed closer to the plane and shrink towards the centre
        let corner = flow.get(SIZE - 1, SIZE - 1).unwrap();
        assert!(corner.x > 0.1 && corner.y > 0.1);
    }

    #[test]
    fn stereo_requires_second_camera() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = PlaneDataset::new(2);
        let config = PipelineConfig {
            stereo: true,
            ..Default::default()
        };
        let estimator = PlaneFlow::new(&dataset, true);
        let err = Pipeline::new(&dataset, &config, ArtifactStore::new(dir.path()).unwrap(), estimator)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingArtifact(_))
        ));
    }

    #[test]
    fn stereo_unrolling_uses_consistent_flow() {
        let dataset = PlaneDataset::new(3).with_stereo(0.1);
        let config = PipelineConfig {
            stereo: true,
            ..Default::default()
        };

        let dir = tempfile::tempdir().unwrap();
        plane_pipeline(&dataset, &config, dir.path()).run(true, true).unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        assert!(store.load_flow(FlowKind::Stereo, 2).unwrap().known_count() > 0);
        // frame 2 sees a disparity of about -4.3 px, the first four columns leave cam1
        let unroll = store.load_flow(FlowKind::Unroll, 2).unwrap();
        assert_eq!(unroll.known_count(), (SIZE - 4) * SIZE);
        // no skew: the measured disparity is the global shutter one
        for ((_, _), f) in unroll.iter_known() {
            assert_relative_eq!(f, Vector2::zeros(), epsilon = 0.1);
        }

        // matches that fail the round trip never reach the unrolling flow
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let estimator = PlaneFlow::new(&dataset, false);
        Pipeline::new(&dataset, &config, store.clone(), estimator)
            .unwrap()
            .run(true, true)
            .unwrap();
        assert!(store.has_flow(FlowKind::Unroll, 2));
        assert_eq!(store.load_flow(FlowKind::Unroll, 2).unwrap().known_count(), 0);
    }
}
