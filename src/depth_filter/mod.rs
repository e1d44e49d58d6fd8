//! Recursive Bayesian depth estimation.
//!
//! Each frame inherits the depth of the previous frame by reprojection and
//! spawns a [Seed] for every pixel that stays unknown. Seeds are refined with
//! flow correspondences to a few later frames and resolved into the frame's
//! [DepthMap].

mod neighbors;
mod seed;

pub use neighbors::select_nearby_frames;
use seed::Seed;

use nalgebra::{Point2, Vector2};
use rayon::prelude::*;

use crate::camera::CameraTrait;
use crate::config::{DepthFilterConfig, DEFAULT_MIN_DEPTH};
use crate::flow::{BidirectionalFlow, FlowEstimator, ImageKey};
use crate::geometry::{back_project, relative, round_in_bounds, Pose};
use crate::grid::{DepthMap, FlowField};

/// Depth carried over from the previous frame.
#[derive(Debug)]
pub struct Reprojection {
    pub depth: DepthMap,
    /// smallest reprojected range, if anything landed in the image
    pub min_depth: Option<f64>,
}

/// Per-frame counters, logged by the pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub reprojected: usize,
    pub seeds: usize,
    pub neighbors: usize,
    pub updates: usize,
    pub resolved: usize,
}

pub struct DepthFilter<'a, C> {
    camera: &'a C,
    /// world <- camera pose of every frame
    poses: &'a [Pose],
    config: &'a DepthFilterConfig,
}

impl<'a, C> DepthFilter<'a, C>
where
    C: CameraTrait + Sync,
{
    pub fn new(camera: &'a C, poses: &'a [Pose], config: &'a DepthFilterConfig) -> Self {
        Self {
            camera,
            poses,
            config,
        }
    }

    /// `T_a_b` between two frames.
    #[inline]
    pub fn relative_pose(&self, a: usize, b: usize) -> Pose {
        relative(&self.poses[a], &self.poses[b])
    }

    /// Move every known depth of the previous frame into the current one.
    /// Colliding points keep the nearest range.
    pub fn reproject(&self, previous: &DepthMap, t_cur_prv: &Pose) -> Reprojection {
        let (w, h) = (previous.width(), previous.height());
        let known: Vec<_> = previous.iter_known().collect();
        let hits: Vec<((usize, usize), f64)> = known
            .par_iter()
            .filter_map(|&((u, v), d)| {
                let x = back_project(self.camera, &Point2::new(u as f64, v as f64), d, t_cur_prv);
                let q = self.camera.project(&x)?;
                let dst = round_in_bounds(&q, w, h)?;
                Some((dst, x.coords.norm()))
            })
            .collect();

        let mut depth = DepthMap::unknown(w, h);
        let mut min_depth: Option<f64> = None;
        for ((u, v), d) in hits {
            if depth.get(u, v).map_or(true, |old| d < old) {
                depth.set(u, v, Some(d));
            }
            min_depth = Some(min_depth.map_or(d, |m| m.min(d)));
        }
        Reprojection { depth, min_depth }
    }

    /// One seed per unknown pixel, row-major.
    pub fn spawn_seeds(&self, reprojection: &Reprojection) -> Vec<Seed> {
        let min_depth = reprojection.min_depth.unwrap_or(DEFAULT_MIN_DEPTH);
        let z_range = 1.0 / min_depth;
        let depth = &reprojection.depth;
        (0..depth.height())
            .flat_map(|v| (0..depth.width()).map(move |u| (u, v)))
            .filter(|&(u, v)| depth.get(u, v).is_none())
            .map(|(u, v)| Seed::new(u, v, self.config.prior_a, self.config.prior_b, z_range))
            .collect()
    }

    /// Fuse one neighbour's flow into every seed that has a correspondence.
    /// Returns the number of seeds updated.
    pub fn update_seeds(&self, seeds: &mut [Seed], flow: &FlowField, t_cur_fi: &Pose) -> usize {
        seeds
            .par_iter_mut()
            .map(|seed| {
                let Some(f) = flow.get(seed.u as usize, seed.v as usize) else {
                    return 0;
                };
                let matched = seed.pixel() + Vector2::new(f.x as f64, f.y as f64);
                seed.observe(self.camera, &matched, t_cur_fi) as usize
            })
            .sum()
    }

    /// Write `1 / mu` of every seed with an estimate.
    pub fn resolve(depth: &mut DepthMap, seeds: &[Seed]) -> usize {
        let mut resolved = 0;
        for seed in seeds {
            if let Some(d) = seed.depth() {
                depth.set(seed.u as usize, seed.v as usize, Some(d));
                resolved += 1;
            }
        }
        resolved
    }

    /// Depth of frame `current`, consuming the depth of `current - 1`.
    pub fn process_frame<E: FlowEstimator>(
        &self,
        previous: DepthMap,
        current: usize,
        flows: &mut BidirectionalFlow<E>,
    ) -> anyhow::Result<(DepthMap, FrameStats)> {
        let reprojection = if current > 0 {
            self.reproject(&previous, &self.relative_pose(current, current - 1))
        } else {
            Reprojection {
                depth: DepthMap::unknown(previous.width(), previous.height()),
                min_depth: None,
            }
        };
        drop(previous);

        let mut stats = FrameStats {
            reprojected: reprojection.depth.known_count(),
            ..Default::default()
        };
        let mut seeds = self.spawn_seeds(&reprojection);
        stats.seeds = seeds.len();

        let nearby = select_nearby_frames(self.poses, current, self.config);
        stats.neighbors = nearby.len();
        for fi in nearby {
            let flow = flows.consistent_flow(ImageKey::cam0(current), ImageKey::cam0(fi))?;
            let updated = self.update_seeds(&mut seeds, &flow, &self.relative_pose(current, fi));
            log::debug!("frame {} <- {}: {} seeds updated", current, fi, updated);
            stats.updates += updated;
        }

        let observed: Vec<f64> = seeds
            .iter()
            .filter(|s| s.observations > 0)
            .map(|s| s.inlier_ratio())
            .collect();
        if !observed.is_empty() {
            log::debug!(
                "frame {}: {} seeds observed, mean inlier ratio {:.3}",
                current,
                observed.len(),
                observed.iter().sum::<f64>() / observed.len() as f64
            );
        }

        let mut depth = reprojection.depth;
        stats.resolved = Self::resolve(&mut depth, &seeds);
        Ok((depth, stats))
    }
}
