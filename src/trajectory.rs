//! Ground-truth trajectory and its synchronization to capture times.

use nalgebra::{Isometry3, Translation3};

use crate::error::PipelineError;
use crate::geometry::Pose;
use crate::global_types::{PoseSample, Timestamp};

/// Sparse, strictly time-ordered pose samples. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct PoseTrajectory {
    samples: Vec<PoseSample>,
}

impl PoseTrajectory {
    pub fn new(samples: Vec<PoseSample>) -> Result<Self, PipelineError> {
        if samples.is_empty() {
            return Err(PipelineError::EmptyTrajectory);
        }
        if let Some(i) = samples
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(PipelineError::NonIncreasingTrajectory(i + 1));
        }
        Ok(Self { samples })
    }

    #[cfg(test)]
    pub fn samples(&self) -> &[PoseSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn cursor(&self) -> TrajectoryCursor<'_> {
        TrajectoryCursor {
            trajectory: self,
            next: 0,
            last_query: None,
        }
    }

    /// Poses at non-decreasing timestamps in one forward pass.
    pub fn synchronize(&self, timestamps: &[Timestamp]) -> Vec<Pose> {
        let mut cursor = self.cursor();
        timestamps.iter().map(|t| cursor.pose_at(*t)).collect()
    }
}

/// Forward-scanning interpolator.
///
/// Consecutive queries with non-decreasing timestamps cost O(n) in total.
/// A query earlier than the previous one restarts the scan.
#[derive(Debug)]
pub struct TrajectoryCursor<'a> {
    trajectory: &'a PoseTrajectory,
    /// first sample with timestamp >= the last query
    next: usize,
    last_query: Option<Timestamp>,
}

impl<'a> TrajectoryCursor<'a> {
    pub fn pose_at(&mut self, t: Timestamp) -> Pose {
        let samples = &self.trajectory.samples;
        if self.last_query.is_some_and(|last| t < last) {
            log::debug!("trajectory query went back in time, rescanning");
            self.next = 0;
        }
        self.last_query = Some(t);

        while self.next < samples.len() && samples[self.next].timestamp < t {
            self.next += 1;
        }

        if self.next == 0 {
            let first = &samples[0];
            if t < first.timestamp {
                log::warn!(
                    "timestamp {} before trajectory start {}, clamped",
                    t.0,
                    first.timestamp.0
                );
            }
            return first.pose;
        }
        if self.next == samples.len() {
            let last = &samples[samples.len() - 1];
            log::warn!(
                "timestamp {} after trajectory end {}, clamped",
                t.0,
                last.timestamp.0
            );
            return last.pose;
        }

        let s1 = &samples[self.next];
        if s1.timestamp == t {
            return s1.pose;
        }
        let s0 = &samples[self.next - 1];
        interpolate(s0, s1, t)
    }
}

/// Linear translation and shortest-arc SLERP rotation between two samples.
fn interpolate(s0: &PoseSample, s1: &PoseSample, t: Timestamp) -> Pose {
    let fraction = t.duration_since(&s0.timestamp) / s1.timestamp.duration_since(&s0.timestamp);
    let p0 = s0.pose.translation.vector;
    let p1 = s1.pose.translation.vector;
    let translation = p0 + (p1 - p0) * fraction;
    let rotation = s0
        .pose
        .rotation
        .try_slerp(&s1.pose.rotation, fraction, 1e-9)
        .unwrap_or(s0.pose.rotation);
    Isometry3::from_parts(Translation3::from(translation), rotation)
}
