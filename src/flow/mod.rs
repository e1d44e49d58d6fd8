//! Dense optical flow: the external estimator boundary and its consistency filter.

mod consistency;
mod dis;

pub use consistency::filter_flow;
pub use dis::DisFlowEstimator;

use crate::error::PipelineError;
use crate::grid::FlowField;

/// Identifies one image of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub camera: usize,
    pub frame: usize,
}

impl ImageKey {
    pub fn cam0(frame: usize) -> Self {
        Self { camera: 0, frame }
    }
    pub fn cam1(frame: usize) -> Self {
        Self { camera: 1, frame }
    }
}

/// Dense correspondence estimator, `estimate_flow(a, b)[p] = q - p`.
///
/// Return [PipelineError] for missing or unreadable images; any other error
/// is treated as a failed estimation.
pub trait FlowEstimator {
    fn estimate_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField>;
}

/// Runs the estimator in both directions and keeps consistent vectors only.
#[derive(Debug)]
pub struct BidirectionalFlow<E> {
    estimator: E,
    threshold: f64,
    width: usize,
    height: usize,
}

impl<E: FlowEstimator> BidirectionalFlow<E> {
    pub fn new(estimator: E, threshold: f64, width: usize, height: usize) -> Self {
        Self {
            estimator,
            threshold,
            width,
            height,
        }
    }

    #[cfg(test)]
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// One estimator call, degraded to unknown on failure.
    fn raw_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField> {
        self.degrade(from, to, |estimator| estimator.estimate_flow(from, to))
    }

    /// Consistency-filtered flow `from -> to`.
    ///
    /// A failed estimation yields an all-unknown field; only missing or
    /// malformed inputs are returned as errors.
    pub fn consistent_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField> {
        let forward = self.raw_flow(from, to)?;
        if forward.known_count() == 0 {
            return Ok(forward);
        }
        let backward = self.raw_flow(to, from)?;
        let flow = filter_flow(&forward, &backward, self.threshold)?;
        log::debug!(
            "flow {:?} -> {:?}: {} of {} pixels consistent",
            from,
            to,
            flow.known_count(),
            self.width * self.height
        );
        Ok(flow)
    }

    fn degrade<F>(&mut self, from: ImageKey, to: ImageKey, f: F) -> anyhow::Result<FlowField>
    where
        F: FnOnce(&mut E) -> anyhow::Result<FlowField>,
    {
        match f(&mut self.estimator) {
            Ok(flow) if flow.width() == self.width && flow.height() == self.height => Ok(flow),
            Ok(flow) => {
                log::warn!(
                    "flow {:?} -> {:?} has size {}x{}, expected {}x{}",
                    from,
                    to,
                    flow.width(),
                    flow.height(),
                    self.width,
                    self.height
                );
                Ok(FlowField::unknown(self.width, self.height))
            }
            Err(e) if e.downcast_ref::<PipelineError>().is_some() => Err(e),
            Err(e) => {
                log::warn!("flow {:?} -> {:?} failed: {:#}", from, to, e);
                Ok(FlowField::unknown(self.width, self.height))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    /// Every image is shifted one pixel right of the previous frame.
    struct Shift;

    impl FlowEstimator for Shift {
        fn estimate_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField> {
            let d = to.frame as f32 - from.frame as f32;
            Ok(FlowField::filled(6, 4, Vector2::new(d, 0.0)))
        }
    }

    struct Broken(bool);

    impl FlowEstimator for Broken {
        fn estimate_flow(&mut self, from: ImageKey, _to: ImageKey) -> anyhow::Result<FlowField> {
            if self.0 {
                Err(PipelineError::MissingArtifact(format!("{}.png", from.frame).into()).into())
            } else {
                anyhow::bail!("estimator diverged")
            }
        }
    }

    #[test]
    fn consistent_shift() {
        let mut flows = BidirectionalFlow::new(Shift, 2.0, 6, 4);
        let flow = flows.consistent_flow(ImageKey::cam0(0), ImageKey::cam0(2)).unwrap();
        // the two rightmost columns leave the image
        assert_eq!(flow.known_count(), 4 * 4);
        assert_eq!(flow.get(0, 0), Some(Vector2::new(2.0, 0.0)));
        assert_eq!(flow.get(4, 0), None);
    }

    #[test]
    fn failed_estimation_is_unknown() {
        let mut flows = BidirectionalFlow::new(Broken(false), 2.0, 6, 4);
        let flow = flows.consistent_flow(ImageKey::cam0(0), ImageKey::cam0(1)).unwrap();
        assert_eq!(flow.known_count(), 0);
        assert_eq!(flow.width(), 6);
    }

    #[test]
    fn missing_image_is_fatal() {
        let mut flows = BidirectionalFlow::new(Broken(true), 2.0, 6, 4);
        assert!(flows.consistent_flow(ImageKey::cam0(0), ImageKey::cam0(1)).is_err());
    }

    #[test]
    fn wrong_size_is_unknown() {
        let mut flows = BidirectionalFlow::new(Shift, 2.0, 8, 4);
        let flow = flows.raw_flow(ImageKey::cam0(0), ImageKey::cam1(0)).unwrap();
        assert_eq!(flow.known_count(), 0);
        assert_eq!(flow.width(), 8);
    }
}
