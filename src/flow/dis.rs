use std::collections::VecDeque;
use std::path::PathBuf;

use opencv::core::{Mat, Ptr};
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::video::DISOpticalFlow;

use super::{FlowEstimator, ImageKey};
use crate::config::FlowPreset;
use crate::error::PipelineError;
use crate::grid::FlowField;

/// Decoded images kept around; the current frame is paired with several neighbours.
const IMAGE_CACHE_SIZE: usize = 8;

/// Dense inverse-search optical flow from OpenCV on grayscale images.
pub struct DisFlowEstimator {
    /// image paths per camera, indexed by frame
    images: Vec<Vec<PathBuf>>,
    dis: Ptr<DISOpticalFlow>,
    cache: VecDeque<(ImageKey, Mat)>,
}

impl DisFlowEstimator {
    pub fn new(images: Vec<Vec<PathBuf>>, preset: FlowPreset) -> anyhow::Result<Self> {
        let preset = match preset {
            FlowPreset::UltraFast => opencv::video::DISOpticalFlow_PRESET_ULTRAFAST,
            FlowPreset::Fast => opencv::video::DISOpticalFlow_PRESET_FAST,
            FlowPreset::Medium => opencv::video::DISOpticalFlow_PRESET_MEDIUM,
        };
        Ok(Self {
            images,
            dis: DISOpticalFlow::create(preset)?,
            cache: VecDeque::with_capacity(IMAGE_CACHE_SIZE),
        })
    }

    fn image(&mut self, key: ImageKey) -> anyhow::Result<Mat> {
        if let Some((_, img)) = self.cache.iter().find(|(k, _)| *k == key) {
            return Ok(img.clone());
        }
        let path = self
            .images
            .get(key.camera)
            .and_then(|frames| frames.get(key.frame))
            .ok_or_else(|| {
                PipelineError::MissingArtifact(PathBuf::from(format!(
                    "cam{}/frame {}",
                    key.camera, key.frame
                )))
            })?;
        if !path.exists() {
            return Err(PipelineError::MissingArtifact(path.clone()).into());
        }
        let name = path
            .to_str()
            .ok_or_else(|| PipelineError::malformed(path, "path is not utf-8"))?;
        let img = imgcodecs::imread(name, imgcodecs::IMREAD_GRAYSCALE)?;
        if img.empty() {
            return Err(PipelineError::malformed(path, "cannot decode image").into());
        }

        if self.cache.len() == IMAGE_CACHE_SIZE {
            self.cache.pop_front();
        }
        self.cache.push_back((key, img.clone()));
        Ok(img)
    }
}

impl FlowEstimator for DisFlowEstimator {
    fn estimate_flow(&mut self, from: ImageKey, to: ImageKey) -> anyhow::Result<FlowField> {
        let img0 = self.image(from)?;
        let img1 = self.image(to)?;
        if img0.size()? != img1.size()? {
            anyhow::bail!("images {:?} and {:?} differ in size", from, to);
        }
        let mut flow = Mat::default();
        self.dis.calc(&img0, &img1, &mut flow)?;
        FlowField::try_from(&flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_a_pipeline_error() {
        let mut dis = DisFlowEstimator::new(
            vec![vec![PathBuf::from("/nonexistent/0.png")]],
            FlowPreset::UltraFast,
        )
        .unwrap();
        let err = dis
            .estimate_flow(ImageKey::cam0(0), ImageKey::cam0(1))
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }
}
