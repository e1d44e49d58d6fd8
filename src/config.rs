//! Pipeline parameters.
//!
//! Constants hold the defaults; [PipelineConfig] can override any of them
//! from a JSON file.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Squared pixel distance accepted by the forward/backward flow check.
pub const BI_FLOW_THRESHOLD: f64 = 2.0;
/// Translation below which a frame is considered too close to triangulate.
pub const NEARBY_DISTANCE: f64 = 0.1;
/// Rotation (degrees) above which a frame is considered too different for flow.
pub const NEARBY_ANGLE_DEG: f64 = 3.0;
/// Maximum number of neighbour frames fused per frame.
pub const NEARBY_FRAMES: usize = 5;
/// Pixel noise used to derive the angular reprojection error.
pub const PIXEL_NOISE: f64 = 1.0;
/// Beta prior of a freshly spawned seed.
pub const SEED_PRIOR_A: f64 = 10.0;
pub const SEED_PRIOR_B: f64 = 10.0;
/// Minimum depth assumed when nothing could be reprojected.
pub const DEFAULT_MIN_DEPTH: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthFilterConfig {
    pub nearby_distance: f64,
    pub nearby_angle_deg: f64,
    pub nearby_frames: usize,
    pub pixel_noise: f64,
    pub prior_a: f64,
    pub prior_b: f64,
}

impl Default for DepthFilterConfig {
    fn default() -> Self {
        Self {
            nearby_distance: NEARBY_DISTANCE,
            nearby_angle_deg: NEARBY_ANGLE_DEG,
            nearby_frames: NEARBY_FRAMES,
            pixel_noise: PIXEL_NOISE,
            prior_a: SEED_PRIOR_A,
            prior_b: SEED_PRIOR_B,
        }
    }
}

/// DIS optical flow presets, mirrored from OpenCV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPreset {
    UltraFast,
    Fast,
    #[default]
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub depth_filter: DepthFilterConfig,
    /// Squared pixel tolerance of the bidirectional flow check.
    pub bi_flow_threshold: f64,
    /// Rolling shutter readout time of one sensor row.
    pub line_delay_ns: i64,
    /// Also produce the cam0 -> cam1 stereo unrolling flow.
    pub stereo: bool,
    pub flow_preset: FlowPreset,
    /// Reuse per-frame artifacts already on disk.
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth_filter: DepthFilterConfig::default(),
            bi_flow_threshold: BI_FLOW_THRESHOLD,
            line_delay_ns: 0,
            stereo: false,
            flow_preset: FlowPreset::default(),
            resume: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open config {}", path.display()))?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("malformed config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"line_delay_ns": 29000, "depth_filter": {"nearby_frames": 3}}"#)
                .unwrap();
        assert_eq!(config.line_delay_ns, 29000);
        assert_eq!(config.depth_filter.nearby_frames, 3);
        assert_eq!(config.depth_filter.nearby_distance, NEARBY_DISTANCE);
        assert_eq!(config.bi_flow_threshold, BI_FLOW_THRESHOLD);
        assert_eq!(config.flow_preset, FlowPreset::Medium);
        assert!(!config.stereo);
    }

    #[test]
    fn bundled_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/pipeline.json");
        let config = PipelineConfig::from_json(&path).unwrap();
        assert_eq!(config.line_delay_ns, 29470);
        assert_eq!(config.depth_filter.nearby_frames, NEARBY_FRAMES);
        assert!(PipelineConfig::from_json(Path::new("/nonexistent.json")).is_err());
    }
}
