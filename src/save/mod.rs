//! Per-frame artifacts on disk.
mod poses;

pub use poses::FramePoseSave;

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;
use crate::grid::{DepthMap, FlowField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// rolling shutter -> global shutter correction of the depth camera
    Gs2Rs,
    /// the same correction expressed in the secondary camera
    Stereo,
    /// unrolling of the measured cam0 -> cam1 flow
    Unroll,
}

impl FlowKind {
    fn dir(&self) -> &'static str {
        match self {
            FlowKind::Gs2Rs => "flows_gs2rs",
            FlowKind::Stereo => "flows_stereo",
            FlowKind::Unroll => "flows_unroll",
        }
    }
}

/// JSON artifacts keyed by frame index under one output root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    const DEPTH_DIR: &'static str = "depth";
    const POSES_FILE: &'static str = "poses.json";

    pub fn new(root: &Path) -> anyhow::Result<Self> {
        for dir in [
            Self::DEPTH_DIR,
            FlowKind::Gs2Rs.dir(),
            FlowKind::Stereo.dir(),
            FlowKind::Unroll.dir(),
        ] {
            let dir = root.join(dir);
            fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn depth_path(&self, frame: usize) -> PathBuf {
        self.root.join(Self::DEPTH_DIR).join(format!("{}.json", frame))
    }

    pub fn flow_path(&self, kind: FlowKind, frame: usize) -> PathBuf {
        self.root.join(kind.dir()).join(format!("{}.json", frame))
    }

    pub fn save_depth(&self, frame: usize, depth: &DepthMap) -> anyhow::Result<()> {
        write_json(&self.depth_path(frame), depth)
    }

    pub fn load_depth(&self, frame: usize) -> anyhow::Result<DepthMap> {
        read_json(&self.depth_path(frame))
    }

    pub fn has_depth(&self, frame: usize) -> bool {
        self.depth_path(frame).exists()
    }

    /// Number of leading frames whose depth is already on disk.
    pub fn depth_prefix_len(&self, frames: usize) -> usize {
        (0..frames).take_while(|&i| self.has_depth(i)).count()
    }

    pub fn save_flow(&self, kind: FlowKind, frame: usize, flow: &FlowField) -> anyhow::Result<()> {
        write_json(&self.flow_path(kind, frame), flow)
    }

    #[cfg(test)]
    pub fn load_flow(&self, kind: FlowKind, frame: usize) -> anyhow::Result<FlowField> {
        read_json(&self.flow_path(kind, frame))
    }

    pub fn has_flow(&self, kind: FlowKind, frame: usize) -> bool {
        self.flow_path(kind, frame).exists()
    }

    pub fn save_poses(&self, poses: &[FramePoseSave]) -> anyhow::Result<()> {
        write_json(&self.root.join(Self::POSES_FILE), poses)
    }

    pub fn load_poses(&self) -> anyhow::Result<Vec<FramePoseSave>> {
        read_json(&self.root.join(Self::POSES_FILE))
    }
}

/// Serialize next to `path`, then rename into place.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let file = fs::File::create(&tmp).with_context(|| format!("cannot create {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)
        .with_context(|| format!("cannot serialize {}", path.display()))?;
    writer.flush()?;
    fs::rename(&tmp, path).with_context(|| format!("cannot move {} into place", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Err(PipelineError::MissingArtifact(path.to_path_buf()).into());
    }
    let file = fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::malformed(path, e))?;
    Ok(value)
}
