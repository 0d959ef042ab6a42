//! Run settings: a JSON file plus command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::fluid::FluidDesc;
use crate::grid::GridExtent;
use crate::pipelines::RenderFormats;

pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluidSettings {
    pub grid_size: [u32; 3],
    /// Zero disables particle mode.
    pub num_particles: u32,
    pub frames_in_flight: u32,
    pub viewport: [u32; 2],
    pub seed: Option<u64>,
    /// Load kernels from here instead of the embedded copies.
    pub kernel_dir: Option<PathBuf>,
    /// Frames the headless driver runs.
    pub frames: u32,
    /// Elapsed seconds the driver reports each frame.
    pub frame_time: f32,
    /// Where the driver writes the final frame as PNG.
    pub snapshot: Option<PathBuf>,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            grid_size: [128, 128, 1],
            num_particles: 0,
            frames_in_flight: 3,
            viewport: [1280, 720],
            seed: None,
            kernel_dir: None,
            frames: 120,
            frame_time: 1.0 / 60.0,
            snapshot: None,
        }
    }
}

impl FluidSettings {
    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = serde_json::from_str(&data)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Settings from `-settings <path>` (or defaults) with the remaining
    /// flags applied on top.
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let mut settings = match args.iter().position(|arg| arg == "-settings") {
            Some(i) => {
                let path = args.get(i + 1).context("-settings expects a path")?;
                Self::load_from_disk(Path::new(path))?
            }
            None => Self::default(),
        };
        settings.apply_args(args)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Applies `-gridSize x y z`, `-particles n`, `-frames n` and
    /// `-snapshot path`. Unknown flags are logged and skipped.
    pub fn apply_args(&mut self, args: &[String]) -> anyhow::Result<()> {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |name: &str| -> anyhow::Result<String> {
                iter.next().cloned().with_context(|| format!("{arg} expects a {name}"))
            };
            match arg.as_str() {
                "-gridSize" | "-gridsize" => {
                    for axis in 0..3 {
                        let raw = value("grid extent")?;
                        self.grid_size[axis] =
                            raw.parse().with_context(|| format!("invalid grid extent `{raw}`"))?;
                    }
                }
                "-particles" => {
                    let raw = value("particle count")?;
                    self.num_particles = raw.parse().with_context(|| format!("invalid particle count `{raw}`"))?;
                }
                "-frames" => {
                    let raw = value("frame count")?;
                    self.frames = raw.parse().with_context(|| format!("invalid frame count `{raw}`"))?;
                }
                "-snapshot" => {
                    self.snapshot = Some(PathBuf::from(value("path")?));
                }
                "-settings" => {
                    value("path")?;
                }
                other if other.starts_with('-') => {
                    log::warn!("ignoring unknown flag `{other}`");
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.frames_in_flight = self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        self.viewport = [self.viewport[0].clamp(1, 8192), self.viewport[1].clamp(1, 8192)];
        self.frame_time = self.frame_time.clamp(0.0, 1.0);
    }

    pub fn fluid_desc(&self, formats: RenderFormats) -> anyhow::Result<FluidDesc> {
        let [x, y, z] = self.grid_size;
        if self.frames_in_flight == 0 {
            bail!("frames_in_flight must be at least 1");
        }
        Ok(FluidDesc {
            grid: GridExtent::new(x, y, z)?,
            num_particles: self.num_particles,
            formats,
            viewport: UVec2::from_array(self.viewport),
            frames_in_flight: self.frames_in_flight,
            seed: self.seed,
        })
    }
}
