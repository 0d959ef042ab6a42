//! Named kernel and shader modules.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::error::{FluidError, Result};

pub const ADVECT: &str = "advect";
pub const PROJECT_2D: &str = "project_2d";
pub const PROJECT_3D: &str = "project_3d";
pub const PARTICLE_UPDATE: &str = "particle_update";
pub const PARTICLE: &str = "particle";
pub const SCREEN_QUAD: &str = "screen_quad";
pub const RAY_CAST: &str = "ray_cast";
pub const VISUALIZE_COLOR: &str = "visualize_color";

pub const ALL: [&str; 8] = [
    ADVECT,
    PROJECT_2D,
    PROJECT_3D,
    PARTICLE_UPDATE,
    PARTICLE,
    SCREEN_QUAD,
    RAY_CAST,
    VISUALIZE_COLOR,
];

/// Where WGSL sources come from.
pub trait KernelSource {
    fn load(&self, name: &str) -> Result<Cow<'static, str>>;
}

/// Sources compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedKernels;

impl KernelSource for EmbeddedKernels {
    fn load(&self, name: &str) -> Result<Cow<'static, str>> {
        let source = match name {
            ADVECT => include_str!("../shaders/advect.wgsl"),
            PROJECT_2D => include_str!("../shaders/project_2d.wgsl"),
            PROJECT_3D => include_str!("../shaders/project_3d.wgsl"),
            PARTICLE_UPDATE => include_str!("../shaders/particle_update.wgsl"),
            PARTICLE => include_str!("../shaders/particle.wgsl"),
            SCREEN_QUAD => include_str!("../shaders/screen_quad.wgsl"),
            RAY_CAST => include_str!("../shaders/ray_cast.wgsl"),
            VISUALIZE_COLOR => include_str!("../shaders/visualize_color.wgsl"),
            _ => {
                return Err(FluidError::KernelLoad {
                    name: name.to_owned(),
                    reason: "no embedded module with this name".to_owned(),
                })
            }
        };
        Ok(Cow::Borrowed(source))
    }
}

/// Sources read from `<dir>/<name>.wgsl` at pipeline creation time, so
/// kernels can be edited without rebuilding.
#[derive(Debug, Clone)]
pub struct KernelDirectory {
    dir: PathBuf,
}

impl KernelDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl KernelSource for KernelDirectory {
    fn load(&self, name: &str) -> Result<Cow<'static, str>> {
        let path = self.dir.join(format!("{name}.wgsl"));
        std::fs::read_to_string(&path)
            .map(Cow::Owned)
            .map_err(|err| FluidError::KernelLoad {
                name: name.to_owned(),
                reason: format!("{}: {err}", path.display()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_module_is_embedded() {
        for name in ALL {
            let source = EmbeddedKernels.load(name).unwrap();
            assert!(!source.is_empty(), "{name} is empty");
        }
    }

    #[test]
    fn test_unknown_module() {
        assert!(matches!(
            EmbeddedKernels.load("CSAdvect"),
            Err(FluidError::KernelLoad { .. })
        ));
    }

    #[test]
    fn test_missing_directory_file() {
        let kernels = KernelDirectory::new("/nonexistent/kernels");
        let err = kernels.load(ADVECT).unwrap_err();
        assert!(err.to_string().contains("advect.wgsl"));
    }

    #[test]
    fn test_compute_entry_points() {
        for name in [ADVECT, PROJECT_2D, PROJECT_3D, PARTICLE_UPDATE] {
            let source = EmbeddedKernels.load(name).unwrap();
            assert!(source.contains("@compute"), "{name} has no compute entry");
            assert!(source.contains("fn main"), "{name} has no main");
        }
    }
}
