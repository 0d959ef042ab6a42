//! Grid descriptor and the sizing rules derived from it.

use glam::UVec3;

use crate::error::{FluidError, Result};

/// Advection runs 8x8 threads per group, one group per z slice.
pub const ADVECT_GROUP_SIZE: u32 = 8;
/// Projection on volumetric grids uses 4x4x4 groups.
pub const PROJECT_GROUP_SIZE_3D: u32 = 4;
/// Projection on flat grids uses 8x8x1 groups.
pub const PROJECT_GROUP_SIZE_2D: u32 = 8;

/// Largest group count a single dispatch may use along any axis.
pub const MAX_GROUPS_PER_DIMENSION: u32 = 65535;

#[inline]
pub fn div_up(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Fixed three-axis extent of the simulated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridExtent(UVec3);

impl GridExtent {
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(FluidError::InvalidGrid { x, y, z });
        }
        Ok(Self(UVec3::new(x, y, z)))
    }

    pub fn x(&self) -> u32 {
        self.0.x
    }

    pub fn y(&self) -> u32 {
        self.0.y
    }

    pub fn z(&self) -> u32 {
        self.0.z
    }

    pub fn as_uvec3(&self) -> UVec3 {
        self.0
    }

    /// A grid deeper than one slice is simulated and shown as a volume.
    pub fn is_volumetric(&self) -> bool {
        self.0.z > 1
    }

    pub fn cell_count(&self) -> u64 {
        self.0.x as u64 * self.0.y as u64 * self.0.z as u64
    }

    /// Work groups for the advection kernel.
    pub fn advection_groups(&self) -> [u32; 3] {
        [
            div_up(self.0.x, ADVECT_GROUP_SIZE),
            div_up(self.0.y, ADVECT_GROUP_SIZE),
            self.0.z,
        ]
    }

    /// Work groups for the projection kernel; finer per-axis tiles on volumes.
    pub fn projection_groups(&self) -> [u32; 3] {
        if self.is_volumetric() {
            [
                div_up(self.0.x, PROJECT_GROUP_SIZE_3D),
                div_up(self.0.y, PROJECT_GROUP_SIZE_3D),
                div_up(self.0.z, PROJECT_GROUP_SIZE_3D),
            ]
        } else {
            [
                div_up(self.0.x, PROJECT_GROUP_SIZE_2D),
                div_up(self.0.y, PROJECT_GROUP_SIZE_2D),
                self.0.z,
            ]
        }
    }
}

/// How the field is shown. Chosen once from the grid and particle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationMode {
    Particles,
    RayCast,
    Visualize2D,
}

impl PresentationMode {
    pub fn select(extent: GridExtent, num_particles: u32) -> Self {
        if num_particles > 0 {
            Self::Particles
        } else if extent.is_volumetric() {
            Self::RayCast
        } else {
            Self::Visualize2D
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Particles => "particles",
            Self::RayCast => "ray cast",
            Self::Visualize2D => "2D visualize",
        }
    }
}
