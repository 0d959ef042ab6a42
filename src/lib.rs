//! GPU-resident Eulerian fluid simulator.
//!
//! A [`Fluid`] owns double-buffered velocity and color volumes and advances
//! them with an advection and a projection kernel each frame. It presents the
//! result as particles, a ray-cast volume or a flat color image, depending on
//! the grid and particle count it was created with. All GPU work is recorded
//! into a caller-owned [`gpu::CommandList`]; the host decides when to submit.

pub mod clock;
pub mod config;
pub mod error;
pub mod fields;
pub mod fluid;
pub mod gpu;
pub mod grid;
pub mod params;
pub mod particles;
pub mod pipelines;
pub mod presentation;
pub mod shaders;
pub mod simulation;

pub use config::FluidSettings;
pub use error::{FluidError, Result};
pub use fluid::{Fluid, FluidDesc};
pub use grid::{GridExtent, PresentationMode};
pub use params::Camera;
pub use pipelines::RenderFormats;
