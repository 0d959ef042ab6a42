use thiserror::Error;

/// Everything that can go wrong while bringing a [`crate::Fluid`] up.
///
/// Per-frame work has no failure path: once `Fluid::init` returns `Ok`, the
/// update/simulate/render calls only record commands.
#[derive(Debug, Error)]
pub enum FluidError {
    #[error("invalid grid extent {x}x{y}x{z}: every axis must be at least 1")]
    InvalidGrid { x: u32, y: u32, z: u32 },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to load kernel `{name}`: {reason}")]
    KernelLoad { name: String, reason: String },

    #[error("failed to create pipeline `{label}`: {reason}")]
    Pipeline { label: String, reason: String },

    #[error("failed to create resource `{label}`: {reason}")]
    ResourceCreation { label: String, reason: String },

    #[error("failed to create binding table `{label}`: {reason}")]
    BindingTable { label: String, reason: String },
}

pub type Result<T, E = FluidError> = std::result::Result<T, E>;
