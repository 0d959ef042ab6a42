//! Parameter Buffers: per-frame simulation constants and per-object
//! transform blocks, each ring-indexed by the frame-in-flight index.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::error::Result;
use crate::gpu::{BufferDesc, BufferHandle, BufferUsage, GpuDevice, UNIFORM_SLOT_ALIGNMENT};

/// The field cube spans [-1, 1] locally and is scaled by this in world space.
pub const WORLD_SCALE: f32 = 10.0;
/// World-space position of the ray caster's point light.
pub const LIGHT_POSITION: Vec3 = Vec3::new(75.0, 75.0, -75.0);
/// Projection used for particles over a single-slice grid.
pub const FLAT_PARTICLE_PROJ_SCALE: f32 = 0.1;

/// Camera state supplied by the host each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    pub proj: Mat4,
    pub eye: Vec3,
}

impl Camera {
    /// Right-handed camera at `eye` looking at the field centre.
    pub fn looking_at_origin(eye: Vec3, aspect: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            proj: Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, aspect, 1.0, 1000.0),
            eye,
        }
    }
}

/// Must match `PerFrame` in every kernel.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PerFrameParams {
    /// Gated simulation step: zero or the nominal step.
    pub time_step: f32,
    pub base_seed: u32,
    /// Raw elapsed time of the frame, used by particle motion.
    pub frame_time: f32,
    pub _pad: u32,
}

impl PerFrameParams {
    pub fn new(time_step: f32, base_seed: u32, frame_time: f32) -> Self {
        Self { time_step, base_seed, frame_time, _pad: 0 }
    }
}

/// Must match `PerObject` in `particle.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ParticleObjectParams {
    pub world_view: Mat4,
    pub world_view_inverse: Mat4,
    pub proj: Mat4,
}

impl ParticleObjectParams {
    /// Over a volume the particles are seen through the camera; over a flat
    /// grid they are laid out on screen and the camera is ignored.
    pub fn new(view: Mat4, proj: Mat4, volumetric: bool) -> Self {
        let world = world_matrix();
        let (world_view, proj) = if volumetric {
            (view * world, proj)
        } else {
            (world, Mat4::from_scale(Vec3::splat(FLAT_PARTICLE_PROJ_SCALE)))
        };
        Self {
            world_view,
            world_view_inverse: world_view.inverse(),
            proj,
        }
    }
}

/// Must match `PerObject` in `ray_cast.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct VolumeObjectParams {
    pub light_point: Vec4,
    pub eye_point: Vec4,
    /// Inverse of the combined local-to-screen transform.
    pub screen_to_local: Mat4,
    pub world_view_proj: Mat4,
}

impl VolumeObjectParams {
    pub fn new(view: Mat4, proj: Mat4, eye: Vec3, viewport: UVec2) -> Self {
        let world = world_matrix();
        let world_inverse = world.inverse();
        let world_view_proj = proj * view * world;
        let local_to_screen = to_screen(viewport) * world_view_proj;

        Self {
            light_point: world_inverse.transform_point3(LIGHT_POSITION).extend(1.0),
            eye_point: world_inverse.transform_point3(eye).extend(1.0),
            screen_to_local: local_to_screen.inverse(),
            world_view_proj,
        }
    }
}

pub fn world_matrix() -> Mat4 {
    Mat4::from_scale(Vec3::splat(WORLD_SCALE))
}

/// Clip space to pixel coordinates, y pointing down.
pub fn to_screen(viewport: UVec2) -> Mat4 {
    let w = viewport.x as f32;
    let h = viewport.y as f32;
    Mat4::from_cols(
        Vec4::new(0.5 * w, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5 * h, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5 * w, 0.5 * h, 0.0, 1.0),
    )
}

/// A uniform buffer with one aligned slot per frame in flight.
///
/// Writing slot `frame_index` never touches the slots the GPU may still be
/// reading for earlier frames, as long as the host waits on the frame that
/// last used the slot before reusing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRing {
    buffer: BufferHandle,
    block_size: u64,
    slot_size: u64,
    slots: u32,
}

impl ParamRing {
    pub fn create(
        device: &mut impl GpuDevice,
        label: &str,
        block_size: u64,
        slots: u32,
    ) -> Result<Self> {
        let slot_size = block_size.div_ceil(UNIFORM_SLOT_ALIGNMENT) * UNIFORM_SLOT_ALIGNMENT;
        let buffer = device.create_buffer(&BufferDesc {
            label: label.to_owned(),
            size: slot_size * slots as u64,
            usage: BufferUsage::Uniform,
        })?;
        Ok(Self { buffer, block_size, slot_size, slots })
    }

    pub fn for_block<T: Pod>(device: &mut impl GpuDevice, label: &str, slots: u32) -> Result<Self> {
        Self::create(device, label, std::mem::size_of::<T>() as u64, slots)
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn offset(&self, frame_index: u32) -> u64 {
        (frame_index % self.slots) as u64 * self.slot_size
    }

    pub fn dynamic_offset(&self, frame_index: u32) -> u32 {
        self.offset(frame_index) as u32
    }

    pub fn write<T: Pod>(&self, device: &impl GpuDevice, frame_index: u32, block: &T) {
        debug_assert_eq!(std::mem::size_of::<T>() as u64, self.block_size);
        device.write_buffer(self.buffer, self.offset(frame_index), bytemuck::bytes_of(block));
    }
}
