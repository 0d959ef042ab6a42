#![allow(dead_code)]

use fluidx::gpu::recording::RecordingDevice;
use fluidx::gpu::{BufferHandle, CommandList};
use fluidx::params::PerFrameParams;
use fluidx::{Camera, Fluid, FluidDesc, GridExtent, RenderFormats};
use glam::{UVec2, Vec3};

pub const FRAMES_IN_FLIGHT: u32 = 3;

pub fn desc(x: u32, y: u32, z: u32, num_particles: u32) -> FluidDesc {
    FluidDesc {
        grid: GridExtent::new(x, y, z).unwrap(),
        num_particles,
        formats: RenderFormats {
            color: wgpu::TextureFormat::Rgba8UnormSrgb,
            depth: Some(wgpu::TextureFormat::Depth32Float),
        },
        viewport: UVec2::new(1280, 720),
        frames_in_flight: FRAMES_IN_FLIGHT,
        seed: Some(1234),
    }
}

pub struct Harness {
    pub device: RecordingDevice,
    pub fluid: Fluid,
    pub init_commands: CommandList,
    pub uploaders: Vec<BufferHandle>,
}

impl Harness {
    pub fn new(desc: &FluidDesc) -> Self {
        let mut device = RecordingDevice::new();
        let mut init_commands = CommandList::new();
        let mut uploaders = Vec::new();
        let fluid = Fluid::init(&mut device, &mut init_commands, &mut uploaders, desc).unwrap();
        Self { device, fluid, init_commands, uploaders }
    }

    /// One host frame: update, simulate, render.
    pub fn frame(&mut self, elapsed: f32, frame_index: u32) -> CommandList {
        let mut commands = CommandList::new();
        self.fluid
            .update_frame(&self.device, elapsed, frame_index, &camera());
        self.fluid.simulate(&self.device, frame_index, &mut commands);
        self.fluid.render(frame_index, &mut commands);
        commands
    }

    /// The per-frame block most recently uploaded for `frame_index`.
    pub fn per_frame(&self, frame_index: u32) -> PerFrameParams {
        let ring = self.fluid.per_frame();
        let bytes = self
            .device
            .last_write(ring.buffer(), ring.offset(frame_index))
            .expect("no per-frame upload for this slot");
        bytemuck::pod_read_unaligned(&bytes)
    }
}

pub fn camera() -> Camera {
    Camera::looking_at_origin(Vec3::new(0.0, 0.0, -35.0), 16.0 / 9.0)
}
