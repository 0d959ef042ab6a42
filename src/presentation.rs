//! Presentation Stage: exactly one of three renderers, fixed at init.

use glam::UVec2;

use crate::error::Result;
use crate::fields::{FieldStore, VELOCITY_CURRENT};
use crate::gpu::{
    BoundTable, Command, CommandList, GpuDevice, RenderPipelineHandle, ResourceState,
};
use crate::grid::{div_up, PresentationMode};
use crate::params::{Camera, ParamRing, ParticleObjectParams, VolumeObjectParams};
use crate::particles::ParticleStore;
use crate::pipelines::{
    self, FieldTables, ParticlePipelines, RayCastPipeline, RenderFormats, SharedLayouts,
};

/// Threads per group in `particle_update.wgsl`.
pub const PARTICLE_GROUP_SIZE: u32 = 64;

pub struct ParticleRenderer {
    store: ParticleStore,
    pipelines: ParticlePipelines,
    per_object: ParamRing,
    volumetric: bool,
}

impl ParticleRenderer {
    pub fn create(
        device: &mut impl GpuDevice,
        layouts: &SharedLayouts,
        formats: RenderFormats,
        per_frame: &ParamRing,
        frames_in_flight: u32,
        store: ParticleStore,
        volumetric: bool,
    ) -> Result<Self> {
        let per_object =
            ParamRing::for_block::<ParticleObjectParams>(device, "ParticleObjectParams", frames_in_flight)?;
        let pipelines = pipelines::create_particle_pipelines(
            device,
            layouts,
            formats,
            per_frame,
            &per_object,
            store.buffer().handle(),
        )?;
        Ok(Self { store, pipelines, per_object, volumetric })
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    fn record(
        &mut self,
        fields: &mut FieldStore,
        tables: &FieldTables,
        per_frame_offset: u32,
        per_object_offset: u32,
        commands: &mut CommandList,
    ) {
        let count = self.store.count();

        let mut barriers = Vec::new();
        fields
            .velocity_mut(VELOCITY_CURRENT)
            .transition(ResourceState::ComputeRead, &mut barriers);
        self.store
            .buffer_mut()
            .transition(ResourceState::UnorderedAccess, &mut barriers);
        commands.barrier(barriers);

        commands.push(Command::Dispatch {
            label: "ParticleUpdate",
            pipeline: self.pipelines.update,
            tables: vec![
                BoundTable::with_offsets(0, tables.per_frame, vec![per_frame_offset]),
                BoundTable::new(1, self.pipelines.particles_rw),
                BoundTable::new(2, tables.velocity_read),
                BoundTable::new(3, tables.linear_clamp),
            ],
            groups: [div_up(count, PARTICLE_GROUP_SIZE), 1, 1],
        });

        let mut barriers = Vec::new();
        self.store
            .buffer_mut()
            .transition(ResourceState::ComputeRead, &mut barriers);
        fields
            .colors_mut()
            .write_mut()
            .transition(ResourceState::ShaderRead, &mut barriers);
        commands.barrier(barriers);

        commands.push(Command::Draw {
            label: "Particles",
            pipeline: self.pipelines.draw,
            tables: vec![
                BoundTable::with_offsets(
                    0,
                    self.pipelines.params_table,
                    vec![per_frame_offset, per_object_offset],
                ),
                BoundTable::new(1, self.pipelines.particles_ro),
                BoundTable::new(2, tables.color_read[fields.parity()]),
                BoundTable::new(3, tables.linear_clamp),
            ],
            vertices: 0..4,
            instances: 0..count,
        });
    }
}

pub struct RayCaster {
    pipeline: RayCastPipeline,
    per_object: ParamRing,
    viewport: UVec2,
}

impl RayCaster {
    pub fn create(
        device: &mut impl GpuDevice,
        layouts: &SharedLayouts,
        formats: RenderFormats,
        frames_in_flight: u32,
        viewport: UVec2,
    ) -> Result<Self> {
        let per_object =
            ParamRing::for_block::<VolumeObjectParams>(device, "VolumeObjectParams", frames_in_flight)?;
        let pipeline = pipelines::create_ray_cast_pipeline(device, layouts, formats, &per_object)?;
        Ok(Self { pipeline, per_object, viewport })
    }

    pub fn viewport(&self) -> UVec2 {
        self.viewport
    }
}

pub struct ColorVisualizer {
    draw: RenderPipelineHandle,
}

impl ColorVisualizer {
    pub fn create(device: &mut impl GpuDevice, layouts: &SharedLayouts, formats: RenderFormats) -> Result<Self> {
        let draw = pipelines::create_visualize_pipeline(device, layouts, formats)?;
        Ok(Self { draw })
    }
}

pub enum Presentation {
    Particles(ParticleRenderer),
    RayCast(RayCaster),
    Visualize2D(ColorVisualizer),
}

impl Presentation {
    pub fn mode(&self) -> PresentationMode {
        match self {
            Self::Particles(_) => PresentationMode::Particles,
            Self::RayCast(_) => PresentationMode::RayCast,
            Self::Visualize2D(_) => PresentationMode::Visualize2D,
        }
    }

    /// The per-object parameter ring; 2D mode has none.
    pub fn per_object(&self) -> Option<&ParamRing> {
        match self {
            Self::Particles(renderer) => Some(&renderer.per_object),
            Self::RayCast(caster) => Some(&caster.per_object),
            Self::Visualize2D(_) => None,
        }
    }

    pub fn particles(&self) -> Option<&ParticleStore> {
        match self {
            Self::Particles(renderer) => Some(renderer.store()),
            _ => None,
        }
    }

    /// Writes this frame's per-object block.
    pub fn update_object(&self, device: &impl GpuDevice, frame_index: u32, camera: &Camera) {
        match self {
            Self::Particles(renderer) => {
                let block = ParticleObjectParams::new(camera.view, camera.proj, renderer.volumetric);
                renderer.per_object.write(device, frame_index, &block);
            }
            Self::RayCast(caster) => {
                let block = VolumeObjectParams::new(camera.view, camera.proj, camera.eye, caster.viewport);
                caster.per_object.write(device, frame_index, &block);
            }
            Self::Visualize2D(_) => {}
        }
    }

    pub fn record(
        &mut self,
        fields: &mut FieldStore,
        tables: &FieldTables,
        per_frame: &ParamRing,
        frame_index: u32,
        commands: &mut CommandList,
    ) {
        let color = tables.color_read[fields.parity()];
        match self {
            Self::Particles(renderer) => {
                let per_object_offset = renderer.per_object.dynamic_offset(frame_index);
                renderer.record(fields, tables, per_frame.dynamic_offset(frame_index), per_object_offset, commands);
            }
            Self::RayCast(caster) => {
                color_readable(fields, commands);
                commands.push(Command::Draw {
                    label: "RayCast",
                    pipeline: caster.pipeline.draw,
                    tables: vec![
                        BoundTable::with_offsets(
                            0,
                            caster.pipeline.params_table,
                            vec![caster.per_object.dynamic_offset(frame_index)],
                        ),
                        BoundTable::new(1, color),
                        BoundTable::new(2, tables.linear_clamp),
                    ],
                    vertices: 0..3,
                    instances: 0..1,
                });
            }
            Self::Visualize2D(visualizer) => {
                color_readable(fields, commands);
                commands.push(Command::Draw {
                    label: "VisualizeColor",
                    pipeline: visualizer.draw,
                    tables: vec![BoundTable::new(0, color), BoundTable::new(1, tables.linear_clamp)],
                    vertices: 0..3,
                    instances: 0..1,
                });
            }
        }
    }
}

fn color_readable(fields: &mut FieldStore, commands: &mut CommandList) {
    let mut barriers = Vec::new();
    fields
        .colors_mut()
        .write_mut()
        .transition(ResourceState::ShaderRead, &mut barriers);
    commands.barrier(barriers);
}
