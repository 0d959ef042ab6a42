//! Pipeline/Binding Construction.
//!
//! Everything here runs once, during initialization. Binding tables are
//! immutable after creation; per frame the stages only choose which of the
//! parity variants to bind.

use wgpu::ShaderStages;

use crate::error::Result;
use crate::fields::{FieldStore, FIELD_FORMAT, SCRATCH_FORMAT, VELOCITY_CURRENT, VELOCITY_NEXT};
use crate::gpu::{
    BindingEntry, BindingKind, BindingLayoutHandle, BindingResource, BindingSlot,
    BindingTableHandle, BufferHandle, ComputePipelineDesc, ComputePipelineHandle, GpuDevice,
    PipelineLayoutHandle, RenderPipelineDesc, RenderPipelineHandle, SamplerHandle, SamplerPreset, ShaderEntry,
    TextureHandle,
};
use crate::grid::GridExtent;
use crate::params::{ParamRing, ParticleObjectParams, PerFrameParams, VolumeObjectParams};
use crate::shaders;

const ALL_STAGES: ShaderStages = ShaderStages::COMPUTE
    .union(ShaderStages::VERTEX)
    .union(ShaderStages::FRAGMENT);

/// Formats of the attachments presentation draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFormats {
    pub color: wgpu::TextureFormat,
    pub depth: Option<wgpu::TextureFormat>,
}

/// Binding layouts every mode needs.
#[derive(Debug, Clone, Copy)]
pub struct SharedLayouts {
    /// Per-frame block, dynamic offset, compute stages.
    pub per_frame: BindingLayoutHandle,
    /// Sampled source field (binding 0) and storage destination (binding 1).
    pub field_pair: BindingLayoutHandle,
    pub field_read: BindingLayoutHandle,
    pub sampler: BindingLayoutHandle,
    pub scratch: BindingLayoutHandle,
}

impl SharedLayouts {
    pub fn create(device: &mut impl GpuDevice) -> Result<Self> {
        let per_frame = device.create_binding_layout(
            "PerFrameLayout",
            &[BindingSlot::new(
                0,
                BindingKind::UniformDynamic { size: std::mem::size_of::<PerFrameParams>() as u64 },
                ShaderStages::COMPUTE,
            )],
        )?;
        let field_pair = device.create_binding_layout(
            "FieldPairLayout",
            &[
                BindingSlot::new(0, BindingKind::SampledTexture3d, ShaderStages::COMPUTE),
                BindingSlot::new(1, BindingKind::StorageTexture3d { format: FIELD_FORMAT }, ShaderStages::COMPUTE),
            ],
        )?;
        let field_read = device.create_binding_layout(
            "FieldReadLayout",
            &[BindingSlot::new(0, BindingKind::SampledTexture3d, ALL_STAGES)],
        )?;
        let sampler = device.create_binding_layout(
            "SamplerLayout",
            &[BindingSlot::new(0, BindingKind::Sampler, ALL_STAGES)],
        )?;
        let scratch = device.create_binding_layout(
            "ScratchLayout",
            &[BindingSlot::new(
                0,
                BindingKind::StorageTexture3d { format: SCRATCH_FORMAT },
                ShaderStages::COMPUTE,
            )],
        )?;
        Ok(Self { per_frame, field_pair, field_read, sampler, scratch })
    }
}

/// Binding tables over the Field Store, the samplers and the per-frame ring.
#[derive(Debug, Clone, Copy)]
pub struct FieldTables {
    pub per_frame: BindingTableHandle,
    /// `[advection, projection]`: read 0 / write 1, then read 1 / write 0.
    pub velocity: [BindingTableHandle; 2],
    /// Variant `i` reads color slot `1 - i` and writes slot `i`.
    pub color_pair: [BindingTableHandle; 2],
    /// Variant `i` samples color slot `i`.
    pub color_read: [BindingTableHandle; 2],
    /// Samples the current velocity field.
    pub velocity_read: BindingTableHandle,
    pub scratch: BindingTableHandle,
    pub linear_mirror: BindingTableHandle,
    pub linear_clamp: BindingTableHandle,
}

impl FieldTables {
    pub fn create(
        device: &mut impl GpuDevice,
        layouts: &SharedLayouts,
        fields: &FieldStore,
        per_frame: &ParamRing,
    ) -> Result<Self> {
        let mirror = device.create_sampler(SamplerPreset::LinearMirror)?;
        let clamp = device.create_sampler(SamplerPreset::LinearClamp)?;

        let per_frame = device.create_binding_table(
            "PerFrameTable",
            layouts.per_frame,
            &[BindingEntry::new(0, uniform(per_frame))],
        )?;

        let v0 = fields.velocity(VELOCITY_CURRENT).handle();
        let v1 = fields.velocity(VELOCITY_NEXT).handle();
        let velocity = [
            pair_table(device, "VelocityAdvectTable", layouts.field_pair, v0, v1)?,
            pair_table(device, "VelocityProjectTable", layouts.field_pair, v1, v0)?,
        ];

        let color = |i: usize| fields.colors().slot(i).handle();
        let color_pair = [
            pair_table(device, "ColorTable0", layouts.field_pair, color(1), color(0))?,
            pair_table(device, "ColorTable1", layouts.field_pair, color(0), color(1))?,
        ];
        let color_read = [
            read_table(device, "ColorReadTable0", layouts.field_read, color(0))?,
            read_table(device, "ColorReadTable1", layouts.field_read, color(1))?,
        ];
        let velocity_read = read_table(device, "VelocityReadTable", layouts.field_read, v0)?;

        let scratch = device.create_binding_table(
            "IncompressTable",
            layouts.scratch,
            &[BindingEntry::new(0, BindingResource::StorageTexture(fields.incompress().handle()))],
        )?;
        let linear_mirror = sampler_table(device, "LinearMirrorTable", layouts.sampler, mirror)?;
        let linear_clamp = sampler_table(device, "LinearClampTable", layouts.sampler, clamp)?;

        Ok(Self {
            per_frame,
            velocity,
            color_pair,
            color_read,
            velocity_read,
            scratch,
            linear_mirror,
            linear_clamp,
        })
    }
}

fn uniform(ring: &ParamRing) -> BindingResource {
    BindingResource::Uniform { buffer: ring.buffer(), size: ring.block_size() }
}

fn pair_table(
    device: &mut impl GpuDevice,
    label: &str,
    layout: BindingLayoutHandle,
    read: TextureHandle,
    write: TextureHandle,
) -> Result<BindingTableHandle> {
    device.create_binding_table(
        label,
        layout,
        &[
            BindingEntry::new(0, BindingResource::Texture(read)),
            BindingEntry::new(1, BindingResource::StorageTexture(write)),
        ],
    )
}

fn read_table(
    device: &mut impl GpuDevice,
    label: &str,
    layout: BindingLayoutHandle,
    texture: TextureHandle,
) -> Result<BindingTableHandle> {
    device.create_binding_table(label, layout, &[BindingEntry::new(0, BindingResource::Texture(texture))])
}

fn sampler_table(
    device: &mut impl GpuDevice,
    label: &str,
    layout: BindingLayoutHandle,
    sampler: SamplerHandle,
) -> Result<BindingTableHandle> {
    device.create_binding_table(label, layout, &[BindingEntry::new(0, BindingResource::Sampler(sampler))])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationPipelines {
    pub advect: ComputePipelineHandle,
    pub project: ComputePipelineHandle,
}

pub fn create_simulation_pipelines(
    device: &mut impl GpuDevice,
    layouts: &SharedLayouts,
    extent: GridExtent,
) -> Result<SimulationPipelines> {
    let advect_layout = device.create_pipeline_layout(
        "AdvectionLayout",
        &[layouts.per_frame, layouts.field_pair, layouts.sampler, layouts.field_pair],
    )?;
    let advect = device.create_compute_pipeline(&ComputePipelineDesc {
        label: "Advection".to_owned(),
        layout: advect_layout,
        module: shaders::ADVECT,
        entry_point: "main",
    })?;

    let project_layout = device.create_pipeline_layout(
        "ProjectionLayout",
        &[layouts.per_frame, layouts.field_pair, layouts.scratch],
    )?;
    let module = if extent.is_volumetric() { shaders::PROJECT_3D } else { shaders::PROJECT_2D };
    let project = device.create_compute_pipeline(&ComputePipelineDesc {
        label: "Projection".to_owned(),
        layout: project_layout,
        module,
        entry_point: "main",
    })?;

    Ok(SimulationPipelines { advect, project })
}

fn presentation_pipeline(
    label: &str,
    layout: PipelineLayoutHandle,
    vertex: ShaderEntry,
    fragment: ShaderEntry,
    topology: wgpu::PrimitiveTopology,
    formats: RenderFormats,
) -> RenderPipelineDesc {
    RenderPipelineDesc {
        label: label.to_owned(),
        layout,
        vertex,
        fragment,
        topology,
        color_format: formats.color,
        depth_format: formats.depth,
        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
    }
}

/// Particle mode: a motion pass plus the instanced draw.
#[derive(Debug, Clone, Copy)]
pub struct ParticlePipelines {
    pub update: ComputePipelineHandle,
    pub draw: RenderPipelineHandle,
    /// Per-frame (binding 0) and per-object (binding 1) blocks.
    pub params_table: BindingTableHandle,
    pub particles_rw: BindingTableHandle,
    pub particles_ro: BindingTableHandle,
}

pub fn create_particle_pipelines(
    device: &mut impl GpuDevice,
    layouts: &SharedLayouts,
    formats: RenderFormats,
    per_frame: &ParamRing,
    per_object: &ParamRing,
    particles: BufferHandle,
) -> Result<ParticlePipelines> {
    let params_layout = device.create_binding_layout(
        "ParticleParamsLayout",
        &[
            BindingSlot::new(
                0,
                BindingKind::UniformDynamic { size: std::mem::size_of::<PerFrameParams>() as u64 },
                ShaderStages::VERTEX,
            ),
            BindingSlot::new(
                1,
                BindingKind::UniformDynamic { size: std::mem::size_of::<ParticleObjectParams>() as u64 },
                ShaderStages::VERTEX,
            ),
        ],
    )?;
    let rw_layout = device.create_binding_layout(
        "ParticleWriteLayout",
        &[BindingSlot::new(0, BindingKind::StorageBuffer { read_only: false }, ShaderStages::COMPUTE)],
    )?;
    let ro_layout = device.create_binding_layout(
        "ParticleReadLayout",
        &[BindingSlot::new(0, BindingKind::StorageBuffer { read_only: true }, ShaderStages::VERTEX)],
    )?;

    let params_table = device.create_binding_table(
        "ParticleParamsTable",
        params_layout,
        &[BindingEntry::new(0, uniform(per_frame)), BindingEntry::new(1, uniform(per_object))],
    )?;
    let particles_rw = device.create_binding_table(
        "ParticleWriteTable",
        rw_layout,
        &[BindingEntry::new(0, BindingResource::Buffer(particles))],
    )?;
    let particles_ro = device.create_binding_table(
        "ParticleReadTable",
        ro_layout,
        &[BindingEntry::new(0, BindingResource::Buffer(particles))],
    )?;

    let update_layout = device.create_pipeline_layout(
        "ParticleUpdateLayout",
        &[layouts.per_frame, rw_layout, layouts.field_read, layouts.sampler],
    )?;
    let update = device.create_compute_pipeline(&ComputePipelineDesc {
        label: "ParticleUpdate".to_owned(),
        layout: update_layout,
        module: shaders::PARTICLE_UPDATE,
        entry_point: "main",
    })?;

    let draw_layout = device.create_pipeline_layout(
        "ParticleLayout",
        &[params_layout, ro_layout, layouts.field_read, layouts.sampler],
    )?;
    let draw = device.create_render_pipeline(&presentation_pipeline(
        "Particle",
        draw_layout,
        ShaderEntry { module: shaders::PARTICLE, entry_point: "vs_main" },
        ShaderEntry { module: shaders::PARTICLE, entry_point: "fs_main" },
        wgpu::PrimitiveTopology::TriangleStrip,
        formats,
    ))?;

    Ok(ParticlePipelines { update, draw, params_table, particles_rw, particles_ro })
}

/// Volumetric mode: the ray-marching full-screen pass.
#[derive(Debug, Clone, Copy)]
pub struct RayCastPipeline {
    pub draw: RenderPipelineHandle,
    pub params_table: BindingTableHandle,
}

pub fn create_ray_cast_pipeline(
    device: &mut impl GpuDevice,
    layouts: &SharedLayouts,
    formats: RenderFormats,
    per_object: &ParamRing,
) -> Result<RayCastPipeline> {
    let params_layout = device.create_binding_layout(
        "VolumeParamsLayout",
        &[BindingSlot::new(
            0,
            BindingKind::UniformDynamic { size: std::mem::size_of::<VolumeObjectParams>() as u64 },
            ShaderStages::FRAGMENT,
        )],
    )?;
    let params_table = device.create_binding_table(
        "VolumeParamsTable",
        params_layout,
        &[BindingEntry::new(0, uniform(per_object))],
    )?;
    let layout = device.create_pipeline_layout(
        "RayCastLayout",
        &[params_layout, layouts.field_read, layouts.sampler],
    )?;
    let draw = device.create_render_pipeline(&presentation_pipeline(
        "RayCast",
        layout,
        ShaderEntry { module: shaders::SCREEN_QUAD, entry_point: "vs_main" },
        ShaderEntry { module: shaders::RAY_CAST, entry_point: "fs_main" },
        wgpu::PrimitiveTopology::TriangleList,
        formats,
    ))?;
    Ok(RayCastPipeline { draw, params_table })
}

/// 2D mode: samples the color field straight onto the screen.
pub fn create_visualize_pipeline(
    device: &mut impl GpuDevice,
    layouts: &SharedLayouts,
    formats: RenderFormats,
) -> Result<RenderPipelineHandle> {
    let layout = device.create_pipeline_layout("VisualizeLayout", &[layouts.field_read, layouts.sampler])?;
    device.create_render_pipeline(&presentation_pipeline(
        "VisualizeColor",
        layout,
        ShaderEntry { module: shaders::SCREEN_QUAD, entry_point: "vs_main" },
        ShaderEntry { module: shaders::VISUALIZE_COLOR, entry_point: "fs_main" },
        wgpu::PrimitiveTopology::TriangleList,
        formats,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::RecordingDevice;
    use crate::gpu::CommandList;

    fn setup(extent: GridExtent) -> (RecordingDevice, SharedLayouts, FieldStore, FieldTables) {
        let mut device = RecordingDevice::new();
        let mut commands = CommandList::new();
        let fields = FieldStore::create(&mut device, extent, &mut commands).unwrap();
        let ring = ParamRing::for_block::<PerFrameParams>(&mut device, "PerFrame", 3).unwrap();
        let layouts = SharedLayouts::create(&mut device).unwrap();
        let tables = FieldTables::create(&mut device, &layouts, &fields, &ring).unwrap();
        (device, layouts, fields, tables)
    }

    fn table_textures(device: &RecordingDevice, table: BindingTableHandle) -> Vec<BindingResource> {
        device.table(table).entries.iter().map(|entry| entry.resource).collect()
    }

    #[test]
    fn test_velocity_tables_swap_roles() {
        let (device, _, fields, tables) = setup(GridExtent::new(16, 16, 16).unwrap());
        let v0 = fields.velocity(0).handle();
        let v1 = fields.velocity(1).handle();

        assert_eq!(
            table_textures(&device, tables.velocity[0]),
            vec![BindingResource::Texture(v0), BindingResource::StorageTexture(v1)]
        );
        assert_eq!(
            table_textures(&device, tables.velocity[1]),
            vec![BindingResource::Texture(v1), BindingResource::StorageTexture(v0)]
        );
    }

    #[test]
    fn test_color_variants_never_read_what_they_write() {
        let (device, _, fields, tables) = setup(GridExtent::new(32, 32, 1).unwrap());
        for (i, table) in tables.color_pair.iter().enumerate() {
            let written = fields.colors().slot(i).handle();
            let read = fields.colors().slot(1 - i).handle();
            assert_eq!(
                table_textures(&device, *table),
                vec![BindingResource::Texture(read), BindingResource::StorageTexture(written)]
            );
            assert_eq!(
                table_textures(&device, tables.color_read[i]),
                vec![BindingResource::Texture(written)]
            );
        }
    }

    #[test]
    fn test_projection_module_follows_grid() {
        let (mut device, layouts, _, _) = setup(GridExtent::new(8, 8, 8).unwrap());
        create_simulation_pipelines(&mut device, &layouts, GridExtent::new(8, 8, 8).unwrap()).unwrap();
        create_simulation_pipelines(&mut device, &layouts, GridExtent::new(8, 8, 1).unwrap()).unwrap();

        let modules: Vec<&str> = device.compute_pipelines.iter().map(|desc| desc.module).collect();
        assert_eq!(modules, vec!["advect", "project_3d", "advect", "project_2d"]);
    }

    #[test]
    fn test_presentation_pipelines_blend() {
        let (mut device, layouts, _, _) = setup(GridExtent::new(8, 8, 1).unwrap());
        let formats = RenderFormats { color: wgpu::TextureFormat::Rgba8UnormSrgb, depth: None };
        create_visualize_pipeline(&mut device, &layouts, formats).unwrap();

        let desc = &device.render_pipelines[0];
        assert_eq!(desc.blend, Some(wgpu::BlendState::ALPHA_BLENDING));
        assert_eq!(desc.depth_format, None);
        assert_eq!(desc.fragment.module, "visualize_color");
    }
}
