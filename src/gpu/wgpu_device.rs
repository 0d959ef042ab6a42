//! [`GpuDevice`] backed by a real wgpu device and queue.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::{
    BindingEntry, BindingKind, BindingLayoutHandle, BindingResource, BindingSlot,
    BindingTableHandle, BufferDesc, BufferHandle, BufferUsage, Command, CommandList,
    ComputePipelineDesc, ComputePipelineHandle, GpuDevice, PipelineLayoutHandle,
    RenderPipelineDesc, RenderPipelineHandle, SamplerHandle, SamplerPreset, ShaderEntry,
    TextureDesc, TextureHandle,
};
use crate::error::{FluidError, Result};
use crate::shaders::KernelSource;

/// Color (and optional depth) attachment presentation draws land in.
pub struct RenderTarget<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: Option<&'a wgpu::TextureView>,
}

struct FieldTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    kernels: Box<dyn KernelSource>,
    modules: HashMap<&'static str, wgpu::ShaderModule>,
    textures: Vec<FieldTexture>,
    buffers: Vec<wgpu::Buffer>,
    samplers: Vec<wgpu::Sampler>,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layouts: Vec<wgpu::PipelineLayout>,
    bind_groups: Vec<wgpu::BindGroup>,
    compute_pipelines: Vec<wgpu::ComputePipeline>,
    render_pipelines: Vec<wgpu::RenderPipeline>,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, kernels: Box<dyn KernelSource>) -> Self {
        Self {
            device,
            queue,
            kernels,
            modules: HashMap::new(),
            textures: Vec::new(),
            buffers: Vec::new(),
            samplers: Vec::new(),
            bind_group_layouts: Vec::new(),
            pipeline_layouts: Vec::new(),
            bind_groups: Vec::new(),
            compute_pipelines: Vec::new(),
            render_pipelines: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn buffer(&self, handle: BufferHandle) -> &wgpu::Buffer {
        &self.buffers[handle.index()]
    }

    pub fn texture_view(&self, handle: TextureHandle) -> &wgpu::TextureView {
        &self.textures[handle.index()].view
    }

    /// Frees upload buffers once the commands that read them have completed.
    pub fn release_uploads(&self, uploaders: &mut Vec<BufferHandle>) {
        for handle in uploaders.drain(..) {
            self.buffers[handle.index()].destroy();
        }
    }

    /// Runs `create` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> std::result::Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    fn module(&mut self, name: &'static str) -> Result<&wgpu::ShaderModule> {
        if !self.modules.contains_key(name) {
            let source = self.kernels.load(name)?;
            let module = self
                .scoped(|device| {
                    device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(name),
                        source: wgpu::ShaderSource::Wgsl(source),
                    })
                })
                .map_err(|reason| FluidError::KernelLoad { name: name.to_owned(), reason })?;
            log::debug!("compiled kernel module `{name}`");
            self.modules.insert(name, module);
        }
        Ok(&self.modules[name])
    }

    fn layout_entry(slot: &BindingSlot) -> wgpu::BindGroupLayoutEntry {
        let ty = match slot.kind {
            BindingKind::UniformDynamic { size } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(size),
            },
            BindingKind::SampledTexture3d => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D3,
                multisampled: false,
            },
            BindingKind::StorageTexture3d { format } => wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format,
                view_dimension: wgpu::TextureViewDimension::D3,
            },
            BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        };
        wgpu::BindGroupLayoutEntry {
            binding: slot.binding,
            visibility: slot.visibility,
            ty,
            count: None,
        }
    }

    fn bind_group_entry(&self, entry: &BindingEntry) -> wgpu::BindGroupEntry<'_> {
        let resource = match entry.resource {
            BindingResource::Uniform { buffer, size } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.buffers[buffer.index()],
                offset: 0,
                size: NonZeroU64::new(size),
            }),
            BindingResource::Texture(texture) | BindingResource::StorageTexture(texture) => {
                wgpu::BindingResource::TextureView(&self.textures[texture.index()].view)
            }
            BindingResource::Buffer(buffer) => self.buffers[buffer.index()].as_entire_binding(),
            BindingResource::Sampler(sampler) => wgpu::BindingResource::Sampler(&self.samplers[sampler.index()]),
        };
        wgpu::BindGroupEntry {
            binding: entry.binding,
            resource,
        }
    }

    /// Replays `commands` onto `encoder`.
    ///
    /// wgpu tracks resource usage itself, so barriers only show up in the
    /// trace log. Each dispatch gets its own compute pass and each draw its own
    /// render pass that loads the existing target contents.
    pub fn encode(
        &self,
        commands: &CommandList,
        encoder: &mut wgpu::CommandEncoder,
        target: Option<&RenderTarget<'_>>,
    ) {
        for command in commands.commands() {
            match command {
                Command::Barrier(transitions) => {
                    for transition in transitions {
                        log::trace!(
                            "barrier {:?}: {:?} -> {:?}",
                            transition.resource,
                            transition.before,
                            transition.after
                        );
                    }
                }
                Command::CopyBuffer { src, dst, size } => {
                    encoder.copy_buffer_to_buffer(
                        &self.buffers[src.index()],
                        0,
                        &self.buffers[dst.index()],
                        0,
                        *size,
                    );
                }
                Command::Dispatch { label, pipeline, tables, groups } => {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(*label),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&self.compute_pipelines[pipeline.index()]);
                    for bound in tables {
                        pass.set_bind_group(bound.index, &self.bind_groups[bound.table.index()], &bound.dynamic_offsets);
                    }
                    pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                }
                Command::Draw { label, pipeline, tables, vertices, instances } => {
                    let Some(target) = target else {
                        log::warn!("draw `{label}` recorded without a render target, skipping");
                        continue;
                    };
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(*label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target.color,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: target.depth.map(|view| {
                            wgpu::RenderPassDepthStencilAttachment {
                                view,
                                depth_ops: Some(wgpu::Operations {
                                    load: wgpu::LoadOp::Load,
                                    store: wgpu::StoreOp::Store,
                                }),
                                stencil_ops: None,
                            }
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(&self.render_pipelines[pipeline.index()]);
                    for bound in tables {
                        pass.set_bind_group(bound.index, &self.bind_groups[bound.table.index()], &bound.dynamic_offsets);
                    }
                    pass.draw(vertices.clone(), instances.clone());
                }
            }
        }
    }

    fn fragment_targets(desc: &RenderPipelineDesc) -> [Option<wgpu::ColorTargetState>; 1] {
        [Some(wgpu::ColorTargetState {
            format: desc.color_format,
            blend: desc.blend,
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let extent = desc.extent;
        let texture = self
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: wgpu::Extent3d {
                        width: extent.x(),
                        height: extent.y(),
                        depth_or_array_layers: extent.z(),
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D3,
                    format: desc.format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(|reason| FluidError::ResourceCreation { label: desc.label.clone(), reason })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.push(FieldTexture { _texture: texture, view });
        Ok(TextureHandle(self.textures.len() as u32 - 1))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let usage = match desc.usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
            BufferUsage::Upload => wgpu::BufferUsages::COPY_SRC,
        };
        let buffer = self
            .scoped(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&desc.label),
                    size: desc.size,
                    usage,
                    mapped_at_creation: false,
                })
            })
            .map_err(|reason| FluidError::ResourceCreation { label: desc.label.clone(), reason })?;
        self.buffers.push(buffer);
        Ok(BufferHandle(self.buffers.len() as u32 - 1))
    }

    fn create_staging_buffer(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle> {
        let buffer = self
            .scoped(|device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::COPY_SRC,
                })
            })
            .map_err(|reason| FluidError::ResourceCreation { label: label.to_owned(), reason })?;
        self.buffers.push(buffer);
        Ok(BufferHandle(self.buffers.len() as u32 - 1))
    }

    fn create_sampler(&mut self, preset: SamplerPreset) -> Result<SamplerHandle> {
        let (label, address_mode) = match preset {
            SamplerPreset::LinearMirror => ("LinearMirror", wgpu::AddressMode::MirrorRepeat),
            SamplerPreset::LinearClamp => ("LinearClamp", wgpu::AddressMode::ClampToEdge),
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        self.samplers.push(sampler);
        Ok(SamplerHandle(self.samplers.len() as u32 - 1))
    }

    fn create_binding_layout(&mut self, label: &str, slots: &[BindingSlot]) -> Result<BindingLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = slots.iter().map(Self::layout_entry).collect();
        let layout = self
            .scoped(|device| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &entries,
                })
            })
            .map_err(|reason| FluidError::BindingTable { label: label.to_owned(), reason })?;
        self.bind_group_layouts.push(layout);
        Ok(BindingLayoutHandle(self.bind_group_layouts.len() as u32 - 1))
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        tables: &[BindingLayoutHandle],
    ) -> Result<PipelineLayoutHandle> {
        let layouts: Vec<&wgpu::BindGroupLayout> =
            tables.iter().map(|handle| &self.bind_group_layouts[handle.index()]).collect();
        let layout = self
            .scoped(|device| {
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                })
            })
            .map_err(|reason| FluidError::Pipeline { label: label.to_owned(), reason })?;
        self.pipeline_layouts.push(layout);
        Ok(PipelineLayoutHandle(self.pipeline_layouts.len() as u32 - 1))
    }

    fn create_binding_table(
        &mut self,
        label: &str,
        layout: BindingLayoutHandle,
        entries: &[BindingEntry],
    ) -> Result<BindingTableHandle> {
        let group_entries: Vec<wgpu::BindGroupEntry<'_>> =
            entries.iter().map(|entry| self.bind_group_entry(entry)).collect();
        let group = self
            .scoped(|device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.bind_group_layouts[layout.index()],
                    entries: &group_entries,
                })
            })
            .map_err(|reason| FluidError::BindingTable { label: label.to_owned(), reason })?;
        self.bind_groups.push(group);
        Ok(BindingTableHandle(self.bind_groups.len() as u32 - 1))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<ComputePipelineHandle> {
        self.module(desc.module)?;
        let module = &self.modules[desc.module];
        let pipeline = self
            .scoped(|device| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&desc.label),
                    layout: Some(&self.pipeline_layouts[desc.layout.index()]),
                    module,
                    entry_point: desc.entry_point,
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
            .map_err(|reason| FluidError::Pipeline { label: desc.label.clone(), reason })?;
        self.compute_pipelines.push(pipeline);
        Ok(ComputePipelineHandle(self.compute_pipelines.len() as u32 - 1))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<RenderPipelineHandle> {
        let ShaderEntry { module: vertex_module, entry_point: vertex_entry } = desc.vertex;
        let ShaderEntry { module: fragment_module, entry_point: fragment_entry } = desc.fragment;
        self.module(vertex_module)?;
        self.module(fragment_module)?;

        let targets = Self::fragment_targets(desc);
        let pipeline = self
            .scoped(|device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&desc.label),
                    layout: Some(&self.pipeline_layouts[desc.layout.index()]),
                    vertex: wgpu::VertexState {
                        module: &self.modules[vertex_module],
                        entry_point: vertex_entry,
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.modules[fragment_module],
                        entry_point: fragment_entry,
                        targets: &targets,
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: desc.topology,
                        ..Default::default()
                    },
                    depth_stencil: desc.depth_format.map(|format| wgpu::DepthStencilState {
                        format,
                        depth_write_enabled: false,
                        depth_compare: wgpu::CompareFunction::Always,
                        stencil: Default::default(),
                        bias: Default::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
            .map_err(|reason| FluidError::Pipeline { label: desc.label.clone(), reason })?;
        self.render_pipelines.push(pipeline);
        Ok(RenderPipelineHandle(self.render_pipelines.len() as u32 - 1))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.queue.write_buffer(&self.buffers[buffer.index()], offset, data);
    }
}
