//! A [`GpuDevice`] with no GPU behind it.
//!
//! Every request is validated the way a real device would (kernel modules
//! must exist, binding tables must match their layout, writes must stay in
//! bounds) and then remembered, so tests and dry runs can inspect exactly
//! what the simulator asked for.

use std::cell::RefCell;

use super::{
    BindingEntry, BindingKind, BindingLayoutHandle, BindingResource, BindingSlot,
    BindingTableHandle, BufferDesc, BufferHandle, BufferUsage, ComputePipelineDesc,
    ComputePipelineHandle, GpuDevice, PipelineLayoutHandle, RenderPipelineDesc,
    RenderPipelineHandle, SamplerHandle, SamplerPreset, TextureDesc, TextureHandle,
};
use crate::error::{FluidError, Result};
use crate::shaders::{EmbeddedKernels, KernelSource};

/// wgpu's default `max_bind_groups`.
pub const MAX_BINDING_TABLES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferWrite {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLayout {
    pub label: String,
    pub slots: Vec<BindingSlot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPipelineLayout {
    pub label: String,
    pub tables: Vec<BindingLayoutHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTable {
    pub label: String,
    pub layout: BindingLayoutHandle,
    pub entries: Vec<BindingEntry>,
}

pub struct RecordingDevice {
    pub textures: Vec<TextureDesc>,
    pub buffers: Vec<BufferDesc>,
    /// Initial contents of upload buffers, by buffer index.
    pub uploads: Vec<(BufferHandle, Vec<u8>)>,
    pub samplers: Vec<SamplerPreset>,
    pub binding_layouts: Vec<RecordedLayout>,
    pub pipeline_layouts: Vec<RecordedPipelineLayout>,
    pub binding_tables: Vec<RecordedTable>,
    pub compute_pipelines: Vec<ComputePipelineDesc>,
    pub render_pipelines: Vec<RenderPipelineDesc>,
    writes: RefCell<Vec<BufferWrite>>,
    kernels: Box<dyn KernelSource>,
    failing_module: Option<String>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::with_kernels(Box::new(EmbeddedKernels))
    }

    pub fn with_kernels(kernels: Box<dyn KernelSource>) -> Self {
        Self {
            textures: Vec::new(),
            buffers: Vec::new(),
            uploads: Vec::new(),
            samplers: Vec::new(),
            binding_layouts: Vec::new(),
            pipeline_layouts: Vec::new(),
            binding_tables: Vec::new(),
            compute_pipelines: Vec::new(),
            render_pipelines: Vec::new(),
            writes: RefCell::new(Vec::new()),
            kernels,
            failing_module: None,
        }
    }

    /// Makes every pipeline that uses `module` fail to compile.
    pub fn fail_module(mut self, module: &str) -> Self {
        self.failing_module = Some(module.to_owned());
        self
    }

    pub fn texture(&self, handle: TextureHandle) -> &TextureDesc {
        &self.textures[handle.index()]
    }

    pub fn buffer(&self, handle: BufferHandle) -> &BufferDesc {
        &self.buffers[handle.index()]
    }

    pub fn buffer_by_label(&self, label: &str) -> Option<&BufferDesc> {
        self.buffers.iter().find(|desc| desc.label == label)
    }

    pub fn table(&self, handle: BindingTableHandle) -> &RecordedTable {
        &self.binding_tables[handle.index()]
    }

    pub fn upload_contents(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.uploads
            .iter()
            .find(|(buffer, _)| *buffer == handle)
            .map(|(_, data)| data.as_slice())
    }

    pub fn writes(&self) -> Vec<BufferWrite> {
        self.writes.borrow().clone()
    }

    /// Most recent bytes written at exactly `offset` of `buffer`.
    pub fn last_write(&self, buffer: BufferHandle, offset: u64) -> Option<Vec<u8>> {
        self.writes
            .borrow()
            .iter()
            .rev()
            .find(|write| write.buffer == buffer && write.offset == offset)
            .map(|write| write.data.clone())
    }

    pub fn clear_writes(&self) {
        self.writes.borrow_mut().clear();
    }

    fn compile(&self, label: &str, module: &str, entry_point: &str) -> Result<()> {
        let source = self.kernels.load(module)?;
        if self.failing_module.as_deref() == Some(module) {
            return Err(FluidError::Pipeline {
                label: label.to_owned(),
                reason: format!("module `{module}` failed to compile"),
            });
        }
        if !source.contains(&format!("fn {entry_point}(")) {
            return Err(FluidError::Pipeline {
                label: label.to_owned(),
                reason: format!("module `{module}` has no entry point `{entry_point}`"),
            });
        }
        Ok(())
    }

    fn check_pipeline_layout(&self, label: &str, layout: PipelineLayoutHandle) -> Result<()> {
        if layout.index() >= self.pipeline_layouts.len() {
            return Err(FluidError::Pipeline {
                label: label.to_owned(),
                reason: format!("unknown pipeline layout {}", layout.0),
            });
        }
        Ok(())
    }

    fn check_resource(&self, label: &str, slot: &BindingSlot, resource: &BindingResource) -> Result<()> {
        let mismatch = |what: &str| FluidError::BindingTable {
            label: label.to_owned(),
            reason: format!("binding {} expects {what}, got {resource:?}", slot.binding),
        };
        match (slot.kind, resource) {
            (BindingKind::UniformDynamic { size }, BindingResource::Uniform { buffer, size: bound }) => {
                let desc = self.buffers.get(buffer.index()).ok_or_else(|| mismatch("a known buffer"))?;
                if desc.usage != BufferUsage::Uniform || *bound != size {
                    return Err(mismatch("a uniform block of matching size"));
                }
            }
            (BindingKind::SampledTexture3d, BindingResource::Texture(texture)) => {
                if texture.index() >= self.textures.len() {
                    return Err(mismatch("a known texture"));
                }
            }
            (BindingKind::StorageTexture3d { format }, BindingResource::StorageTexture(texture)) => {
                let desc = self.textures.get(texture.index()).ok_or_else(|| mismatch("a known texture"))?;
                if desc.format != format {
                    return Err(mismatch("a storage texture of matching format"));
                }
            }
            (BindingKind::StorageBuffer { .. }, BindingResource::Buffer(buffer)) => {
                let desc = self.buffers.get(buffer.index()).ok_or_else(|| mismatch("a known buffer"))?;
                if desc.usage != BufferUsage::Storage {
                    return Err(mismatch("a storage buffer"));
                }
            }
            (BindingKind::Sampler, BindingResource::Sampler(sampler)) => {
                if sampler.index() >= self.samplers.len() {
                    return Err(mismatch("a known sampler"));
                }
            }
            _ => return Err(mismatch(&format!("{:?}", slot.kind))),
        }
        Ok(())
    }
}

impl GpuDevice for RecordingDevice {
    fn create_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        self.textures.push(desc.clone());
        Ok(TextureHandle(self.textures.len() as u32 - 1))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(FluidError::ResourceCreation {
                label: desc.label.clone(),
                reason: "zero-sized buffer".to_owned(),
            });
        }
        self.buffers.push(desc.clone());
        Ok(BufferHandle(self.buffers.len() as u32 - 1))
    }

    fn create_staging_buffer(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle> {
        let handle = self.create_buffer(&BufferDesc {
            label: label.to_owned(),
            size: contents.len() as u64,
            usage: BufferUsage::Upload,
        })?;
        self.uploads.push((handle, contents.to_vec()));
        Ok(handle)
    }

    fn create_sampler(&mut self, preset: SamplerPreset) -> Result<SamplerHandle> {
        self.samplers.push(preset);
        Ok(SamplerHandle(self.samplers.len() as u32 - 1))
    }

    fn create_binding_layout(&mut self, label: &str, slots: &[BindingSlot]) -> Result<BindingLayoutHandle> {
        self.binding_layouts.push(RecordedLayout {
            label: label.to_owned(),
            slots: slots.to_vec(),
        });
        Ok(BindingLayoutHandle(self.binding_layouts.len() as u32 - 1))
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        tables: &[BindingLayoutHandle],
    ) -> Result<PipelineLayoutHandle> {
        if tables.len() > MAX_BINDING_TABLES {
            return Err(FluidError::Pipeline {
                label: label.to_owned(),
                reason: format!("{} binding tables exceed the limit of {MAX_BINDING_TABLES}", tables.len()),
            });
        }
        self.pipeline_layouts.push(RecordedPipelineLayout {
            label: label.to_owned(),
            tables: tables.to_vec(),
        });
        Ok(PipelineLayoutHandle(self.pipeline_layouts.len() as u32 - 1))
    }

    fn create_binding_table(
        &mut self,
        label: &str,
        layout: BindingLayoutHandle,
        entries: &[BindingEntry],
    ) -> Result<BindingTableHandle> {
        let slots = self
            .binding_layouts
            .get(layout.index())
            .map(|recorded| recorded.slots.clone())
            .ok_or_else(|| FluidError::BindingTable {
                label: label.to_owned(),
                reason: format!("unknown layout {}", layout.0),
            })?;
        if slots.len() != entries.len() {
            return Err(FluidError::BindingTable {
                label: label.to_owned(),
                reason: format!("layout has {} slots, {} entries given", slots.len(), entries.len()),
            });
        }
        for slot in &slots {
            let entry = entries
                .iter()
                .find(|entry| entry.binding == slot.binding)
                .ok_or_else(|| FluidError::BindingTable {
                    label: label.to_owned(),
                    reason: format!("binding {} not provided", slot.binding),
                })?;
            self.check_resource(label, slot, &entry.resource)?;
        }

        self.binding_tables.push(RecordedTable {
            label: label.to_owned(),
            layout,
            entries: entries.to_vec(),
        });
        Ok(BindingTableHandle(self.binding_tables.len() as u32 - 1))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<ComputePipelineHandle> {
        self.check_pipeline_layout(&desc.label, desc.layout)?;
        self.compile(&desc.label, desc.module, desc.entry_point)?;
        self.compute_pipelines.push(desc.clone());
        Ok(ComputePipelineHandle(self.compute_pipelines.len() as u32 - 1))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<RenderPipelineHandle> {
        self.check_pipeline_layout(&desc.label, desc.layout)?;
        self.compile(&desc.label, desc.vertex.module, desc.vertex.entry_point)?;
        self.compile(&desc.label, desc.fragment.module, desc.fragment.entry_point)?;
        self.render_pipelines.push(desc.clone());
        Ok(RenderPipelineHandle(self.render_pipelines.len() as u32 - 1))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let size = self.buffers[buffer.index()].size;
        assert!(
            offset + data.len() as u64 <= size,
            "write of {} bytes at {offset} overruns `{}` ({size} bytes)",
            data.len(),
            self.buffers[buffer.index()].label
        );
        self.writes.borrow_mut().push(BufferWrite {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BindingSlot;

    #[test]
    fn test_table_must_match_layout() {
        let mut device = RecordingDevice::new();
        let layout = device
            .create_binding_layout(
                "sampler",
                &[BindingSlot::new(0, BindingKind::Sampler, wgpu::ShaderStages::COMPUTE)],
            )
            .unwrap();
        let sampler = device.create_sampler(SamplerPreset::LinearClamp).unwrap();

        assert!(device
            .create_binding_table("ok", layout, &[BindingEntry::new(0, BindingResource::Sampler(sampler))])
            .is_ok());
        assert!(matches!(
            device.create_binding_table("empty", layout, &[]),
            Err(FluidError::BindingTable { .. })
        ));
    }

    #[test]
    fn test_failing_module() {
        let mut device = RecordingDevice::new().fail_module("advect");
        let layout = device.create_pipeline_layout("empty", &[]).unwrap();
        let result = device.create_compute_pipeline(&ComputePipelineDesc {
            label: "Advection".to_owned(),
            layout,
            module: "advect",
            entry_point: "main",
        });
        assert!(matches!(result, Err(FluidError::Pipeline { .. })));
    }

    #[test]
    fn test_missing_entry_point() {
        let mut device = RecordingDevice::new();
        let layout = device.create_pipeline_layout("empty", &[]).unwrap();
        let result = device.create_compute_pipeline(&ComputePipelineDesc {
            label: "Advection".to_owned(),
            layout,
            module: "advect",
            entry_point: "advect_main",
        });
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "overruns")]
    fn test_write_out_of_bounds() {
        let mut device = RecordingDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                label: "tiny".to_owned(),
                size: 4,
                usage: BufferUsage::Uniform,
            })
            .unwrap();
        device.write_buffer(buffer, 0, &[0u8; 8]);
    }
}
