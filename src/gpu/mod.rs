//! The simulator's view of the GPU.
//!
//! Everything the core needs from a device goes through [`GpuDevice`]: create
//! textures and buffers, build layouts and binding tables, compile kernels,
//! upload bytes. Per-frame work is recorded into a [`CommandList`] owned by the
//! caller, which later replays it on a real encoder (see
//! [`wgpu_device::WgpuDevice::encode`]) or inspects it directly in tests.

pub mod recording;
pub mod wgpu_device;

use std::ops::Range;

use crate::error::Result;
use crate::grid::GridExtent;

/// Uniform slots are addressed with dynamic offsets, which must be aligned to this.
pub const UNIFORM_SLOT_ALIGNMENT: u64 = 256;

macro_rules! handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u32);

            impl $name {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

handles!(
    TextureHandle,
    BufferHandle,
    SamplerHandle,
    BindingLayoutHandle,
    PipelineLayoutHandle,
    /// A bind group: an immutable set of resources exposed to a kernel.
    BindingTableHandle,
    ComputePipelineHandle,
    RenderPipelineHandle,
);

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub extent: GridExtent,
    pub format: wgpu::TextureFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// CPU-written constants, one slot per frame in flight.
    Uniform,
    /// GPU read-write structured data.
    Storage,
    /// CPU-filled copy source for one-time uploads.
    Upload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPreset {
    LinearMirror,
    LinearClamp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingKind {
    /// Uniform block selected per draw/dispatch with a dynamic offset.
    UniformDynamic { size: u64 },
    SampledTexture3d,
    StorageTexture3d { format: wgpu::TextureFormat },
    StorageBuffer { read_only: bool },
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: BindingKind,
    pub visibility: wgpu::ShaderStages,
}

impl BindingSlot {
    pub fn new(binding: u32, kind: BindingKind, visibility: wgpu::ShaderStages) -> Self {
        Self { binding, kind, visibility }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    Uniform { buffer: BufferHandle, size: u64 },
    Texture(TextureHandle),
    StorageTexture(TextureHandle),
    Buffer(BufferHandle),
    Sampler(SamplerHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

impl BindingEntry {
    pub fn new(binding: u32, resource: BindingResource) -> Self {
        Self { binding, resource }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDesc {
    pub label: String,
    pub layout: PipelineLayoutHandle,
    pub module: &'static str,
    pub entry_point: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderEntry {
    pub module: &'static str,
    pub entry_point: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPipelineDesc {
    pub label: String,
    pub layout: PipelineLayoutHandle,
    pub vertex: ShaderEntry,
    pub fragment: ShaderEntry,
    pub topology: wgpu::PrimitiveTopology,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub blend: Option<wgpu::BlendState>,
}

/// Device services the simulator borrows from the host.
///
/// Creation calls are fallible and only happen during initialization;
/// `write_buffer` is the only per-frame call and cannot fail.
pub trait GpuDevice {
    fn create_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;

    /// CPU-visible buffer pre-filled with `contents`, used as a copy source.
    fn create_staging_buffer(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle>;

    fn create_sampler(&mut self, preset: SamplerPreset) -> Result<SamplerHandle>;

    fn create_binding_layout(
        &mut self,
        label: &str,
        slots: &[BindingSlot],
    ) -> Result<BindingLayoutHandle>;

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        tables: &[BindingLayoutHandle],
    ) -> Result<PipelineLayoutHandle>;

    fn create_binding_table(
        &mut self,
        label: &str,
        layout: BindingLayoutHandle,
        entries: &[BindingEntry],
    ) -> Result<BindingTableHandle>;

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<ComputePipelineHandle>;

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc) -> Result<RenderPipelineHandle>;

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

impl From<TextureHandle> for ResourceId {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}

impl From<BufferHandle> for ResourceId {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

/// Access state a resource must be in before the next GPU operation uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    CopyDest,
    /// Readable from compute and vertex stages.
    ComputeRead,
    /// Readable from every stage, including the pixel stage.
    ShaderRead,
    UnorderedAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Transition {
    /// The (resource, required state) pair this barrier establishes.
    pub fn target(&self) -> (ResourceId, ResourceState) {
        (self.resource, self.after)
    }
}

/// A resource handle together with the state the command stream left it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked<H> {
    handle: H,
    state: ResourceState,
}

impl<H: Copy + Into<ResourceId>> Tracked<H> {
    pub fn new(handle: H, state: ResourceState) -> Self {
        Self { handle, state }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Queues a barrier into `barriers` only when the state actually changes.
    pub fn transition(&mut self, after: ResourceState, barriers: &mut Vec<Transition>) {
        if self.state == after {
            return;
        }
        barriers.push(Transition {
            resource: self.handle.into(),
            before: self.state,
            after,
        });
        self.state = after;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTable {
    pub index: u32,
    pub table: BindingTableHandle,
    pub dynamic_offsets: Vec<u32>,
}

impl BoundTable {
    pub fn new(index: u32, table: BindingTableHandle) -> Self {
        Self { index, table, dynamic_offsets: Vec::new() }
    }

    pub fn with_offsets(index: u32, table: BindingTableHandle, dynamic_offsets: Vec<u32>) -> Self {
        Self { index, table, dynamic_offsets }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Barrier(Vec<Transition>),
    Dispatch {
        label: &'static str,
        pipeline: ComputePipelineHandle,
        tables: Vec<BoundTable>,
        groups: [u32; 3],
    },
    Draw {
        label: &'static str,
        pipeline: RenderPipelineHandle,
        tables: Vec<BoundTable>,
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
}

/// Caller-owned command stream the simulator records into.
#[derive(Debug, Default, Clone)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a barrier batch; an empty batch records nothing.
    pub fn barrier(&mut self, transitions: Vec<Transition>) {
        if !transitions.is_empty() {
            self.commands.push(Command::Barrier(transitions));
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}
