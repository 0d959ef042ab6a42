use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use glam::Vec3;

use fluidx::gpu::wgpu_device::{RenderTarget, WgpuDevice};
use fluidx::gpu::CommandList;
use fluidx::shaders::{EmbeddedKernels, KernelDirectory, KernelSource};
use fluidx::{Camera, Fluid, FluidSettings, RenderFormats};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct Offscreen {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl Offscreen {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self {
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            color,
            width,
            height,
        }
    }

    fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn target(&self) -> RenderTarget<'_> {
        RenderTarget { color: &self.color_view, depth: Some(&self.depth_view) }
    }

    fn save_png(&self, device: &wgpu::Device, queue: &wgpu::Queue, path: &Path) -> anyhow::Result<()> {
        let unpadded = self.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Snapshot Readback"),
            size: (padded * self.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Snapshot Encoder"),
        });
        encoder.copy_texture_to_buffer(
            self.color.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
        queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .context("snapshot readback was dropped")?
            .context("mapping snapshot readback")?;

        let mut pixels = Vec::with_capacity((unpadded * self.height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        readback.unmap();

        let image = image::RgbaImage::from_raw(self.width, self.height, pixels)
            .context("snapshot size mismatch")?;
        image
            .save(path)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        log::info!("wrote snapshot to {}", path.display());
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let settings = FluidSettings::from_args(&args)?;

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .context("no suitable GPU adapter")?;
    log::info!("adapter: {}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Fluid Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
        },
        None,
    ))
    .context("requesting GPU device")?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let kernels: Box<dyn KernelSource> = match &settings.kernel_dir {
        Some(dir) => Box::new(KernelDirectory::new(dir)),
        None => Box::new(EmbeddedKernels),
    };
    let mut gpu = WgpuDevice::new(device.clone(), queue.clone(), kernels);

    let [width, height] = settings.viewport;
    let offscreen = Offscreen::new(&device, width, height);
    let formats = RenderFormats { color: COLOR_FORMAT, depth: Some(DEPTH_FORMAT) };
    let desc = settings.fluid_desc(formats)?;

    let mut commands = CommandList::new();
    let mut uploaders = Vec::new();
    let mut fluid = Fluid::init(&mut gpu, &mut commands, &mut uploaders, &desc)?;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Upload Encoder"),
    });
    gpu.encode(&commands, &mut encoder, None);
    queue.submit(Some(encoder.finish()));
    device.poll(wgpu::Maintain::Wait);
    gpu.release_uploads(&mut uploaders);

    let eye = if desc.grid.is_volumetric() {
        Vec3::new(0.0, 0.0, -35.0)
    } else {
        Vec3::new(0.0, 0.0, -25.0)
    };
    let camera = Camera::looking_at_origin(eye, width as f32 / height as f32);

    let start = std::time::Instant::now();
    for frame in 0..settings.frames {
        let frame_index = frame % desc.frames_in_flight;
        commands.clear();
        fluid.update_frame(&gpu, settings.frame_time, frame_index, &camera);
        fluid.simulate(&gpu, frame_index, &mut commands);
        fluid.render(frame_index, &mut commands);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        offscreen.clear(&mut encoder);
        gpu.encode(&commands, &mut encoder, Some(&offscreen.target()));
        queue.submit(Some(encoder.finish()));

        // Don't let the CPU run more than a ring's worth of frames ahead.
        if frame_index + 1 == desc.frames_in_flight {
            device.poll(wgpu::Maintain::Wait);
        }
    }
    device.poll(wgpu::Maintain::Wait);
    log::info!(
        "ran {} frames in {:.2?} ({} mode, last step {:.5}s)",
        settings.frames,
        start.elapsed(),
        fluid.mode().name(),
        fluid.time_step()
    );

    if let Some(path) = &settings.snapshot {
        offscreen.save_png(&device, &queue, path)?;
    }
    Ok(())
}
