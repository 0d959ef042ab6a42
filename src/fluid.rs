//! The simulator facade the host drives once per frame.

use glam::UVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{FluidError, Result};
use crate::fields::FieldStore;
use crate::gpu::{BufferHandle, CommandList, GpuDevice};
use crate::grid::{div_up, GridExtent, PresentationMode, MAX_GROUPS_PER_DIMENSION};
use crate::params::{Camera, ParamRing, PerFrameParams};
use crate::particles::ParticleStore;
use crate::pipelines::{FieldTables, RenderFormats, SharedLayouts};
use crate::presentation::{ColorVisualizer, ParticleRenderer, Presentation, RayCaster, PARTICLE_GROUP_SIZE};
use crate::simulation::SimulationStage;

/// Everything fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluidDesc {
    pub grid: GridExtent,
    pub num_particles: u32,
    pub formats: RenderFormats,
    pub viewport: UVec2,
    pub frames_in_flight: u32,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
}

pub struct Fluid {
    fields: FieldStore,
    per_frame: ParamRing,
    tables: FieldTables,
    simulation: SimulationStage,
    presentation: Presentation,
    rng: StdRng,
    elapsed: f32,
    seed: u32,
    time_step: f32,
}

impl Fluid {
    /// Builds every resource, table and pipeline the selected mode needs.
    ///
    /// Upload work (the initial particle records) is recorded into
    /// `commands`; the staging buffers it reads are pushed onto `uploaders`
    /// and must outlive the submission of `commands`. The first failing step
    /// aborts initialization.
    pub fn init(
        device: &mut impl GpuDevice,
        commands: &mut CommandList,
        uploaders: &mut Vec<BufferHandle>,
        desc: &FluidDesc,
    ) -> Result<Self> {
        if desc.frames_in_flight == 0 {
            return Err(FluidError::InvalidSettings("frames_in_flight must be at least 1".to_owned()));
        }
        let particle_groups = div_up(desc.num_particles, PARTICLE_GROUP_SIZE);
        if particle_groups > MAX_GROUPS_PER_DIMENSION {
            return Err(FluidError::InvalidSettings(format!(
                "{} particles need {particle_groups} update groups, more than the {MAX_GROUPS_PER_DIMENSION} a dispatch allows",
                desc.num_particles
            )));
        }

        let extent = desc.grid;
        let mode = PresentationMode::select(extent, desc.num_particles);
        let mut rng = match desc.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let fields = FieldStore::create(device, extent, commands)?;
        let per_frame = ParamRing::for_block::<PerFrameParams>(device, "PerFrameParams", desc.frames_in_flight)?;
        let layouts = SharedLayouts::create(device)?;
        let tables = FieldTables::create(device, &layouts, &fields, &per_frame)?;
        let simulation = SimulationStage::create(device, &layouts, extent)?;

        let presentation = match mode {
            PresentationMode::Particles => {
                let store = ParticleStore::create(device, desc.num_particles, &mut rng, commands, uploaders)?;
                Presentation::Particles(ParticleRenderer::create(
                    device,
                    &layouts,
                    desc.formats,
                    &per_frame,
                    desc.frames_in_flight,
                    store,
                    extent.is_volumetric(),
                )?)
            }
            PresentationMode::RayCast => Presentation::RayCast(RayCaster::create(
                device,
                &layouts,
                desc.formats,
                desc.frames_in_flight,
                desc.viewport,
            )?),
            PresentationMode::Visualize2D => {
                Presentation::Visualize2D(ColorVisualizer::create(device, &layouts, desc.formats)?)
            }
        };

        log::info!(
            "fluid: {}x{}x{} grid, {} mode, {} particles, {} frames in flight, step {:.5}s",
            extent.x(),
            extent.y(),
            extent.z(),
            mode.name(),
            desc.num_particles,
            desc.frames_in_flight,
            simulation.clock().nominal()
        );

        Ok(Self {
            fields,
            per_frame,
            tables,
            simulation,
            presentation,
            rng,
            elapsed: 0.0,
            seed: 0,
            time_step: 0.0,
        })
    }

    /// Takes this frame's host input and writes the per-object block.
    ///
    /// Any strictly positive `elapsed` flips the color parity.
    pub fn update_frame(&mut self, device: &impl GpuDevice, elapsed: f32, frame_index: u32, camera: &Camera) {
        if elapsed > 0.0 {
            self.fields.flip_parity();
        }
        self.elapsed = elapsed;
        self.seed = self.rng.gen();
        self.presentation.update_object(device, frame_index, camera);
    }

    /// Gates the elapsed time through the fixed-step clock, uploads the
    /// per-frame block and records advection and projection.
    pub fn simulate(&mut self, device: &impl GpuDevice, frame_index: u32, commands: &mut CommandList) {
        let elapsed = std::mem::take(&mut self.elapsed);
        self.time_step = self.simulation.gate(elapsed);
        self.per_frame
            .write(device, frame_index, &PerFrameParams::new(self.time_step, self.seed, elapsed));
        self.simulation.record(
            &mut self.fields,
            &self.tables,
            self.per_frame.dynamic_offset(frame_index),
            commands,
        );
    }

    /// Records the presentation draw over the just-updated fields.
    pub fn render(&mut self, frame_index: u32, commands: &mut CommandList) {
        self.presentation
            .record(&mut self.fields, &self.tables, &self.per_frame, frame_index, commands);
    }

    pub fn mode(&self) -> PresentationMode {
        self.presentation.mode()
    }

    pub fn extent(&self) -> GridExtent {
        self.fields.extent()
    }

    pub fn parity(&self) -> usize {
        self.fields.parity()
    }

    /// Step the last `simulate` ran the kernels with.
    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    pub fn per_frame(&self) -> &ParamRing {
        &self.per_frame
    }

    pub fn tables(&self) -> &FieldTables {
        &self.tables
    }

    pub fn simulation(&self) -> &SimulationStage {
        &self.simulation
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }
}
