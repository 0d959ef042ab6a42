//! Simulation Stage: advection followed by projection, once per frame.
//!
//! Both dispatches are recorded every frame, even when the fixed-step clock
//! hands out a zero step, so the GPU sees the same work and hazards each frame.

use crate::clock::FixedStepClock;
use crate::error::Result;
use crate::fields::{FieldStore, VELOCITY_CURRENT, VELOCITY_NEXT};
use crate::gpu::{BoundTable, Command, CommandList, GpuDevice, ResourceState, Transition};
use crate::grid::GridExtent;
use crate::pipelines::{self, FieldTables, SharedLayouts, SimulationPipelines};

/// Barriers that must precede advection.
///
/// The current velocity and the color read half become readable; the next
/// velocity and the active color half become writable.
pub fn advection_barriers(fields: &mut FieldStore) -> Vec<Transition> {
    let mut barriers = Vec::with_capacity(4);
    fields
        .velocity_mut(VELOCITY_CURRENT)
        .transition(ResourceState::ComputeRead, &mut barriers);
    fields
        .velocity_mut(VELOCITY_NEXT)
        .transition(ResourceState::UnorderedAccess, &mut barriers);
    let colors = fields.colors_mut();
    let read = colors.read_index();
    colors.write_mut().transition(ResourceState::UnorderedAccess, &mut barriers);
    colors.slot_mut(read).transition(ResourceState::ShaderRead, &mut barriers);
    barriers
}

/// Barriers that must precede projection.
///
/// Velocity roles swap, and the freshly advected color half is handed to the
/// presentation pass.
pub fn projection_barriers(fields: &mut FieldStore) -> Vec<Transition> {
    let mut barriers = Vec::with_capacity(3);
    fields
        .velocity_mut(VELOCITY_CURRENT)
        .transition(ResourceState::UnorderedAccess, &mut barriers);
    fields
        .velocity_mut(VELOCITY_NEXT)
        .transition(ResourceState::ComputeRead, &mut barriers);
    fields
        .colors_mut()
        .write_mut()
        .transition(ResourceState::ShaderRead, &mut barriers);
    barriers
}

pub struct SimulationStage {
    clock: FixedStepClock,
    pipelines: SimulationPipelines,
    advection_groups: [u32; 3],
    projection_groups: [u32; 3],
}

impl SimulationStage {
    pub fn create(device: &mut impl GpuDevice, layouts: &SharedLayouts, extent: GridExtent) -> Result<Self> {
        let pipelines = pipelines::create_simulation_pipelines(device, layouts, extent)?;
        Ok(Self {
            clock: FixedStepClock::for_grid(extent.is_volumetric()),
            pipelines,
            advection_groups: extent.advection_groups(),
            projection_groups: extent.projection_groups(),
        })
    }

    pub fn clock(&self) -> &FixedStepClock {
        &self.clock
    }

    pub fn advection_groups(&self) -> [u32; 3] {
        self.advection_groups
    }

    pub fn projection_groups(&self) -> [u32; 3] {
        self.projection_groups
    }

    /// Feeds `elapsed` into the clock and returns the step the kernels run with.
    pub fn gate(&mut self, elapsed: f32) -> f32 {
        self.clock.advance(elapsed)
    }

    /// Records one tick: barriers, advection, barriers, projection.
    pub fn record(
        &self,
        fields: &mut FieldStore,
        tables: &FieldTables,
        per_frame_offset: u32,
        commands: &mut CommandList,
    ) {
        let parity = fields.parity();
        let per_frame = BoundTable::with_offsets(0, tables.per_frame, vec![per_frame_offset]);

        commands.barrier(advection_barriers(fields));
        commands.push(Command::Dispatch {
            label: "Advection",
            pipeline: self.pipelines.advect,
            tables: vec![
                per_frame.clone(),
                BoundTable::new(1, tables.velocity[0]),
                BoundTable::new(2, tables.linear_mirror),
                BoundTable::new(3, tables.color_pair[parity]),
            ],
            groups: self.advection_groups,
        });

        commands.barrier(projection_barriers(fields));
        commands.push(Command::Dispatch {
            label: "Projection",
            pipeline: self.pipelines.project,
            tables: vec![
                per_frame,
                BoundTable::new(1, tables.velocity[1]),
                BoundTable::new(2, tables.scratch),
            ],
            groups: self.projection_groups,
        });

        log::trace!(
            "simulate: parity {parity}, advect {:?}, project {:?}",
            self.advection_groups,
            self.projection_groups
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::RecordingDevice;
    use crate::gpu::ResourceId;

    fn field_store(extent: GridExtent) -> FieldStore {
        let mut device = RecordingDevice::new();
        FieldStore::create(&mut device, extent, &mut CommandList::new()).unwrap()
    }

    #[test]
    fn test_first_advection_barriers() {
        let mut fields = field_store(GridExtent::new(16, 16, 16).unwrap());
        let v0 = ResourceId::Texture(fields.velocity(0).handle());
        let v1 = ResourceId::Texture(fields.velocity(1).handle());
        let write = ResourceId::Texture(fields.colors().write().handle());
        let read = ResourceId::Texture(fields.colors().read().handle());

        let targets: Vec<_> = advection_barriers(&mut fields).iter().map(Transition::target).collect();
        assert_eq!(
            targets,
            vec![
                (v0, ResourceState::ComputeRead),
                (v1, ResourceState::UnorderedAccess),
                (write, ResourceState::UnorderedAccess),
                (read, ResourceState::ShaderRead),
            ]
        );
    }

    #[test]
    fn test_projection_swaps_velocity_roles() {
        let mut fields = field_store(GridExtent::new(16, 16, 16).unwrap());
        advection_barriers(&mut fields);
        let barriers = projection_barriers(&mut fields);

        assert_eq!(barriers.len(), 3);
        assert_eq!(barriers[0].before, ResourceState::ComputeRead);
        assert_eq!(barriers[0].after, ResourceState::UnorderedAccess);
        assert_eq!(barriers[1].before, ResourceState::UnorderedAccess);
        assert_eq!(barriers[1].after, ResourceState::ComputeRead);
        assert_eq!(barriers[2].after, ResourceState::ShaderRead);
    }

    #[test]
    fn test_steady_state_after_flip() {
        let mut fields = field_store(GridExtent::new(16, 16, 1).unwrap());
        advection_barriers(&mut fields);
        projection_barriers(&mut fields);
        fields.flip_parity();

        // The color half projection just exposed is now the read half and is
        // already readable; the other half has to become writable again.
        let barriers = advection_barriers(&mut fields);
        let color_targets: Vec<_> = barriers
            .iter()
            .filter(|t| t.resource == ResourceId::Texture(fields.colors().write().handle()))
            .collect();
        assert_eq!(color_targets.len(), 1);
        assert_eq!(color_targets[0].after, ResourceState::UnorderedAccess);
        assert!(barriers
            .iter()
            .all(|t| t.resource != ResourceId::Texture(fields.colors().read().handle())));
    }
}
