//! Particle Store: the structured buffer drawn in particle mode.

use bytemuck::{Pod, Zeroable};
use rand::Rng;

use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferHandle, BufferUsage, Command, CommandList, GpuDevice, ResourceState,
    Tracked,
};

/// `pos.y` of a particle that is parked off the grid, waiting to respawn.
pub const INACTIVE_Y: f32 = f32::MAX;

/// Must match `Particle` in `particle_update.wgsl` and `particle.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub pos: [f32; 3],
    pub lifetime: f32,
}

impl ParticleRecord {
    pub fn is_inactive(&self) -> bool {
        self.pos[1] == INACTIVE_Y
    }
}

/// Every particle starts parked with a wait time in `[0, count / 10000)`
/// seconds, so the population trickles in instead of spawning at once.
pub fn initial_particles(count: u32, rng: &mut impl Rng) -> Vec<ParticleRecord> {
    (0..count)
        .map(|_| ParticleRecord {
            pos: [0.0, INACTIVE_Y, 0.0],
            lifetime: rng.gen_range(0..count) as f32 / 10000.0,
        })
        .collect()
}

pub struct ParticleStore {
    buffer: Tracked<BufferHandle>,
    count: u32,
}

impl ParticleStore {
    /// Allocates the buffer and records the one-time upload of the initial
    /// records. The staging buffer goes into `uploaders` and must stay alive
    /// until `commands` has executed.
    pub fn create(
        device: &mut impl GpuDevice,
        count: u32,
        rng: &mut impl Rng,
        commands: &mut CommandList,
        uploaders: &mut Vec<BufferHandle>,
    ) -> Result<Self> {
        let size = (count as usize * std::mem::size_of::<ParticleRecord>()) as u64;
        let handle = device.create_buffer(&BufferDesc {
            label: "ParticleBuffer".to_owned(),
            size,
            usage: BufferUsage::Storage,
        })?;
        let mut buffer = Tracked::new(handle, ResourceState::Common);

        let particles = initial_particles(count, rng);
        let staging = device.create_staging_buffer("ParticleUpload", bytemuck::cast_slice(&particles))?;
        uploaders.push(staging);

        let mut barriers = Vec::new();
        buffer.transition(ResourceState::CopyDest, &mut barriers);
        commands.barrier(barriers);
        commands.push(Command::CopyBuffer { src: staging, dst: handle, size });

        log::debug!("particle store: {count} particles, {size} bytes");
        Ok(Self { buffer, count })
    }

    pub fn buffer(&self) -> &Tracked<BufferHandle> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Tracked<BufferHandle> {
        &mut self.buffer
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_particle_record_size() {
        // vec3<f32> + f32 packs into 16 bytes in WGSL storage layout
        assert_eq!(std::mem::size_of::<ParticleRecord>(), 16);
    }

    #[test]
    fn test_initial_particles_are_parked() {
        let mut rng = StdRng::seed_from_u64(7);
        let particles = initial_particles(2000, &mut rng);

        assert_eq!(particles.len(), 2000);
        for particle in &particles {
            assert!(particle.is_inactive());
            assert!(particle.lifetime >= 0.0);
            assert!(particle.lifetime < 2000.0 / 10000.0);
        }
    }

    #[test]
    fn test_lifetimes_are_staggered() {
        let mut rng = StdRng::seed_from_u64(11);
        let particles = initial_particles(10_000, &mut rng);
        let first = particles[0].lifetime;
        assert!(particles.iter().any(|p| p.lifetime != first));
    }
}
