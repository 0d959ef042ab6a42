//! Field Store: double-buffered velocity and color volumes plus the
//! incompressibility scratch volume.

use crate::error::Result;
use crate::gpu::{
    CommandList, GpuDevice, ResourceState, TextureDesc, TextureHandle, Tracked,
};
use crate::grid::GridExtent;

/// Half-precision RGBA, the native format of the vector fields.
pub const FIELD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const SCRATCH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Velocity slot holding the field the next tick starts from.
pub const VELOCITY_CURRENT: usize = 0;
/// Velocity slot advection writes and projection reads.
pub const VELOCITY_NEXT: usize = 1;

/// Two storage slots and a parity bit.
///
/// The slot at `parity` is the write half, the other is the read half.
/// Flipping the parity hands the freshly written half to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct PingPong<T> {
    slots: [T; 2],
    parity: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { slots: [first, second], parity: 0 }
    }

    pub fn parity(&self) -> usize {
        self.parity
    }

    pub fn read_index(&self) -> usize {
        self.parity ^ 1
    }

    pub fn write_index(&self) -> usize {
        self.parity
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read_index()]
    }

    pub fn write(&self) -> &T {
        &self.slots[self.write_index()]
    }

    pub fn write_mut(&mut self) -> &mut T {
        &mut self.slots[self.parity]
    }

    pub fn slot(&self, index: usize) -> &T {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }

    pub fn flip(&mut self) {
        self.parity ^= 1;
    }
}

pub struct FieldStore {
    extent: GridExtent,
    velocities: [Tracked<TextureHandle>; 2],
    colors: PingPong<Tracked<TextureHandle>>,
    incompress: Tracked<TextureHandle>,
}

impl FieldStore {
    /// Allocates both field pairs and the scratch volume. Contents start
    /// undefined; the scratch volume is moved to a writable state right away.
    pub fn create(
        device: &mut impl GpuDevice,
        extent: GridExtent,
        commands: &mut CommandList,
    ) -> Result<Self> {
        let mut create = |label: String, format| -> Result<Tracked<TextureHandle>> {
            let handle = device.create_texture_3d(&TextureDesc { label, extent, format })?;
            Ok(Tracked::new(handle, ResourceState::Common))
        };

        let velocities = [
            create("Velocity0".to_owned(), FIELD_FORMAT)?,
            create("Velocity1".to_owned(), FIELD_FORMAT)?,
        ];
        let colors = PingPong::new(
            create("Color0".to_owned(), FIELD_FORMAT)?,
            create("Color1".to_owned(), FIELD_FORMAT)?,
        );
        let mut incompress = create("Incompressibility".to_owned(), SCRATCH_FORMAT)?;

        let mut barriers = Vec::new();
        incompress.transition(ResourceState::UnorderedAccess, &mut barriers);
        commands.barrier(barriers);

        log::debug!(
            "field store: {}x{}x{} cells, {} bytes",
            extent.x(),
            extent.y(),
            extent.z(),
            Self::footprint(extent)
        );

        Ok(Self { extent, velocities, colors, incompress })
    }

    /// GPU memory taken by all five volumes.
    pub fn footprint(extent: GridExtent) -> u64 {
        let cells = extent.cell_count();
        let vector = 8;
        let scalar = 4;
        cells * (4 * vector + scalar)
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }

    pub fn velocity(&self, slot: usize) -> &Tracked<TextureHandle> {
        &self.velocities[slot]
    }

    pub fn velocity_mut(&mut self, slot: usize) -> &mut Tracked<TextureHandle> {
        &mut self.velocities[slot]
    }

    pub fn colors(&self) -> &PingPong<Tracked<TextureHandle>> {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut PingPong<Tracked<TextureHandle>> {
        &mut self.colors
    }

    /// Color slot advection writes this frame and presentation samples.
    pub fn active_color(&self) -> TextureHandle {
        self.colors.write().handle()
    }

    pub fn incompress(&self) -> &Tracked<TextureHandle> {
        &self.incompress
    }

    pub fn parity(&self) -> usize {
        self.colors.parity()
    }

    pub fn flip_parity(&mut self) {
        self.colors.flip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_parity_flip() {
        let mut field = PingPong::new(vec![0.0f32; 8], vec![0.0f32; 8]);
        let written: Vec<f32> = (0..8).map(|i| i as f32 * 0.5 - 1.0).collect();

        field.write_mut().copy_from_slice(&written);
        field.flip();

        assert_eq!(field.read(), &written);
        // The other half is untouched.
        assert!(field.write().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_halves_never_alias() {
        let mut field = PingPong::new('a', 'b');
        for _ in 0..5 {
            assert_ne!(field.read_index(), field.write_index());
            assert_ne!(field.read(), field.write());
            field.flip();
        }
    }

    #[test]
    fn test_double_flip_restores() {
        let mut field = PingPong::new(1u32, 2u32);
        let before = (field.parity(), *field.read(), *field.write());
        field.flip();
        field.flip();
        assert_eq!(before, (field.parity(), *field.read(), *field.write()));
    }

    #[test]
    fn test_footprint() {
        let extent = GridExtent::new(64, 64, 64).unwrap();
        assert_eq!(FieldStore::footprint(extent), 64 * 64 * 64 * 36);
    }
}
