//! Mesh data as it arrives from dumped scene descriptors, plus the narrow
//! GPU-upload surface the engine consumes: interleaved vertex bytes, an
//! attribute-presence mask and, once initialized, resident buffer
//! addresses.

use glam::{Vec2, Vec3};

use crate::driver::{BufferId, Driver, GpuAddress};

/// Byte size of one index element.
pub const INDEX_BYTE_SIZE: u32 = 4;

/// Vertex attribute binding indices, also used as bits in [`AttribMask`].
pub const ATTRIB_POSITION: u16 = 0;
pub const ATTRIB_COLOR: u16 = 1;
pub const ATTRIB_UV: u16 = 2;

/// Presence bitmask over the vertex attributes a mesh carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttribMask(pub u16);

impl AttribMask {
    pub const POSITION: AttribMask = AttribMask(1 << ATTRIB_POSITION);
    pub const COLOR: AttribMask = AttribMask(1 << ATTRIB_COLOR);
    pub const UV: AttribMask = AttribMask(1 << ATTRIB_UV);

    #[inline]
    pub fn contains(self, other: AttribMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn union(self, other: AttribMask) -> AttribMask {
        AttribMask(self.0 | other.0)
    }
}

/// Primitive topology of a mesh, in the driver's numeric encoding (the
/// same encoding the dumped descriptors use for `draw_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimitiveTopology {
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl PrimitiveTopology {
    pub fn from_raw(raw: u32) -> Option<PrimitiveTopology> {
        match raw {
            0 => Some(PrimitiveTopology::Points),
            1 => Some(PrimitiveTopology::Lines),
            2 => Some(PrimitiveTopology::LineLoop),
            3 => Some(PrimitiveTopology::LineStrip),
            4 => Some(PrimitiveTopology::Triangles),
            5 => Some(PrimitiveTopology::TriangleStrip),
            6 => Some(PrimitiveTopology::TriangleFan),
            _ => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Reduces strip/loop/fan variants to the class state capture cares
    /// about.
    pub fn class(self) -> TopologyClass {
        match self {
            PrimitiveTopology::Points => TopologyClass::Points,
            PrimitiveTopology::Lines | PrimitiveTopology::LineLoop | PrimitiveTopology::LineStrip => {
                TopologyClass::Lines
            }
            PrimitiveTopology::Triangles
            | PrimitiveTopology::TriangleStrip
            | PrimitiveTopology::TriangleFan => TopologyClass::Triangles,
        }
    }
}

/// Base draw-topology class a captured state is realized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyClass {
    Points,
    Lines,
    Triangles,
}

/// GPU side of an uploaded mesh: resident buffers and their addresses.
#[derive(Debug, Clone, Copy)]
pub struct MeshGpu {
    pub vertex_buffer: BufferId,
    pub vertex_address: GpuAddress,
    pub index_buffer: Option<BufferId>,
    pub index_address: Option<GpuAddress>,
}

impl Default for PrimitiveTopology {
    fn default() -> Self {
        PrimitiveTopology::Triangles
    }
}

/// CPU mesh data. Color and UV channels are optional; an empty index list
/// means non-indexed drawing.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    positions: Vec<Vec3>,
    colors: Vec<[u8; 4]>,
    uvs: Vec<Vec2>,
    indices: Vec<u32>,
    topology: PrimitiveTopology,
    staged: Option<Vec<u8>>,
    gpu: Option<MeshGpu>,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, topology: PrimitiveTopology) -> Self {
        Self {
            positions,
            topology,
            ..Default::default()
        }
    }

    pub fn with_colors(mut self, colors: Vec<[u8; 4]>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Self {
        self.uvs = uvs;
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn attrib_mask(&self) -> AttribMask {
        let mut mask = AttribMask::default();
        if !self.positions.is_empty() {
            mask = mask.union(AttribMask::POSITION);
        }
        if !self.colors.is_empty() {
            mask = mask.union(AttribMask::COLOR);
        }
        if !self.uvs.is_empty() {
            mask = mask.union(AttribMask::UV);
        }
        mask
    }

    /// Byte stride of one interleaved vertex given the attributes present.
    pub fn vertex_stride(&self) -> usize {
        let mask = self.attrib_mask();
        let mut stride = 0;
        if mask.contains(AttribMask::POSITION) {
            stride += core::mem::size_of::<Vec3>();
        }
        if mask.contains(AttribMask::COLOR) {
            stride += core::mem::size_of::<[u8; 4]>();
        }
        if mask.contains(AttribMask::UV) {
            stride += core::mem::size_of::<Vec2>();
        }
        stride
    }

    /// Packs the attribute channels into one interleaved vertex buffer.
    pub fn interleaved_vertex_data(&self) -> Vec<u8> {
        let mask = self.attrib_mask();
        let mut bytes = Vec::with_capacity(self.vertex_stride() * self.positions.len());
        for i in 0..self.positions.len() {
            if mask.contains(AttribMask::POSITION) {
                bytes.extend_from_slice(bytemuck::bytes_of(&self.positions[i]));
            }
            if mask.contains(AttribMask::COLOR) {
                bytes.extend_from_slice(&self.colors[i]);
            }
            if mask.contains(AttribMask::UV) {
                bytes.extend_from_slice(bytemuck::bytes_of(&self.uvs[i]));
            }
        }
        bytes
    }

    /// Precomputes the interleaved bytes so a later [`Mesh::upload`] does
    /// no CPU packing. Safe to run off-thread; upload itself is not.
    pub fn stage(&mut self) {
        if self.staged.is_none() && !self.positions.is_empty() {
            self.staged = Some(self.interleaved_vertex_data());
        }
    }

    /// Uploads vertex (and index) data into resident driver buffers and
    /// records their GPU addresses. Idempotent; empty meshes stay
    /// uninitialized.
    pub fn upload(&mut self, driver: &mut dyn Driver) {
        if self.gpu.is_some() || self.positions.is_empty() {
            return;
        }

        let vertex_bytes = match self.staged.take() {
            Some(bytes) => bytes,
            None => self.interleaved_vertex_data(),
        };

        let vertex_buffer = driver.create_buffer();
        driver.allocate_buffer(vertex_buffer, vertex_bytes.len() as u64);
        driver.write_buffer(vertex_buffer, 0, &vertex_bytes);
        let vertex_address = driver.make_buffer_resident(vertex_buffer);

        let (index_buffer, index_address) = if self.indexed() {
            let buffer = driver.create_buffer();
            let bytes: &[u8] = bytemuck::cast_slice(&self.indices);
            driver.allocate_buffer(buffer, bytes.len() as u64);
            driver.write_buffer(buffer, 0, bytes);
            let address = driver.make_buffer_resident(buffer);
            (Some(buffer), Some(address))
        } else {
            (None, None)
        };

        self.gpu = Some(MeshGpu {
            vertex_buffer,
            vertex_address,
            index_buffer,
            index_address,
        });
    }

    pub fn gpu(&self) -> Option<&MeshGpu> {
        self.gpu.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::splat(i as f32)).collect()
    }

    #[test]
    fn attrib_mask_tracks_present_channels() {
        let mesh = Mesh::new(positions(3), PrimitiveTopology::Lines);
        assert_eq!(mesh.attrib_mask(), AttribMask::POSITION);

        let mesh = mesh.with_colors(vec![[255, 0, 0, 255]; 3]);
        assert!(mesh.attrib_mask().contains(AttribMask::COLOR));
        assert!(!mesh.attrib_mask().contains(AttribMask::UV));
    }

    #[test]
    fn vertex_stride_follows_mask() {
        let mesh = Mesh::new(positions(2), PrimitiveTopology::Triangles);
        assert_eq!(mesh.vertex_stride(), 12);

        let mesh = mesh.with_colors(vec![[0; 4]; 2]);
        assert_eq!(mesh.vertex_stride(), 16);

        let mesh = mesh.with_uvs(vec![Vec2::ZERO; 2]);
        assert_eq!(mesh.vertex_stride(), 24);
    }

    #[test]
    fn interleaved_data_packs_per_vertex() {
        let mesh = Mesh::new(positions(2), PrimitiveTopology::Triangles)
            .with_colors(vec![[1, 2, 3, 4], [5, 6, 7, 8]]);
        let bytes = mesh.interleaved_vertex_data();

        assert_eq!(bytes.len(), 2 * 16);
        // Second vertex's color trails its position.
        assert_eq!(&bytes[16 + 12..16 + 16], &[5, 6, 7, 8]);
    }

    #[test]
    fn topology_reduces_to_base_class() {
        assert_eq!(PrimitiveTopology::LineStrip.class(), TopologyClass::Lines);
        assert_eq!(PrimitiveTopology::LineLoop.class(), TopologyClass::Lines);
        assert_eq!(
            PrimitiveTopology::TriangleFan.class(),
            TopologyClass::Triangles
        );
        assert_eq!(PrimitiveTopology::Points.class(), TopologyClass::Points);
    }

    #[test]
    fn unknown_raw_topology_is_rejected() {
        assert_eq!(PrimitiveTopology::from_raw(7), None);
        assert_eq!(
            PrimitiveTopology::from_raw(3),
            Some(PrimitiveTopology::LineStrip)
        );
    }
}
