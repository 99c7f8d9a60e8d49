use crate::allocated_buffer::AllocatedBuffer;
use crate::core::{Allocator, VkPrelude};
use crate::mesh::Mesh;
use crate::Vertex;
use anyhow::{ensure, Result};
use erupt::vk1_0 as vk;

/// The mesh's vertex and index buffers on device
pub struct GpuMesh {
    pub vertices: AllocatedBuffer<Vertex>,
    pub indices: AllocatedBuffer<u16>,
    pub n_indices: u32,
}

impl GpuMesh {
    pub fn new(prelude: &VkPrelude, allocator: &mut Allocator, mesh: &Mesh) -> Result<Self> {
        ensure!(
            mesh.positions.len() <= u16::MAX as usize + 1,
            "Mesh has {} vertices, more than 16-bit indices can address",
            mesh.positions.len()
        );

        //TODO: Use staging buffers!
        let vertices = AllocatedBuffer::with_data(
            prelude,
            allocator,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices(),
        )?;
        let indices = mesh.indices();
        let indices = AllocatedBuffer::with_data(
            prelude,
            allocator,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &indices,
        )?;

        Ok(Self {
            n_indices: indices.len() as u32,
            vertices,
            indices,
        })
    }

    pub fn free(&mut self, prelude: &VkPrelude, allocator: &mut Allocator) {
        self.vertices.free(prelude, allocator);
        self.indices.free(prelude, allocator);
    }
}
