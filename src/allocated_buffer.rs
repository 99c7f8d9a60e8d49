use crate::core::{Allocator, VkPrelude};
use anyhow::{Context, Result};
use erupt::vk1_0 as vk;
use gpu_alloc::{MemoryBlock, Request, UsageFlags};
use gpu_alloc_erupt::EruptMemoryDevice;
use std::marker::PhantomData;

/// A host-visible buffer and its associated allocation on device.
pub struct AllocatedBuffer<T> {
    pub buffer: vk::Buffer,
    block: Option<MemoryBlock<vk::DeviceMemory>>,
    count: usize,
    _phantom: PhantomData<T>,
}

impl<T: Sized + bytemuck::Pod> AllocatedBuffer<T> {
    /// Create a buffer holding a copy of `data`
    pub fn with_data(
        prelude: &VkPrelude,
        allocator: &mut Allocator,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        anyhow::ensure!(!data.is_empty(), "Must allocate at least one object");
        let size = std::mem::size_of_val(data) as u64;
        let create_info = vk::BufferCreateInfoBuilder::new()
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .size(size);
        let device = &prelude.device;
        let buffer = unsafe { device.create_buffer(&create_info, None, None) }.result()?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer, None) };
        let block = unsafe {
            allocator.alloc(
                EruptMemoryDevice::wrap(device),
                memory_request(requirements, UsageFlags::UPLOAD),
            )?
        };
        unsafe { device.bind_buffer_memory(buffer, *block.memory(), block.offset()) }.result()?;

        let mut instance = Self {
            buffer,
            block: Some(block),
            count: data.len(),
            _phantom: PhantomData::default(),
        };
        instance.write(prelude, data)?;
        Ok(instance)
    }

    /// Overwrite the start of the buffer with `data`
    pub fn write(&mut self, prelude: &VkPrelude, data: &[T]) -> Result<()> {
        anyhow::ensure!(data.len() <= self.count, "Write exceeds buffer size");
        let block = self.block.as_mut().context("Buffer was already freed")?;
        unsafe {
            block.write_bytes(
                EruptMemoryDevice::wrap(&prelude.device),
                0,
                bytemuck::cast_slice(data),
            )?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn free(&mut self, prelude: &VkPrelude, allocator: &mut Allocator) {
        if let Some(block) = self.block.take() {
            unsafe {
                prelude.device.destroy_buffer(Some(self.buffer), None);
                allocator.dealloc(EruptMemoryDevice::wrap(&prelude.device), block);
            }
        }
    }
}

/// Describe an allocation satisfying `requirements` for the given usage
pub(crate) fn memory_request(requirements: vk::MemoryRequirements, usage: UsageFlags) -> Request {
    Request {
        size: requirements.size,
        align_mask: requirements.alignment - 1,
        usage,
        memory_types: requirements.memory_type_bits,
    }
}

impl<T> Drop for AllocatedBuffer<T> {
    fn drop(&mut self) {
        if self.block.is_some() {
            panic!(
                "AllocatedBuffer<{}> was dropped before it was freed!",
                std::any::type_name::<T>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(size: u64, alignment: u64, memory_type_bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size,
            alignment,
            memory_type_bits,
        }
    }

    #[test]
    fn request_carries_alignment_as_mask() {
        let request = memory_request(requirements(1000, 256, 0b1010), UsageFlags::UPLOAD);
        assert_eq!(request.size, 1000);
        assert_eq!(request.align_mask, 255);
        assert_eq!(request.memory_types, 0b1010);
        assert!(request.usage.contains(UsageFlags::UPLOAD));
    }

    #[test]
    fn byte_aligned_request_has_empty_mask() {
        let request = memory_request(requirements(4, 1, !0), UsageFlags::FAST_DEVICE_ACCESS);
        assert_eq!(request.align_mask, 0);
        assert_eq!(request.memory_types, !0);
    }
}
