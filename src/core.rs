use crate::frame_sync::{FrameSync, FRAMES_IN_FLIGHT};
use crate::gpu_mesh::GpuMesh;
use crate::mesh::Mesh;
use crate::pipeline::Pipeline;
use crate::swapchain_images::SwapchainImages;
use anyhow::Result;
use erupt::{utils, vk1_0 as vk, DeviceLoader, InstanceLoader};
use gpu_alloc::{Config, GpuAllocator};
use gpu_alloc_erupt::EruptMemoryDevice;
use std::sync::Arc;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Device memory allocator shared by every buffer and image of a backend
pub type Allocator = GpuAllocator<vk::DeviceMemory>;

/// A container for the Vulkan handles every other object needs.
pub struct VkPrelude {
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub device: DeviceLoader,
    pub physical_device: vk::PhysicalDevice,
    pub instance: InstanceLoader,
    pub entry: utils::loading::DefaultEntryLoader,
}

impl Drop for VkPrelude {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// State of the command buffer being recorded this frame
pub(crate) struct Recording {
    pub frame_idx: usize,
    pub command_buffer: vk::CommandBuffer,
    /// Extent of the framebuffer, once a render pass has begun
    pub pass: Option<vk::Extent2D>,
}

/// Everything shared by the windowed and OpenXR backends: the render pass, the pipeline,
/// the mesh buffers, and per-frame command recording.
pub struct Core {
    pub prelude: Arc<VkPrelude>,
    pub allocator: Allocator,
    pub render_pass: vk::RenderPass,
    pub pipeline: Pipeline,
    pub mesh: GpuMesh,
    pub frame_sync: FrameSync,
    pub swapchain_images: Option<SwapchainImages>,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    pub(crate) recording: Option<Recording>,
}

impl Core {
    /// `final_layout` is the layout color images are left in after each frame
    pub fn new(
        prelude: Arc<VkPrelude>,
        color_format: vk::Format,
        final_layout: vk::ImageLayout,
        mesh: &Mesh,
    ) -> Result<Self> {
        // Command pool
        let create_info = vk::CommandPoolCreateInfoBuilder::new()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(prelude.queue_family_index);
        let command_pool =
            unsafe { prelude.device.create_command_pool(&create_info, None, None) }.result()?;

        // Allocate command buffers
        let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(FRAMES_IN_FLIGHT as u32);

        let command_buffers =
            unsafe { prelude.device.allocate_command_buffers(&allocate_info) }.result()?;

        // Device memory allocator
        let device_props =
            unsafe { gpu_alloc_erupt::device_properties(&prelude.instance, prelude.physical_device)? };
        let mut allocator = GpuAllocator::new(Config::i_am_prototyping(), device_props);

        let render_pass = create_render_pass(&prelude, color_format, final_layout)?;
        let pipeline = Pipeline::new(prelude.clone(), render_pass)?;
        let mesh = GpuMesh::new(&prelude, &mut allocator, mesh)?;

        // Frame synchronization
        let frame_sync = FrameSync::new(&prelude.device, FRAMES_IN_FLIGHT)?;

        Ok(Self {
            prelude,
            allocator,
            render_pass,
            pipeline,
            mesh,
            frame_sync,
            swapchain_images: None,
            command_pool,
            command_buffers,
            recording: None,
        })
    }

    /// Release the framebuffers over the current swapchain, if any
    pub fn free_swapchain_images(&mut self) -> Result<()> {
        if let Some(mut images) = self.swapchain_images.take() {
            images.free(&self.prelude, &mut self.allocator)?;
        }
        Ok(())
    }
}

/// One color attachment and one depth attachment. Neither is loaded: every frame is cleared
/// explicitly before it is drawn.
fn create_render_pass(
    prelude: &VkPrelude,
    color_format: vk::Format,
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescriptionBuilder::new()
            .format(color_format)
            .samples(vk::SampleCountFlagBits::_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout),
        vk::AttachmentDescriptionBuilder::new()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlagBits::_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_attachment_refs = [vk::AttachmentReferenceBuilder::new()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let depth_attachment_ref = vk::AttachmentReferenceBuilder::new()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpasses = [vk::SubpassDescriptionBuilder::new()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .depth_stencil_attachment(&depth_attachment_ref)];

    let (stages, src_access, dst_access) = external_dependency_masks();
    let dependencies = [vk::SubpassDependencyBuilder::new()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(src_access)
        .dst_stage_mask(stages)
        .dst_access_mask(dst_access)];

    let create_info = vk::RenderPassCreateInfoBuilder::new()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass =
        unsafe { prelude.device.create_render_pass(&create_info, None, None) }.result()?;
    Ok(render_pass)
}

/// Stages and accesses ordering this frame's pass after whatever came before it.
/// The depth image is shared by every frame in flight, so the previous frame's depth
/// writes must land before this frame clears and tests against it.
fn external_dependency_masks() -> (vk::PipelineStageFlags, vk::AccessFlags, vk::AccessFlags) {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let src_access = vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    (stages, src_access, dst_access)
}

impl Drop for Core {
    fn drop(&mut self) {
        unsafe {
            let _ = self.prelude.device.device_wait_idle();
        }
        if let Err(e) = self.free_swapchain_images() {
            log::error!("Failed to free swapchain images: {:?}", e);
        }
        self.mesh.free(&self.prelude, &mut self.allocator);
        self.frame_sync.free(&self.prelude.device);
        unsafe {
            self.allocator
                .cleanup(EruptMemoryDevice::wrap(&self.prelude.device));
            self.prelude
                .device
                .destroy_command_pool(Some(self.command_pool), None);
            self.prelude
                .device
                .destroy_render_pass(Some(self.render_pass), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_writes_of_the_previous_frame_are_waited_on() {
        let (stages, src_access, dst_access) = external_dependency_masks();
        assert!(stages.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(stages.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(src_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dst_access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }
}
