use crate::allocated_buffer::memory_request;
use crate::core::{Allocator, VkPrelude, DEPTH_FORMAT};
use crate::frame_sync::Frame;
use anyhow::{Context, Result};
use erupt::vk1_0 as vk;
use gpu_alloc::{MemoryBlock, UsageFlags};
use gpu_alloc_erupt::EruptMemoryDevice;

/// Framebuffers over a set of presentable images, sharing one depth buffer
pub struct SwapchainImages {
    pub extent: vk::Extent2D,
    depth_image: vk::Image,
    depth_image_mem: Option<MemoryBlock<vk::DeviceMemory>>,
    depth_image_view: vk::ImageView,
    images: Vec<SwapChainImage>,
}

pub struct SwapChainImage {
    pub framebuffer: vk::Framebuffer,
    pub image_view: vk::ImageView,
    /// Fence of the frame which last rendered to this image, if any
    pub in_flight: vk::Fence,
}

impl SwapchainImages {
    pub fn new(
        prelude: &VkPrelude,
        allocator: &mut Allocator,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        swapchain_images: Vec<vk::Image>,
    ) -> Result<Self> {
        let device = &prelude.device;

        // Create depth image
        let create_info = vk::ImageCreateInfoBuilder::new()
            .image_type(vk::ImageType::_2D)
            .extent(
                vk::Extent3DBuilder::new()
                    .width(extent.width)
                    .height(extent.height)
                    .depth(1)
                    .build(),
            )
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlagBits::_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let depth_image = unsafe { device.create_image(&create_info, None, None) }.result()?;

        let requirements = unsafe { device.get_image_memory_requirements(depth_image, None) };
        let depth_image_mem = unsafe {
            allocator.alloc(
                EruptMemoryDevice::wrap(device),
                memory_request(requirements, UsageFlags::FAST_DEVICE_ACCESS),
            )?
        };
        unsafe {
            device.bind_image_memory(depth_image, *depth_image_mem.memory(), depth_image_mem.offset())
        }
        .result()?;

        let create_info = vk::ImageViewCreateInfoBuilder::new()
            .image(depth_image)
            .view_type(vk::ImageViewType::_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(
                vk::ImageSubresourceRangeBuilder::new()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );
        let depth_image_view =
            unsafe { device.create_image_view(&create_info, None, None) }.result()?;

        // Build swapchain image views and buffers
        let images = swapchain_images
            .iter()
            .map(|&image| {
                SwapChainImage::new(
                    prelude,
                    render_pass,
                    image,
                    color_format,
                    extent,
                    depth_image_view,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            extent,
            images,
            depth_image,
            depth_image_mem: Some(depth_image_mem),
            depth_image_view,
        })
    }

    /// Claim image `image_index` for `frame`, waiting on whichever frame used it last
    pub fn next_image(
        &mut self,
        prelude: &VkPrelude,
        image_index: u32,
        frame: &Frame,
    ) -> Result<&SwapChainImage> {
        let image = &mut self.images[image_index as usize];

        // May be null if no frames have flowed just yet
        if !image.in_flight.is_null() {
            unsafe {
                prelude
                    .device
                    .wait_for_fences(&[image.in_flight], true, u64::MAX)
            }
            .result()?;
        }

        image.in_flight = frame.in_flight_fence;

        Ok(image)
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.images[image_index as usize].framebuffer
    }

    pub fn free(&mut self, prelude: &VkPrelude, allocator: &mut Allocator) -> Result<()> {
        let device = &prelude.device;
        let depth_image_mem = self
            .depth_image_mem
            .take()
            .context("Swapchain images were already freed")?;
        unsafe {
            device.device_wait_idle().result()?;
            for image in self.images.drain(..) {
                device.destroy_framebuffer(Some(image.framebuffer), None);
                device.destroy_image_view(Some(image.image_view), None);
            }
            device.destroy_image_view(Some(self.depth_image_view), None);
            device.destroy_image(Some(self.depth_image), None);
            allocator.dealloc(EruptMemoryDevice::wrap(device), depth_image_mem);
        }
        Ok(())
    }
}

impl SwapChainImage {
    fn new(
        prelude: &VkPrelude,
        render_pass: vk::RenderPass,
        swapchain_image: vk::Image,
        color_format: vk::Format,
        extent: vk::Extent2D,
        depth_image_view: vk::ImageView,
    ) -> Result<Self> {
        let device = &prelude.device;
        let create_info = vk::ImageViewCreateInfoBuilder::new()
            .image(swapchain_image)
            .view_type(vk::ImageViewType::_2D)
            .format(color_format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRangeBuilder::new()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );

        let image_view = unsafe { device.create_image_view(&create_info, None, None) }.result()?;

        let attachments = [image_view, depth_image_view];
        let create_info = vk::FramebufferCreateInfoBuilder::new()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer =
            unsafe { device.create_framebuffer(&create_info, None, None) }.result()?;

        Ok(Self {
            framebuffer,
            image_view,
            in_flight: vk::Fence::null(),
        })
    }
}

impl Drop for SwapchainImages {
    fn drop(&mut self) {
        if self.depth_image_mem.is_some() {
            panic!("Swapchain dropped before it was freed");
        }
    }
}
