use crate::clock::FrameClock;
use crate::config::Settings;
use crate::core::{Core, VkPrelude};
use crate::extensions::ExtensionsAndLayers;
use crate::hardware_query::HardwareSelection;
use crate::mesh::Mesh;
use crate::renderer::{DrawCall, Framebuffer, RenderBackend};
use crate::swapchain_images::SwapchainImages;
use anyhow::{bail, Context, Result};
use erupt::{
    extensions::{khr_surface, khr_swapchain},
    utils::surface,
    vk1_0 as vk, DeviceLoader, EntryLoader, InstanceLoader,
};
use std::ffi::CString;
use std::sync::Arc;
use winit::window::Window;

/// Outcome of beginning a flat frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameStart {
    /// An image was acquired and recording has begun
    Ready,
    /// The swapchain was out of date and has been released; it is rebuilt next frame
    Retry,
    /// The window has no area to draw to. The next resize brings it back.
    Hidden,
}

impl FrameStart {
    /// Schedule the next flat frame after this one was skipped. A ready frame is scheduled
    /// by the renderer itself.
    pub fn reschedule(self, display: &mut dyn FrameClock) {
        if self == FrameStart::Retry {
            display.request_tick();
        }
    }
}

/// Windowed mode Winit backend, drawing to the window's surface
pub struct WinitBackend {
    swapchain: Option<khr_swapchain::SwapchainKHR>,
    extent: vk::Extent2D,
    /// Image acquired for the frame being recorded
    image_index: Option<u32>,
    surface: khr_surface::SurfaceKHR,
    hardware: HardwareSelection,
    prelude: Arc<VkPrelude>,
    core: Core,
}

impl WinitBackend {
    /// Create a new windowed backend drawing `mesh`.
    pub fn new(
        window: &Window,
        application_name: &str,
        settings: &Settings,
        mesh: &Mesh,
    ) -> Result<Self> {
        // Entry
        let entry = EntryLoader::new().context("Failed to load Vulkan")?;

        // Instance
        let application_name = CString::new(application_name)?;
        let engine_name = CString::new(crate::ENGINE_NAME)?;
        let app_info = vk::ApplicationInfoBuilder::new()
            .application_name(&application_name)
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(crate::engine_version())
            .api_version(vk::make_version(1, 0, 0));

        // Instance and device layers and extensions
        let mut layers = ExtensionsAndLayers::new(settings.validation);
        layers
            .instance_extensions
            .extend(surface::enumerate_required_extensions(window).result()?);
        let device_extensions = vec![khr_swapchain::KHR_SWAPCHAIN_EXTENSION_NAME];

        // Instance creation
        let create_info = vk::InstanceCreateInfoBuilder::new()
            .application_info(&app_info)
            .enabled_extension_names(&layers.instance_extensions)
            .enabled_layer_names(&layers.instance_layers);

        let instance = InstanceLoader::new(&entry, &create_info, None)?;

        // Surface
        let surface = unsafe { surface::create_surface(&instance, window, None) }.result()?;

        // Hardware selection
        let hardware = HardwareSelection::query(&instance, surface, &device_extensions)?;
        log::info!(
            "Using {:?} ({:?}), present mode {:?}",
            unsafe {
                std::ffi::CStr::from_ptr(hardware.physical_device_properties.device_name.as_ptr())
            },
            hardware.physical_device_properties.device_type,
            hardware.present_mode,
        );

        // Create logical device and queues
        let create_info = [vk::DeviceQueueCreateInfoBuilder::new()
            .queue_family_index(hardware.queue_family)
            .queue_priorities(&[1.0])];

        let physical_device_features = vk::PhysicalDeviceFeaturesBuilder::new();
        let create_info = vk::DeviceCreateInfoBuilder::new()
            .queue_create_infos(&create_info)
            .enabled_features(&physical_device_features)
            .enabled_extension_names(&device_extensions)
            .enabled_layer_names(&layers.device_layers);

        let device = DeviceLoader::new(&instance, hardware.physical_device, &create_info, None)?;
        let queue = unsafe { device.get_device_queue(hardware.queue_family, 0, None) };

        let prelude = Arc::new(VkPrelude {
            queue,
            queue_family_index: hardware.queue_family,
            physical_device: hardware.physical_device,
            device,
            instance,
            entry,
        });

        let core = Core::new(
            prelude.clone(),
            hardware.format.format,
            vk::ImageLayout::PRESENT_SRC_KHR,
            mesh,
        )?;

        Ok(Self {
            swapchain: None,
            extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            image_index: None,
            hardware,
            surface,
            prelude,
            core,
        })
    }

    /// Acquire a swapchain image and begin recording
    pub fn begin_frame(&mut self, window: &Window) -> Result<FrameStart> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(FrameStart::Hidden);
        }

        if self.swapchain.is_some()
            && (self.extent.width, self.extent.height) != (size.width, size.height)
        {
            self.free_swapchain()?;
        }

        let swapchain = match self.swapchain {
            Some(swapchain) => swapchain,
            None => self.create_swapchain(size.width, size.height)?,
        };

        self.core.begin_commands()?;
        let (_, frame) = self.core.frame_sync.current();
        let image_index = unsafe {
            self.prelude.device.acquire_next_image_khr(
                swapchain,
                u64::MAX,
                Some(frame.image_available),
                None,
                None,
            )
        };

        // Abandon the recording and invalidate the swapchain
        if image_index.raw == vk::Result::ERROR_OUT_OF_DATE_KHR {
            self.core.end_commands()?;
            self.free_swapchain()?;
            return Ok(FrameStart::Retry);
        }

        self.image_index = Some(image_index.result()?);
        Ok(FrameStart::Ready)
    }

    /// Finish the frame begun by `begin_frame`, then submit and present it
    pub fn end_frame(&mut self) -> Result<()> {
        let image_index = self.image_index.take().context("No frame was begun")?;
        let swapchain = self.swapchain.context("Swapchain vanished mid-frame")?;

        // The image must pass through the render pass to reach the present layout
        if !self.core.pass_open() {
            self.core.begin_pass(image_index)?;
        }

        let (_, command_buffer) = self.core.end_commands()?;
        let (_, frame) = self.core.frame_sync.current();
        let wait_semaphores = [frame.image_available];
        let signal_semaphores = [frame.render_finished];
        self.core
            .submit(command_buffer, &wait_semaphores, &signal_semaphores)?;

        // Present to swapchain
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = khr_swapchain::PresentInfoKHRBuilder::new()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue_result = unsafe {
            self.prelude
                .device
                .queue_present_khr(self.prelude.queue, &present_info)
        };

        if queue_result.raw == vk::Result::ERROR_OUT_OF_DATE_KHR
            || queue_result.raw == vk::Result::SUBOPTIMAL_KHR
        {
            self.free_swapchain()?;
        } else {
            queue_result.result()?;
        }

        Ok(())
    }

    fn free_swapchain(&mut self) -> Result<()> {
        self.core.free_swapchain_images()?;

        unsafe {
            self.prelude
                .device
                .destroy_swapchain_khr(self.swapchain.take(), None);
        }

        Ok(())
    }

    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<khr_swapchain::SwapchainKHR> {
        let surface_caps = unsafe {
            self.prelude
                .instance
                .get_physical_device_surface_capabilities_khr(
                    self.prelude.physical_device,
                    self.surface,
                    None,
                )
        }
        .result()?;

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let extent = swapchain_extent(
            surface_caps.current_extent,
            (surface_caps.min_image_extent, surface_caps.max_image_extent),
            width,
            height,
        );

        // Build the actual swapchain
        let create_info = khr_swapchain::SwapchainCreateInfoKHRBuilder::new()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.hardware.format.format)
            .image_color_space(self.hardware.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(khr_surface::CompositeAlphaFlagBitsKHR::OPAQUE_KHR)
            .present_mode(self.hardware.present_mode)
            .clipped(true)
            .old_swapchain(khr_swapchain::SwapchainKHR::null());

        let swapchain = unsafe {
            self.prelude
                .device
                .create_swapchain_khr(&create_info, None, None)
        }
        .result()?;
        let swapchain_images = unsafe {
            self.prelude
                .device
                .get_swapchain_images_khr(swapchain, None)
        }
        .result()?;

        self.swapchain = Some(swapchain);
        // Keep the requested size so a window at its maximum extent isn't rebuilt every frame
        self.extent = vk::Extent2D { width, height };

        self.core.swapchain_images = Some(SwapchainImages::new(
            &self.prelude,
            &mut self.core.allocator,
            extent,
            self.core.render_pass,
            self.hardware.format.format,
            swapchain_images,
        )?);
        log::debug!("Swapchain built at {}x{}", extent.width, extent.height);

        Ok(swapchain)
    }

    fn framebuffer_extent(&self) -> Option<vk::Extent2D> {
        self.core.swapchain_images.as_ref().map(|images| images.extent)
    }
}

/// The surface's fixed extent, or the window size clamped to what the surface allows
fn swapchain_extent(
    current: vk::Extent2D,
    (min, max): (vk::Extent2D, vk::Extent2D),
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if current.width != u32::MAX {
        return current;
    }
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

impl RenderBackend for WinitBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.framebuffer_extent()
            .map(|extent| (extent.width, extent.height))
            .unwrap_or((0, 0))
    }

    fn bind_framebuffer(&mut self, target: Framebuffer) -> Result<()> {
        match target {
            Framebuffer::Default => {
                let image_index = self.image_index.context("No frame was begun")?;
                self.core.begin_pass(image_index)
            }
            Framebuffer::Stereo => bail!("The windowed backend has no stereo framebuffer"),
        }
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) -> Result<()> {
        self.core.cmd_clear(color, depth)
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        self.core.cmd_draw(call)
    }
}

impl Drop for WinitBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.prelude.device.device_wait_idle();
        }
        if let Err(e) = self.free_swapchain() {
            log::error!("Failed to free swapchain: {:?}", e);
        }
        unsafe {
            self.prelude
                .instance
                .destroy_surface_khr(Some(self.surface), None);
        }
    }
}

/// Display clock: schedules the next flat frame as a redraw of the window
pub struct RedrawClock<'a>(pub &'a Window);

impl FrameClock for RedrawClock<'_> {
    fn request_tick(&mut self) {
        self.0.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PendingTick;

    #[test]
    fn out_of_date_frame_is_retried() {
        let mut display = PendingTick::default();
        FrameStart::Retry.reschedule(&mut display);
        assert!(display.take());
    }

    #[test]
    fn hidden_window_waits_for_resize() {
        let mut display = PendingTick::default();
        FrameStart::Hidden.reschedule(&mut display);
        FrameStart::Ready.reschedule(&mut display);
        assert!(!display.take());
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn limits() -> (vk::Extent2D, vk::Extent2D) {
        (extent(1, 1), extent(1000, 1000))
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let chosen = swapchain_extent(extent(640, 480), limits(), 300, 150);
        assert_eq!((chosen.width, chosen.height), (640, 480));
    }

    #[test]
    fn undefined_surface_extent_follows_window() {
        let undefined = extent(u32::MAX, u32::MAX);
        let chosen = swapchain_extent(undefined, limits(), 300, 150);
        assert_eq!((chosen.width, chosen.height), (300, 150));

        let chosen = swapchain_extent(undefined, limits(), 3000, 150);
        assert_eq!((chosen.width, chosen.height), (1000, 150));
    }
}
