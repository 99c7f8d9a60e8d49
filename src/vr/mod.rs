pub mod xr_prelude;
use crate::config::Settings;
use crate::core::{Core, VkPrelude};
use crate::extensions::ExtensionsAndLayers;
use crate::mesh::Mesh;
use crate::renderer::{DrawCall, EyePose, Framebuffer, RenderBackend, StereoFrame, Viewport};
use crate::swapchain_images::SwapchainImages;
use crate::transform::{self, FAR, NEAR};
use anyhow::{bail, ensure, format_err, Context, Result};
use erupt::{vk1_0 as vk, DeviceLoader, EntryLoader, InstanceLoader};
use log::info;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use xr_prelude::{load_openxr, XrPrelude};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// What the OpenXR session is doing after the latest batch of events
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Frames should be ticked
    Running,
    /// Not yet ready, or stopped; keep pumping events
    Idle,
    /// The session is over and the backend should be dropped
    Ended,
}

/// An XR frame between `begin_frame` and `end_frame`
struct XrFrame {
    state: xr::FrameState,
    /// Views and swapchain image, if this frame is being rendered
    target: Option<(Vec<xr::View>, u32)>,
}

/// Side-by-side stereo swapchain: one image, each eye drawing into its half
struct StereoSwapchain {
    swapchain: xr::Swapchain<xr::Vulkan>,
    eye_extent: vk::Extent2D,
}

/// VR capable OpenXR backend. Field order is drop order.
pub struct OpenXrBackend {
    core: Core,
    swapchain: Option<StereoSwapchain>,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_wait: xr::FrameWaiter,
    space: xr::Space,
    openxr: XrPrelude,
    prelude: Arc<VkPrelude>,
    color_format: vk::Format,
    event_storage: xr::EventDataBuffer,
    session_running: bool,
    frame: Option<XrFrame>,
}

impl OpenXrBackend {
    /// Request a session: create an OpenXR instance, a Vulkan device through it, and a session
    /// in the `LOCAL` reference space.
    pub fn new(application_name: &str, settings: &Settings, mesh: &Mesh) -> Result<Self> {
        // Load OpenXR runtime
        let xr_entry = load_openxr()?;

        let available_extensions = xr_entry.enumerate_extensions()?;
        ensure!(
            available_extensions.khr_vulkan_enable2,
            "OpenXR runtime lacks KHR_vulkan_enable2"
        );

        let mut enabled_extensions = xr::ExtensionSet::default();
        enabled_extensions.khr_vulkan_enable2 = true;

        let xr_instance = xr_entry.create_instance(
            &xr::ApplicationInfo {
                application_name,
                application_version: 0,
                engine_name: crate::ENGINE_NAME,
                engine_version: 0,
            },
            &enabled_extensions,
            &[],
        )?;
        let instance_props = xr_instance.properties()?;

        info!(
            "Loaded OpenXR runtime: {} {}",
            instance_props.runtime_name, instance_props.runtime_version
        );

        let system = xr_instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .context("No head-mounted display")?;

        // Load Vulkan
        let vk_entry = EntryLoader::new().context("Failed to load Vulkan")?;

        // Check to see if OpenXR and Vulkan are compatible
        let vk_version = unsafe { vk_entry.enumerate_instance_version(None).result()? };

        let vk_version = xr::Version::new(
            vk::version_major(vk_version) as u16,
            vk::version_minor(vk_version) as u16,
            vk::version_patch(vk_version),
        );

        info!("Loaded Vulkan version {}", vk_version);
        let reqs = xr_instance.graphics_requirements::<xr::Vulkan>(system)?;
        if reqs.min_api_version_supported > vk_version {
            bail!(
                "OpenXR runtime requires Vulkan version > {}",
                reqs.min_api_version_supported
            );
        }

        let layers = ExtensionsAndLayers::new(settings.validation);
        let device_extensions: Vec<*const c_char> = Vec::new();

        // Vulkan Instance
        let application_name = CString::new(application_name)?;
        let engine_name = CString::new(crate::ENGINE_NAME)?;
        let vk_version = vk::make_version(1, 1, 0);
        let app_info = vk::ApplicationInfoBuilder::new()
            .application_name(&application_name)
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(crate::engine_version())
            .api_version(vk_version);

        let create_info = vk::InstanceCreateInfoBuilder::new()
            .application_info(&app_info)
            .enabled_layer_names(&layers.instance_layers)
            .enabled_extension_names(&layers.instance_extensions)
            .build();

        let vk_instance = unsafe {
            xr_instance.create_vulkan_instance(
                system,
                std::mem::transmute(vk_entry.get_instance_proc_addr),
                &create_info as *const _ as _,
            )
        }?
        .map_err(|e| format_err!("OpenXR failed to create Vulkan instance: {}", e))?;

        let vk_instance = vk::Instance(vk_instance as _);
        let symbol = |name| unsafe { (vk_entry.get_instance_proc_addr)(vk_instance, name) };
        let vk_instance = unsafe {
            let instance_enabled = erupt::InstanceEnabled::new(
                vk_version,
                &extension_names(&layers.instance_extensions),
                &[],
            )?;
            InstanceLoader::custom(&vk_entry, vk_instance, instance_enabled, symbol)
        }?;

        // Obtain physical device, queue family, and device from OpenXR
        let vk_physical_device = vk::PhysicalDevice(
            xr_instance.vulkan_graphics_device(system, vk_instance.handle.0 as _)? as _,
        );

        let queue_family_index = unsafe {
            vk_instance
                .get_physical_device_queue_family_properties(vk_physical_device, None)
                .into_iter()
                .position(|info| info.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .context("Vulkan device has no graphics queue")? as u32
        };

        let priorities = [1.0];
        let queues = [vk::DeviceQueueCreateInfoBuilder::new()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)];

        let phys_device_features = vk::PhysicalDeviceFeaturesBuilder::new();

        let create_info = vk::DeviceCreateInfoBuilder::new()
            .queue_create_infos(&queues)
            .enabled_layer_names(&layers.device_layers)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&phys_device_features)
            .build();

        let vk_device = unsafe {
            xr_instance.create_vulkan_device(
                system,
                std::mem::transmute(vk_entry.get_instance_proc_addr),
                vk_physical_device.0 as _,
                &create_info as *const _ as _,
            )
        }?
        .map_err(|e| format_err!("OpenXR failed to create Vulkan device: {}", e))?;
        let vk_device = vk::Device(vk_device as _);
        let device_enabled =
            unsafe { erupt::DeviceEnabled::new(&extension_names(&device_extensions)) };
        let vk_device =
            unsafe { DeviceLoader::custom(&vk_instance, vk_device, device_enabled, symbol)? };
        let queue = unsafe { vk_device.get_device_queue(queue_family_index, 0, None) };

        let (session, frame_wait, frame_stream) = unsafe {
            xr_instance.create_session::<xr::Vulkan>(
                system,
                &xr::vulkan::SessionCreateInfo {
                    instance: vk_instance.handle.0 as _,
                    physical_device: vk_physical_device.0 as _,
                    device: vk_device.handle.0 as _,
                    queue_family_index,
                    queue_index: 0,
                },
            )
        }?;

        let space =
            session.create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)?;

        let color_format = pick_color_format(
            &session
                .enumerate_swapchain_formats()?
                .into_iter()
                .map(|format| vk::Format(format as _))
                .collect::<Vec<_>>(),
        )
        .context("OpenXR runtime offers no swapchain formats")?;

        let prelude = Arc::new(VkPrelude {
            queue,
            queue_family_index,
            physical_device: vk_physical_device,
            device: vk_device,
            instance: vk_instance,
            entry: vk_entry,
        });

        let core = Core::new(
            prelude.clone(),
            color_format,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            mesh,
        )?;

        Ok(Self {
            core,
            swapchain: None,
            frame_stream,
            frame_wait,
            space,
            openxr: XrPrelude {
                session,
                instance: xr_instance,
                system,
            },
            prelude,
            color_format,
            event_storage: xr::EventDataBuffer::new(),
            session_running: false,
            frame: None,
        })
    }

    /// Handle all pending OpenXR events
    pub fn poll_events(&mut self) -> Result<SessionEvent> {
        while let Some(event) = self.openxr.instance.poll_event(&mut self.event_storage)? {
            use xr::Event::*;
            match event {
                SessionStateChanged(e) => {
                    info!("OpenXR entered state {:?}", e.state());
                    match e.state() {
                        xr::SessionState::READY => {
                            self.openxr.session.begin(VIEW_TYPE)?;
                            self.session_running = true;
                        }
                        xr::SessionState::STOPPING => {
                            self.openxr.session.end()?;
                            self.session_running = false;
                        }
                        xr::SessionState::EXITING | xr::SessionState::LOSS_PENDING => {
                            info!("OpenXR exiting");
                            return Ok(SessionEvent::Ended);
                        }
                        _ => {}
                    }
                }
                InstanceLossPending(_) => {
                    info!("OpenXR pending instance loss");
                    return Ok(SessionEvent::Ended);
                }
                EventsLost(e) => {
                    info!("OpenXR lost {} events", e.lost_event_count());
                }
                _ => {}
            }
        }

        Ok(if self.session_running {
            SessionEvent::Running
        } else {
            SessionEvent::Idle
        })
    }

    /// Ask the runtime to end the session. Returns `false` if it was not running, in which case
    /// no further session events will arrive.
    pub fn request_exit(&mut self) -> Result<bool> {
        info!("Requesting exit");
        match self.openxr.session.request_exit() {
            Ok(()) => Ok(true),
            Err(xr::sys::Result::ERROR_SESSION_NOT_RUNNING) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Predicted display time of the current frame, in milliseconds
    pub fn timestamp_ms(&self) -> Option<f64> {
        self.frame
            .as_ref()
            .map(|frame| frame.state.predicted_display_time.as_nanos() as f64 / 1e6)
    }

    /// Wait for and begin an XR frame. Returns the eyes to draw, or `None` if the runtime says
    /// not to render or the head pose is not fully known this time.
    pub fn begin_frame(&mut self) -> Result<Option<StereoFrame>> {
        ensure!(self.frame.is_none(), "XR frame already begun");

        // Wait for OpenXR to signal it has a frame ready
        let state = self.frame_wait.wait()?;
        self.frame_stream.begin()?;
        let (should_render, time) = (state.should_render, state.predicted_display_time);
        self.frame = Some(XrFrame {
            state,
            target: None,
        });

        if !should_render {
            return Ok(None);
        }

        let (flags, views) = self
            .openxr
            .session
            .locate_views(VIEW_TYPE, time, &self.space)?;
        if !flags.contains(xr::ViewStateFlags::ORIENTATION_VALID | xr::ViewStateFlags::POSITION_VALID)
        {
            return Ok(None);
        }

        if self.swapchain.is_none() {
            self.create_swapchain()?;
        }

        self.core.begin_commands()?;
        let stereo = self.swapchain.as_mut().context("No XR swapchain")?;
        let image_index = stereo.swapchain.acquire_image()?;
        stereo.swapchain.wait_image(xr::Duration::INFINITE)?;
        let eye_extent = stereo.eye_extent;

        let eyes = views
            .iter()
            .enumerate()
            .map(|(i, view)| eye_pose(view, eye_viewport(i, eye_extent)))
            .collect();

        if let Some(frame) = self.frame.as_mut() {
            frame.target = Some((views, image_index));
        }

        Ok(Some(StereoFrame { eyes }))
    }

    /// Submit whatever was drawn and hand the frame back to the runtime
    pub fn end_frame(&mut self) -> Result<()> {
        let frame = self.frame.take().context("No XR frame was begun")?;
        let time = frame.state.predicted_display_time;

        let views = match frame.target {
            Some((views, _)) => views,
            None => {
                self.frame_stream
                    .end(time, xr::EnvironmentBlendMode::OPAQUE, &[])?;
                return Ok(());
            }
        };

        let drew = self.core.pass_open();
        let (_, command_buffer) = self.core.end_commands()?;
        if drew {
            self.core.submit(command_buffer, &[], &[])?;
        }

        let stereo = self.swapchain.as_mut().context("No XR swapchain")?;
        stereo.swapchain.release_image()?;

        if !drew {
            self.frame_stream
                .end(time, xr::EnvironmentBlendMode::OPAQUE, &[])?;
            return Ok(());
        }

        // Tell OpenXR what to present for this frame
        let eye_extent = stereo.eye_extent;
        let swapchain = &stereo.swapchain;
        let projection_views = views
            .iter()
            .enumerate()
            .map(|(i, view)| {
                let viewport = eye_viewport(i, eye_extent);
                xr::CompositionLayerProjectionView::new()
                    .pose(view.pose)
                    .fov(view.fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_array_index(0)
                            .image_rect(xr::Rect2Di {
                                offset: xr::Offset2Di {
                                    x: viewport.x,
                                    y: viewport.y,
                                },
                                extent: xr::Extent2Di {
                                    width: viewport.width as _,
                                    height: viewport.height as _,
                                },
                            }),
                    )
            })
            .collect::<Vec<_>>();

        self.frame_stream.end(
            time,
            xr::EnvironmentBlendMode::OPAQUE,
            &[&xr::CompositionLayerProjection::new()
                .space(&self.space)
                .views(&projection_views)],
        )?;

        Ok(())
    }

    fn create_swapchain(&mut self) -> Result<()> {
        self.core.free_swapchain_images()?;
        self.swapchain = None;

        let views = self
            .openxr
            .instance
            .enumerate_view_configuration_views(self.openxr.system, VIEW_TYPE)?;
        let first = views.get(0).context("OpenXR reported no views")?;

        let eye_extent = vk::Extent2D {
            width: first.recommended_image_rect_width,
            height: first.recommended_image_rect_height,
        };
        let extent = vk::Extent2D {
            width: eye_extent.width * views.len() as u32,
            height: eye_extent.height,
        };

        let swapchain = self
            .openxr
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT,
                format: self.color_format.0 as _,
                sample_count: 1,
                width: extent.width,
                height: extent.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            })?;

        let swapchain_images = swapchain
            .enumerate_images()?
            .into_iter()
            .map(|image| vk::Image(image as _))
            .collect::<Vec<_>>();

        self.core.swapchain_images = Some(SwapchainImages::new(
            &self.prelude,
            &mut self.core.allocator,
            extent,
            self.core.render_pass,
            self.color_format,
            swapchain_images,
        )?);
        self.swapchain = Some(StereoSwapchain {
            swapchain,
            eye_extent,
        });
        info!(
            "XR swapchain: {} eyes of {}x{}",
            views.len(),
            eye_extent.width,
            eye_extent.height
        );

        Ok(())
    }
}

impl RenderBackend for OpenXrBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.core
            .swapchain_images
            .as_ref()
            .map(|images| (images.extent.width, images.extent.height))
            .unwrap_or((0, 0))
    }

    fn bind_framebuffer(&mut self, target: Framebuffer) -> Result<()> {
        match target {
            Framebuffer::Stereo => {
                let image_index = self
                    .frame
                    .as_ref()
                    .and_then(|frame| frame.target.as_ref())
                    .map(|(_, image_index)| *image_index)
                    .context("No XR image acquired this frame")?;
                self.core.begin_pass(image_index)
            }
            Framebuffer::Default => bail!("The OpenXR backend has no default framebuffer"),
        }
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) -> Result<()> {
        self.core.cmd_clear(color, depth)
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        self.core.cmd_draw(call)
    }
}

/// Borrow nul-terminated extension names, as erupt's loaders want them.
/// Every pointer must be a valid C string outliving the result.
unsafe fn extension_names(names: &[*const c_char]) -> Vec<&CStr> {
    names.iter().map(|&name| CStr::from_ptr(name)).collect()
}

/// Prefer an sRGB format, in the order the runtime prefers them
fn pick_color_format(formats: &[vk::Format]) -> Option<vk::Format> {
    formats
        .iter()
        .copied()
        .find(|format| {
            *format == vk::Format::B8G8R8A8_SRGB || *format == vk::Format::R8G8B8A8_SRGB
        })
        .or_else(|| formats.first().copied())
}

/// Eye `index`'s half of the side-by-side image
fn eye_viewport(index: usize, eye_extent: vk::Extent2D) -> Viewport {
    Viewport {
        x: (index as u32 * eye_extent.width) as i32,
        y: 0,
        width: eye_extent.width,
        height: eye_extent.height,
    }
}

fn eye_pose(view: &xr::View, viewport: Viewport) -> EyePose {
    let o = view.pose.orientation;
    let p = view.pose.position;
    EyePose {
        orientation: [o.x, o.y, o.z, o.w],
        position: [p.x, p.y, p.z],
        projection: transform::projection_from_fov(
            view.fov.angle_left,
            view.fov.angle_right,
            view.fov.angle_up,
            view.fov.angle_down,
            NEAR,
            FAR,
        ),
        viewport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_names_are_borrowed_in_order() {
        let layers = ExtensionsAndLayers::new(true);
        let names = unsafe { extension_names(&layers.instance_extensions) };
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].to_str(), Ok("VK_EXT_debug_utils"));
        assert!(unsafe { extension_names(&[]) }.is_empty());
    }

    #[test]
    fn eyes_split_the_image_side_by_side() {
        let eye = vk::Extent2D {
            width: 1000,
            height: 800,
        };
        assert_eq!(
            eye_viewport(0, eye),
            Viewport {
                x: 0,
                y: 0,
                width: 1000,
                height: 800
            }
        );
        assert_eq!(eye_viewport(1, eye).x, 1000);
    }

    #[test]
    fn srgb_formats_are_preferred() {
        let formats = [vk::Format::R8G8B8A8_UNORM, vk::Format::R8G8B8A8_SRGB];
        assert_eq!(pick_color_format(&formats), Some(vk::Format::R8G8B8A8_SRGB));
        assert_eq!(
            pick_color_format(&[vk::Format::R8G8B8A8_UNORM]),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(pick_color_format(&[]), None);
    }

    #[test]
    fn eye_pose_carries_xr_view() {
        let view = xr::View {
            pose: xr::Posef {
                orientation: xr::Quaternionf {
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    w: 1.0,
                },
                position: xr::Vector3f {
                    x: 0.1,
                    y: 1.6,
                    z: 0.0,
                },
            },
            fov: xr::Fovf {
                angle_left: -0.7,
                angle_right: 0.7,
                angle_up: 0.7,
                angle_down: -0.7,
            },
        };
        let viewport = eye_viewport(1, vk::Extent2D {
            width: 10,
            height: 10,
        });
        let pose = eye_pose(&view, viewport);
        assert_eq!(pose.orientation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(pose.position, [0.1, 1.6, 0.0]);
        assert_eq!(pose.viewport, viewport);
        assert_eq!(pose.projection[(3, 2)], -1.0);
    }
}
