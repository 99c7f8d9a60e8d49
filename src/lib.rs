//! Lepus: a spinning rabbit, drawn to a window with Vulkan or to a headset through OpenXR.
//! The frame renderer is backend agnostic; each tick it is handed the session status and
//! whichever clock should schedule the next one.
extern crate openxr as xr;
mod allocated_buffer;
pub mod clock;
mod command_buffers;
pub mod config;
mod core;
mod extensions;
mod frame_sync;
mod gpu_mesh;
mod hardware_query;
pub mod logging;
pub mod mesh;
mod pipeline;
pub mod renderer;
pub mod runtime;
pub mod session;
mod shader;
mod swapchain_images;
pub mod transform;
mod vertex;
mod vr;
mod windowed;
pub use clock::{Clock, Clocks, FrameClock, PendingTick};
pub use config::Settings;
pub use mesh::Mesh;
pub use renderer::{
    DrawCall, EyePose, EyeView, FrameRenderer, FrameSummary, Framebuffer, RenderBackend,
    StereoFrame, Viewport,
};
pub use session::{SessionState, SessionStatus};
pub use vertex::Vertex;
pub use vr::{xr_prelude::probe_support, OpenXrBackend, SessionEvent};
pub use windowed::{FrameStart, RedrawClock, WinitBackend};

pub(crate) const ENGINE_NAME: &str = "Lepus";
pub(crate) fn engine_version() -> u32 {
    erupt::vk1_0::make_version(1, 0, 0)
}
