//! The event loop. Owns the window, both backends and the session state, and drives frames
//! from whichever clock the renderer last asked for.
mod input;
use crate::clock::{Clocks, FrameClock, PendingTick};
use crate::config::Settings;
use crate::mesh::Mesh;
use crate::renderer::FrameRenderer;
use crate::session::{SessionState, SessionStatus};
use crate::vr::{xr_prelude, OpenXrBackend, SessionEvent};
use crate::windowed::{FrameStart, RedrawClock, WinitBackend};
use anyhow::{Context, Result};
use input::Command;
use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

pub const NAME: &str = "lepus";

/// How long to sleep between event pumps while the XR session is not running
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Open the window and run until it is closed
pub fn launch(settings: Settings) -> Result<()> {
    // Handle interrupts gracefully
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("Setting Ctrl-C handler")?;

    let vr_available = probe();

    let event_loop = EventLoop::new();
    let (width, height) = settings.size;
    let window = WindowBuilder::new()
        .with_title(window_title(vr_available))
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)?;

    let mesh = Mesh::rabbit();
    info!(
        "Rabbit mesh: {} vertices, {} triangles",
        mesh.positions.len(),
        mesh.cells.len()
    );
    let windowed = WinitBackend::new(&window, NAME, &settings, &mesh)?;

    let mut runtime = Runtime {
        session: SessionState::default(),
        windowed,
        window,
        renderer: FrameRenderer::new(),
        stereo_tick: PendingTick::default(),
        mesh,
        settings,
        interrupted,
        start: Instant::now(),
        xr_idle: false,
    };

    if runtime.settings.vr {
        runtime.enter_vr()?;
    }
    runtime.window.request_redraw();

    event_loop.run(move |event, _, control_flow| {
        if let Err(e) = runtime.handle(event, control_flow) {
            log::error!("{:?}", e);
            *control_flow = ControlFlow::Exit;
        }
    })
}

/// Field order is drop order: the backends go before the window they draw to
struct Runtime {
    session: SessionState<OpenXrBackend>,
    windowed: WinitBackend,
    window: Window,
    renderer: FrameRenderer,
    stereo_tick: PendingTick,
    mesh: Mesh,
    settings: Settings,
    interrupted: Arc<AtomicBool>,
    start: Instant,
    xr_idle: bool,
}

impl Runtime {
    fn handle(&mut self, event: Event<()>, control_flow: &mut ControlFlow) -> Result<()> {
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::KeyboardInput { input, .. } => {
                    match input::command(input.state, input.virtual_keycode) {
                        Some(Command::EnterVr) => self.enter_vr()?,
                        Some(Command::Exit) => *control_flow = ControlFlow::Exit,
                        None => (),
                    }
                }
                WindowEvent::Resized(_) => self.window.request_redraw(),
                _ => (),
            },
            Event::RedrawRequested(_) => {
                if self.session.status() == SessionStatus::NotPresenting {
                    self.flat_frame()?;
                }
            }
            Event::MainEventsCleared => {
                if self.interrupted.swap(false, Ordering::Relaxed) && self.interrupt()? {
                    *control_flow = ControlFlow::Exit;
                }
                self.pump_session()?;
            }
            _ => (),
        }

        if *control_flow != ControlFlow::Exit {
            *control_flow = match self.session.status() {
                SessionStatus::NotPresenting => ControlFlow::Wait,
                SessionStatus::Presenting if self.xr_idle => {
                    ControlFlow::WaitUntil(Instant::now() + IDLE_POLL)
                }
                SessionStatus::Presenting => ControlFlow::Poll,
            };
        }

        Ok(())
    }

    /// Render to the window, if it has an area to render to
    fn flat_frame(&mut self) -> Result<()> {
        let start = self.windowed.begin_frame(&self.window)?;
        if start != FrameStart::Ready {
            start.reschedule(&mut RedrawClock(&self.window));
            return Ok(());
        }

        let timestamp = self.start.elapsed().as_secs_f64() * 1000.0;
        let mut display = RedrawClock(&self.window);
        let mut clocks = Clocks::new(&mut display, &mut self.stereo_tick);
        let summary = self.renderer.render_frame(
            timestamp,
            self.session.status(),
            None,
            &mut self.windowed,
            &mut clocks,
        )?;
        self.windowed.end_frame()?;

        debug!("Flat frame at {:.1}ms: {:?}", timestamp, summary);
        Ok(())
    }

    fn pump_session(&mut self) -> Result<()> {
        let event = match self.session.handle_mut() {
            Some(xr) => xr.poll_events()?,
            None => return Ok(()),
        };

        match event {
            SessionEvent::Ended => self.end_session(),
            SessionEvent::Idle => self.xr_idle = true,
            SessionEvent::Running => {
                self.xr_idle = false;
                if self.stereo_tick.take() {
                    self.stereo_frame()?;
                }
            }
        }
        Ok(())
    }

    fn stereo_frame(&mut self) -> Result<()> {
        let status = self.session.status();
        let xr = match self.session.handle_mut() {
            Some(xr) => xr,
            None => return Ok(()),
        };

        let stereo = xr.begin_frame()?;
        let timestamp = xr.timestamp_ms().unwrap_or(0.0);
        let mut display = RedrawClock(&self.window);
        let mut clocks = Clocks::new(&mut display, &mut self.stereo_tick);
        let summary = self.renderer.render_frame(
            timestamp,
            status,
            stereo.as_ref(),
            &mut *xr,
            &mut clocks,
        )?;
        xr.end_frame()?;

        debug!("Stereo frame at {:.1}ms: {:?}", timestamp, summary);
        Ok(())
    }

    /// Request a stereo session. Failure to get one leaves presentation flat.
    fn enter_vr(&mut self) -> Result<()> {
        if self.session.status() == SessionStatus::Presenting {
            return Ok(());
        }

        if !probe() {
            self.window.set_title(&window_title(false));
            return Ok(());
        }

        match OpenXrBackend::new(NAME, &self.settings, &self.mesh) {
            Ok(xr) => {
                self.session.begin(xr)?;
                self.xr_idle = true;
                self.stereo_tick.request_tick();
                self.window.set_title(&window_title(true));
                info!("VR session requested");
            }
            Err(e) => warn!("Failed to start a VR session: {:#}", e),
        }
        Ok(())
    }

    fn end_session(&mut self) {
        if self.session.end().is_some() {
            info!("VR session ended");
        }
        self.xr_idle = false;
        // Stale stereo requests must not leak into the next session
        self.stereo_tick.take();
        self.window.request_redraw();
    }

    /// Returns whether the loop should exit
    fn interrupt(&mut self) -> Result<bool> {
        match self.session.handle_mut() {
            Some(xr) => {
                if !xr.request_exit()? {
                    info!("OpenXR exiting gracefully");
                    self.end_session();
                }
                Ok(false)
            }
            None => {
                info!("Interrupted");
                Ok(true)
            }
        }
    }
}

/// Whether VR can be offered, logging why not
fn probe() -> bool {
    match xr_prelude::probe_support() {
        Ok(true) => true,
        Ok(false) => {
            warn!("OpenXR not supported :(");
            false
        }
        Err(e) => {
            warn!("OpenXR not supported :( ({:#})", e);
            false
        }
    }
}

fn window_title(vr_available: bool) -> String {
    if vr_available {
        NAME.to_string()
    } else {
        format!("{} (VR unavailable)", NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_marks_missing_vr() {
        assert_eq!(window_title(true), "lepus");
        assert_eq!(window_title(false), "lepus (VR unavailable)");
    }
}
