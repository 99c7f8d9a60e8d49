//! Per-frame draw logic shared by the windowed and OpenXR paths.
use crate::clock::{Clock, Clocks};
use crate::session::SessionStatus;
use crate::transform;
use anyhow::Result;
use nalgebra::Matrix4;

/// Color the framebuffer is cleared to every frame
pub const BACKGROUND: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
/// Depth the framebuffer is cleared to every frame (far)
pub const CLEAR_DEPTH: f32 = 1.0;

/// Pixel rectangle within a framebuffer. The origin is the bottom-left corner.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One eye as reported by the stereo device for this tick
#[derive(Debug, Clone, PartialEq)]
pub struct EyePose {
    /// Quaternion, `[x, y, z, w]`
    pub orientation: [f32; 4],
    pub position: [f32; 3],
    pub projection: Matrix4<f32>,
    pub viewport: Viewport,
}

/// Every eye with a resolvable pose this tick
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StereoFrame {
    pub eyes: Vec<EyePose>,
}

/// Camera for one rendered eye. Lives for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EyeView {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub viewport: Viewport,
}

/// Everything a single draw submission needs besides the mesh
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub model: Matrix4<f32>,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub viewport: Viewport,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Framebuffer {
    /// The window surface
    Default,
    /// The stereo device's swapchain image
    Stereo,
}

/// A graphics context able to clear and draw the mesh
pub trait RenderBackend {
    /// Size of the default framebuffer in pixels
    fn surface_size(&self) -> (u32, u32);
    /// Direct subsequent clears and draws to `target`
    fn bind_framebuffer(&mut self, target: Framebuffer) -> Result<()>;
    /// Clear color and depth of the bound framebuffer
    fn clear(&mut self, color: [f32; 4], depth: f32) -> Result<()>;
    /// Draw the mesh once
    fn draw(&mut self, call: &DrawCall) -> Result<()>;
}

/// What happened during one tick
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    pub draws: usize,
    /// The clock asked for the next tick
    pub clock: Clock,
}

/// Computes the eye views for a tick and submits one draw per eye
#[derive(Debug, Default)]
pub struct FrameRenderer;

impl FrameRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render one frame at `timestamp` (milliseconds).
    ///
    /// While presenting, `stereo_frame` carries the eyes to draw; `None` means no pose could be
    /// resolved and nothing is drawn. Either way the next tick is requested from the clock
    /// matching `status`.
    pub fn render_frame(
        &self,
        timestamp: f64,
        status: SessionStatus,
        stereo_frame: Option<&StereoFrame>,
        backend: &mut dyn RenderBackend,
        clocks: &mut Clocks,
    ) -> Result<FrameSummary> {
        let model = transform::model_transform(timestamp);

        let draws = match status {
            SessionStatus::Presenting => match stereo_frame {
                Some(frame) => {
                    let views = stereo_eye_views(frame);
                    submit(backend, Framebuffer::Stereo, &model, &views)?
                }
                None => 0,
            },
            SessionStatus::NotPresenting => match flat_eye_view(backend.surface_size()) {
                Some(view) => submit(backend, Framebuffer::Default, &model, &[view])?,
                None => 0,
            },
        };

        let clock = status.clock();
        clocks.get(clock).request_tick();

        Ok(FrameSummary { draws, clock })
    }
}

/// One eye view per pose; projection and viewport come straight from the device
pub fn stereo_eye_views(frame: &StereoFrame) -> Vec<EyeView> {
    frame
        .eyes
        .iter()
        .map(|eye| EyeView {
            view: transform::view_from_pose(eye.orientation, eye.position),
            projection: eye.projection,
            viewport: eye.viewport,
        })
        .collect()
}

/// The fixed flat-screen camera covering the whole surface. `None` for an empty surface.
pub fn flat_eye_view((width, height): (u32, u32)) -> Option<EyeView> {
    if width == 0 || height == 0 {
        return None;
    }
    Some(EyeView {
        view: transform::flat_view(),
        projection: transform::flat_projection(width, height),
        viewport: Viewport {
            x: 0,
            y: 0,
            width,
            height,
        },
    })
}

/// Bind and clear `target` once, then draw every view
fn submit(
    backend: &mut dyn RenderBackend,
    target: Framebuffer,
    model: &Matrix4<f32>,
    views: &[EyeView],
) -> Result<usize> {
    backend.bind_framebuffer(target)?;
    backend.clear(BACKGROUND, CLEAR_DEPTH)?;
    for eye in views {
        backend.draw(&DrawCall {
            model: *model,
            view: eye.view,
            projection: eye.projection,
            viewport: eye.viewport,
        })?;
    }
    Ok(views.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PendingTick;
    use nalgebra::{UnitQuaternion, Vector3};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Bind(Framebuffer),
        Clear([f32; 4], f32),
        Draw(DrawCall),
    }

    struct Recorder {
        size: (u32, u32),
        ops: Vec<Op>,
    }

    impl Recorder {
        fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                ops: Vec::new(),
            }
        }

        fn draws(&self) -> Vec<&DrawCall> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Draw(call) => Some(call),
                    _ => None,
                })
                .collect()
        }

        fn clears(&self) -> usize {
            self.ops.iter().filter(|op| matches!(op, Op::Clear(..))).count()
        }
    }

    impl RenderBackend for Recorder {
        fn surface_size(&self) -> (u32, u32) {
            self.size
        }
        fn bind_framebuffer(&mut self, target: Framebuffer) -> Result<()> {
            self.ops.push(Op::Bind(target));
            Ok(())
        }
        fn clear(&mut self, color: [f32; 4], depth: f32) -> Result<()> {
            self.ops.push(Op::Clear(color, depth));
            Ok(())
        }
        fn draw(&mut self, call: &DrawCall) -> Result<()> {
            self.ops.push(Op::Draw(call.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Ticks {
        display: PendingTick,
        stereo: PendingTick,
    }

    impl Ticks {
        fn render(
            &mut self,
            timestamp: f64,
            status: SessionStatus,
            frame: Option<&StereoFrame>,
            backend: &mut Recorder,
        ) -> FrameSummary {
            let mut clocks = Clocks::new(&mut self.display, &mut self.stereo);
            FrameRenderer::new()
                .render_frame(timestamp, status, frame, backend, &mut clocks)
                .unwrap()
        }
    }

    fn close(a: &Matrix4<f32>, b: &Matrix4<f32>) -> bool {
        (a - b).abs().max() < 1e-5
    }

    fn eye(orientation: UnitQuaternion<f32>, position: [f32; 3], x: i32) -> EyePose {
        let q = orientation.quaternion();
        EyePose {
            orientation: [q.i, q.j, q.k, q.w],
            position,
            projection: Matrix4::new_perspective(0.9, 1.6, 0.1, 100.0),
            viewport: Viewport {
                x,
                y: 0,
                width: 1000,
                height: 1100,
            },
        }
    }

    fn two_eyes() -> StereoFrame {
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.2, 0.05);
        StereoFrame {
            eyes: vec![
                eye(rotation, [-0.032, 1.7, 0.0], 0),
                eye(rotation, [0.032, 1.7, 0.0], 1000),
            ],
        }
    }

    #[test]
    fn flat_frame_at_zero() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        let summary = ticks.render(0.0, SessionStatus::NotPresenting, None, &mut backend);

        assert_eq!(summary.draws, 1);
        assert_eq!(summary.clock, Clock::Display);
        assert_eq!(backend.ops[0], Op::Bind(Framebuffer::Default));
        assert_eq!(backend.ops[1], Op::Clear(BACKGROUND, CLEAR_DEPTH));

        let draws = backend.draws();
        assert_eq!(draws.len(), 1);
        let call = draws[0];
        assert!(close(&call.view, &Matrix4::identity()));
        let expected_projection =
            Matrix4::new_perspective(2.0, std::f32::consts::FRAC_PI_2, 0.01, 100.0);
        assert!(close(&call.projection, &expected_projection));
        let expected_model = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -0.5))
            * Matrix4::new_scaling(0.01);
        assert!(close(&call.model, &expected_model));
        assert_eq!(
            call.viewport,
            Viewport {
                x: 0,
                y: 0,
                width: 300,
                height: 150
            }
        );

        assert!(ticks.display.take());
        assert!(!ticks.stereo.is_requested());
    }

    #[test]
    fn flat_aspect_follows_resize() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        ticks.render(10.0, SessionStatus::NotPresenting, None, &mut backend);
        backend.size = (400, 800);
        ticks.render(26.0, SessionStatus::NotPresenting, None, &mut backend);

        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        let aspect = |p: &Matrix4<f32>| p[(1, 1)] / p[(0, 0)];
        assert!((aspect(&draws[0].projection) - 2.0).abs() < 1e-5);
        assert!((aspect(&draws[1].projection) - 0.5).abs() < 1e-5);
        assert_eq!(draws[1].viewport.width, 400);
        assert_eq!(draws[1].viewport.height, 800);
    }

    #[test]
    fn minimized_surface_draws_nothing() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(0, 150);
        let summary = ticks.render(5.0, SessionStatus::NotPresenting, None, &mut backend);
        assert_eq!(summary.draws, 0);
        assert!(backend.ops.is_empty());
        assert!(ticks.display.take());
    }

    #[test]
    fn stereo_draws_once_per_eye() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        let frame = two_eyes();
        let summary = ticks.render(1500.0, SessionStatus::Presenting, Some(&frame), &mut backend);

        assert_eq!(summary.draws, 2);
        assert_eq!(summary.clock, Clock::Stereo);
        assert_eq!(backend.clears(), 1);
        assert_eq!(backend.ops[0], Op::Bind(Framebuffer::Stereo));
        assert!(matches!(backend.ops[1], Op::Clear(..)));

        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        let model = transform::model_transform(1500.0);
        for (call, pose) in draws.iter().zip(&frame.eyes) {
            let [x, y, z, w] = pose.orientation;
            let rotation =
                UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(w, x, y, z));
            let [px, py, pz] = pose.position;
            let rigid = Matrix4::new_translation(&Vector3::new(px, py, pz))
                * rotation.to_homogeneous();
            assert!(close(&call.view, &rigid.try_inverse().unwrap()));
            assert_eq!(call.projection, pose.projection);
            assert_eq!(call.viewport, pose.viewport);
            assert_eq!(call.model, model);
        }

        assert!(ticks.stereo.take());
        assert!(!ticks.display.is_requested());
    }

    #[test]
    fn stereo_draw_count_matches_eyes() {
        let mut ticks = Ticks::default();
        for n in 0..4 {
            let mut backend = Recorder::new(300, 150);
            let rotation = UnitQuaternion::identity();
            let frame = StereoFrame {
                eyes: (0..n).map(|i| eye(rotation, [0.0; 3], i * 10)).collect(),
            };
            let summary = ticks.render(1.0, SessionStatus::Presenting, Some(&frame), &mut backend);
            assert_eq!(summary.draws, n as usize);
            assert_eq!(backend.draws().len(), n as usize);
            assert_eq!(backend.clears(), 1);
        }
    }

    #[test]
    fn unresolved_pose_skips_but_keeps_ticking() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        let summary = ticks.render(42.0, SessionStatus::Presenting, None, &mut backend);

        assert_eq!(summary.draws, 0);
        assert!(backend.ops.is_empty());
        assert!(ticks.stereo.take());
        assert!(!ticks.display.is_requested());
    }

    #[test]
    fn session_end_returns_to_display_clock() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        let frame = two_eyes();
        ticks.render(100.0, SessionStatus::Presenting, Some(&frame), &mut backend);
        assert!(ticks.stereo.take());

        // The device reported the end of the session between ticks
        ticks.render(116.0, SessionStatus::NotPresenting, None, &mut backend);
        ticks.render(132.0, SessionStatus::NotPresenting, None, &mut backend);
        assert!(ticks.display.take());
        assert!(!ticks.stereo.is_requested());
        assert_eq!(backend.ops.last().map(|op| matches!(op, Op::Draw(_))), Some(true));
    }

    #[test]
    fn clear_precedes_every_draw() {
        let mut ticks = Ticks::default();
        let mut backend = Recorder::new(300, 150);
        let frame = two_eyes();
        ticks.render(7.0, SessionStatus::Presenting, Some(&frame), &mut backend);
        let first_draw = backend
            .ops
            .iter()
            .position(|op| matches!(op, Op::Draw(_)))
            .unwrap();
        let last_clear = backend
            .ops
            .iter()
            .rposition(|op| matches!(op, Op::Clear(..)))
            .unwrap();
        assert!(last_clear < first_draw);
    }
}
