//! Frame pacing. Each tick is requested from whichever clock is authoritative: the window's
//! redraw callback when flat, or the OpenXR frame loop while presenting.
use crate::session::SessionStatus;

/// Something that can be asked for exactly one more frame callback
pub trait FrameClock {
    fn request_tick(&mut self);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Clock {
    /// Window redraws
    Display,
    /// The stereo device's frame loop
    Stereo,
}

/// A tick request latch. The event loop consumes it with [`PendingTick::take`].
#[derive(Debug, Default)]
pub struct PendingTick {
    requested: bool,
}

impl PendingTick {
    /// Returns whether a tick was requested, clearing the request
    pub fn take(&mut self) -> bool {
        std::mem::replace(&mut self.requested, false)
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

impl FrameClock for PendingTick {
    fn request_tick(&mut self) {
        self.requested = true;
    }
}

/// Both clocks, so the renderer can pick one per tick
pub struct Clocks<'a> {
    pub display: &'a mut dyn FrameClock,
    pub stereo: &'a mut dyn FrameClock,
}

impl<'a> Clocks<'a> {
    pub fn new(display: &'a mut dyn FrameClock, stereo: &'a mut dyn FrameClock) -> Self {
        Self { display, stereo }
    }

    pub fn get(&mut self, clock: Clock) -> &mut dyn FrameClock {
        match clock {
            Clock::Display => &mut *self.display,
            Clock::Stereo => &mut *self.stereo,
        }
    }

    /// The authoritative clock for `status`
    pub fn for_status(&mut self, status: SessionStatus) -> &mut dyn FrameClock {
        self.get(status.clock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_tick_latches_once() {
        let mut tick = PendingTick::default();
        assert!(!tick.take());
        tick.request_tick();
        tick.request_tick();
        assert!(tick.is_requested());
        assert!(tick.take());
        assert!(!tick.take());
    }

    #[test]
    fn status_picks_adapter() {
        let mut display = PendingTick::default();
        let mut stereo = PendingTick::default();
        {
            let mut clocks = Clocks::new(&mut display, &mut stereo);
            clocks.for_status(SessionStatus::Presenting).request_tick();
        }
        assert!(!display.is_requested());
        assert!(stereo.take());
        {
            let mut clocks = Clocks::new(&mut display, &mut stereo);
            clocks.for_status(SessionStatus::NotPresenting).request_tick();
        }
        assert!(display.take());
        assert!(!stereo.is_requested());
    }
}
