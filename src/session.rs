use crate::clock::Clock;
use anyhow::{bail, Result};

/// Whether we are presenting to a stereo device, and the session handle if so.
/// At most one session exists at a time.
pub enum SessionState<H> {
    NotPresenting,
    Presenting(H),
}

/// The part of [`SessionState`] the frame renderer reads each tick
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    NotPresenting,
    Presenting,
}

impl<H> SessionState<H> {
    /// Start presenting with `handle`
    pub fn begin(&mut self, handle: H) -> Result<()> {
        if let SessionState::Presenting(_) = self {
            bail!("A stereo session is already presenting");
        }
        *self = SessionState::Presenting(handle);
        Ok(())
    }

    /// Stop presenting, handing back the session if there was one
    pub fn end(&mut self) -> Option<H> {
        match std::mem::replace(self, SessionState::NotPresenting) {
            SessionState::Presenting(handle) => Some(handle),
            SessionState::NotPresenting => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::NotPresenting => SessionStatus::NotPresenting,
            SessionState::Presenting(_) => SessionStatus::Presenting,
        }
    }

    pub fn handle_mut(&mut self) -> Option<&mut H> {
        match self {
            SessionState::Presenting(handle) => Some(handle),
            SessionState::NotPresenting => None,
        }
    }
}

impl<H> Default for SessionState<H> {
    fn default() -> Self {
        SessionState::NotPresenting
    }
}

impl SessionStatus {
    /// The clock that paces frames in this state
    pub fn clock(self) -> Clock {
        match self {
            SessionStatus::NotPresenting => Clock::Display,
            SessionStatus::Presenting => Clock::Stereo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_end() {
        let mut state = SessionState::default();
        assert_eq!(state.status(), SessionStatus::NotPresenting);
        state.begin("headset").unwrap();
        assert_eq!(state.status(), SessionStatus::Presenting);
        assert_eq!(state.handle_mut(), Some(&mut "headset"));
        assert_eq!(state.end(), Some("headset"));
        assert_eq!(state.status(), SessionStatus::NotPresenting);
        assert_eq!(state.end(), None);
    }

    #[test]
    fn only_one_session_at_a_time() {
        let mut state = SessionState::default();
        state.begin(1).unwrap();
        assert!(state.begin(2).is_err());
        assert_eq!(state.end(), Some(1));
    }

    #[test]
    fn status_selects_clock() {
        assert_eq!(SessionStatus::NotPresenting.clock(), Clock::Display);
        assert_eq!(SessionStatus::Presenting.clock(), Clock::Stereo);
    }
}
