use winit::event::{ElementState, VirtualKeyCode};

/// What a key press asks the runtime to do
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    EnterVr,
    Exit,
}

pub fn command(state: ElementState, key: Option<VirtualKeyCode>) -> Option<Command> {
    if state != ElementState::Pressed {
        return None;
    }
    match key? {
        VirtualKeyCode::V | VirtualKeyCode::Return => Some(Command::EnterVr),
        VirtualKeyCode::Escape => Some(Command::Exit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presses_map_to_commands() {
        let pressed = ElementState::Pressed;
        assert_eq!(command(pressed, Some(VirtualKeyCode::V)), Some(Command::EnterVr));
        assert_eq!(command(pressed, Some(VirtualKeyCode::Return)), Some(Command::EnterVr));
        assert_eq!(command(pressed, Some(VirtualKeyCode::Escape)), Some(Command::Exit));
        assert_eq!(command(pressed, Some(VirtualKeyCode::A)), None);
        assert_eq!(command(pressed, None), None);
    }

    #[test]
    fn releases_are_ignored() {
        assert_eq!(
            command(ElementState::Released, Some(VirtualKeyCode::Escape)),
            None
        );
    }
}
