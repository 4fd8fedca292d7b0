use serde::Deserialize;

use crate::controller::{Command, Direction};

/// Minimum vertical travel, in points, for a swipe to zap.
const SWIPE_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Select,
    PlayPause,
}

impl RemoteKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "up" | "arrowup" | "channelup" => Some(Self::Up),
            "down" | "arrowdown" | "channeldown" => Some(Self::Down),
            "left" | "arrowleft" => Some(Self::Left),
            "right" | "arrowright" => Some(Self::Right),
            "select" | "enter" | "ok" => Some(Self::Select),
            "play_pause" | "playpause" | "space" | " " => Some(Self::PlayPause),
            _ => None,
        }
    }

    pub fn command(self) -> Command {
        match self {
            Self::Up => Command::Step { direction: Direction::Prev },
            Self::Down => Command::Step { direction: Direction::Next },
            Self::Left => Command::CycleCategory { direction: Direction::Prev },
            Self::Right => Command::CycleCategory { direction: Direction::Next },
            Self::Select | Self::PlayPause => Command::TogglePlayPause,
        }
    }
}

/// Maps a released touch gesture to a zap; swiping up goes to the next channel.
pub fn swipe_command(dx: f64, dy: f64) -> Option<Command> {
    if dy.abs() <= SWIPE_THRESHOLD || dy.abs() <= dx.abs() {
        return None;
    }
    let direction = if dy < 0.0 { Direction::Next } else { Direction::Prev };
    Some(Command::Step { direction })
}
