//! Named controller commands
//!
//! The controller's firmware interprets most channel values as opcodes
//! rather than levels: Brightness `1` means "step up", Control `100` turns
//! pattern rotation on. [`Command`] gives those opcodes names so a UI does
//! not have to carry the table itself.

use std::fmt;
use std::str::FromStr;

use crate::channel::Channel;

/// Animated pattern selected through the Program channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Rainbow,
    Pride,
    Waves,
    Bubble,
    Dots,
    FxWave2d,
    Radii,
    Cells,
    Off,
}

impl Program {
    pub const ALL: [Program; 9] = [
        Program::Rainbow,
        Program::Pride,
        Program::Waves,
        Program::Bubble,
        Program::Dots,
        Program::FxWave2d,
        Program::Radii,
        Program::Cells,
        Program::Off,
    ];

    pub fn value(self) -> u8 {
        match self {
            Program::Rainbow => 1,
            Program::Pride => 2,
            Program::Waves => 3,
            Program::Bubble => 4,
            Program::Dots => 5,
            Program::FxWave2d => 6,
            Program::Radii => 7,
            Program::Cells => 8,
            Program::Off => 99,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Program::Rainbow => "rainbow",
            Program::Pride => "pride",
            Program::Waves => "waves",
            Program::Bubble => "bubble",
            Program::Dots => "dots",
            Program::FxWave2d => "fxwave2d",
            Program::Radii => "radii",
            Program::Cells => "cells",
            Program::Off => "off",
        }
    }
}

/// Layout variant selected through the Mode channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Octopus,
    Flower,
    Lotus,
    Radial,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Octopus, Mode::Flower, Mode::Lotus, Mode::Radial];

    pub fn value(self) -> u8 {
        match self {
            Mode::Octopus => 1,
            Mode::Flower => 2,
            Mode::Lotus => 3,
            Mode::Radial => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Octopus => "octopus",
            Mode::Flower => "flower",
            Mode::Lotus => "lotus",
            Mode::Radial => "radial",
        }
    }
}

/// Direction for the stepped Brightness and Speed channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Up,
    Down,
}

/// A named operation that maps to one channel write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Program(Program),
    Mode(Mode),
    Brightness(Step),
    Speed(Step),
    Palette(u8),
    /// Toggle the "fancy" trigger
    Fancy,
    /// Automatic pattern rotation on or off
    Rotate(bool),
}

impl Command {
    pub fn channel(&self) -> Channel {
        match self {
            Command::Program(_) => Channel::Program,
            Command::Mode(_) => Channel::Mode,
            Command::Brightness(_) => Channel::Brightness,
            Command::Speed(_) => Channel::Speed,
            Command::Palette(_) => Channel::Palette,
            Command::Fancy | Command::Rotate(_) => Channel::Control,
        }
    }

    /// Byte written to the channel
    pub fn value(&self) -> u8 {
        match self {
            Command::Program(p) => p.value(),
            Command::Mode(m) => m.value(),
            // Speed "faster" shares opcode 1 with brightness "up"
            Command::Brightness(Step::Up) | Command::Speed(Step::Up) => 1,
            Command::Brightness(Step::Down) | Command::Speed(Step::Down) => 2,
            Command::Palette(n) => *n,
            Command::Fancy => 1,
            Command::Rotate(true) => 100,
            Command::Rotate(false) => 101,
        }
    }

    pub fn to_write(&self) -> (Channel, u8) {
        (self.channel(), self.value())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Program(p) => write!(f, "program {}", p.as_str()),
            Command::Mode(m) => write!(f, "mode {}", m.as_str()),
            Command::Brightness(Step::Up) => write!(f, "brightness up"),
            Command::Brightness(Step::Down) => write!(f, "brightness down"),
            Command::Speed(Step::Up) => write!(f, "speed faster"),
            Command::Speed(Step::Down) => write!(f, "speed slower"),
            Command::Palette(n) => write!(f, "palette {}", n),
            Command::Fancy => write!(f, "control fancy"),
            Command::Rotate(true) => write!(f, "control rotate-on"),
            Command::Rotate(false) => write!(f, "control rotate-off"),
        }
    }
}

/// Parses `"<channel> <name>"`, e.g. `program rainbow`, `speed slower`,
/// `palette 12`, `control rotate-on`
impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(channel), Some(arg), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("Expected '<channel> <command>', got '{}'", s.trim()));
        };
        let channel: Channel = channel.parse()?;
        let arg = arg.to_ascii_lowercase();

        let command = match channel {
            Channel::Program => Program::ALL
                .iter()
                .find(|p| p.as_str() == arg)
                .map(|p| Command::Program(*p)),
            Channel::Mode => Mode::ALL
                .iter()
                .find(|m| m.as_str() == arg)
                .map(|m| Command::Mode(*m)),
            Channel::Brightness => match arg.as_str() {
                "up" => Some(Command::Brightness(Step::Up)),
                "down" => Some(Command::Brightness(Step::Down)),
                _ => None,
            },
            Channel::Speed => match arg.as_str() {
                "faster" | "up" => Some(Command::Speed(Step::Up)),
                "slower" | "down" => Some(Command::Speed(Step::Down)),
                _ => None,
            },
            Channel::Palette => arg.parse::<u8>().ok().map(Command::Palette),
            Channel::Control => match arg.as_str() {
                "fancy" => Some(Command::Fancy),
                "rotate-on" => Some(Command::Rotate(true)),
                "rotate-off" => Some(Command::Rotate(false)),
                _ => None,
            },
        };

        command.ok_or_else(|| format!("Unknown {} command '{}'", channel, arg))
    }
}
