//! Two-channel phase-angle power regulator.
//!
//! Channel 1 feeds the central heating, channel 2 the hot water. "On" means
//! enabled with a near-maximum conduction angle, "off" means angle 0 and
//! disabled.

use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_PHASE_ANGLE: u16 = 359;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    CentralHeating,
    HotWater,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::CentralHeating, Channel::HotWater];

    pub fn number(self) -> u8 {
        match self {
            Channel::CentralHeating => 1,
            Channel::HotWater => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::CentralHeating => write!(f, "central-heating"),
            Channel::HotWater => write!(f, "hot-water"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("channel {channel}: {message}")]
    Command { channel: Channel, message: String },
    #[error("phase angle {0} out of range 0..=359")]
    InvalidAngle(u16),
    #[error("actuator initialization failed: {0}")]
    Init(String),
}

pub trait Actuator: Send + Sync {
    /// Puts the device into phase-angle mode for the given mains frequency,
    /// leaving every channel at angle 0 and disabled.
    fn initialize(&mut self, grid_frequency_hz: u32) -> Result<(), ActuatorError>;
    fn enable(&mut self, channel: Channel) -> Result<(), ActuatorError>;
    fn disable(&mut self, channel: Channel) -> Result<(), ActuatorError>;
    fn set_phase_angle(&mut self, channel: Channel, angle: u16) -> Result<(), ActuatorError>;

    fn turn_on(&mut self, channel: Channel, angle: u16) -> Result<(), ActuatorError> {
        info!(%channel, angle, "turning on");
        self.enable(channel)?;
        self.set_phase_angle(channel, angle)
    }

    fn turn_off(&mut self, channel: Channel) -> Result<(), ActuatorError> {
        info!(%channel, "turning off");
        self.set_phase_angle(channel, 0)?;
        self.disable(channel)
    }

    /// Commands every channel off. A failing channel does not stop the others;
    /// the last failure is returned.
    fn all_off(&mut self) -> Result<(), ActuatorError> {
        let mut result = Ok(());
        for channel in Channel::ALL {
            if let Err(e) = self.turn_off(channel) {
                warn!(%channel, error = %e, "failed to turn off");
                result = Err(e);
            }
        }
        result
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelState {
    pub enabled: bool,
    pub angle: u16,
}

impl ChannelState {
    pub fn is_on(&self) -> bool {
        self.enabled && self.angle > 0
    }
}

#[derive(Debug, Default)]
struct Board {
    grid_frequency_hz: Option<u32>,
    channels: [ChannelState; 2],
    failing: bool,
    commands: usize,
}

/// In-memory regulator. Clones share the same board so a test or the
/// dashboard can observe what the controller commanded.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActuator {
    board: Arc<Mutex<Board>>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, channel: Channel) -> ChannelState {
        self.with_board(|b| b.channels[index(channel)])
    }

    #[cfg(test)]
    pub fn grid_frequency(&self) -> Option<u32> {
        self.with_board(|b| b.grid_frequency_hz)
    }

    /// Number of successful commands issued so far.
    pub fn commands(&self) -> usize {
        self.with_board(|b| b.commands)
    }

    /// Makes every subsequent command fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.with_board(|b| b.failing = failing)
    }

    fn with_board<T>(&self, f: impl FnOnce(&mut Board) -> T) -> T {
        let mut board = self.board.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut board)
    }

    fn command(
        &mut self,
        channel: Channel,
        f: impl FnOnce(&mut ChannelState),
    ) -> Result<(), ActuatorError> {
        self.with_board(|b| {
            if b.failing {
                return Err(ActuatorError::Command {
                    channel,
                    message: "simulated fault".to_string(),
                });
            }
            f(&mut b.channels[index(channel)]);
            b.commands += 1;
            Ok(())
        })
    }
}

fn index(channel: Channel) -> usize {
    channel.number() as usize - 1
}

impl Actuator for SimulatedActuator {
    fn initialize(&mut self, grid_frequency_hz: u32) -> Result<(), ActuatorError> {
        self.with_board(|b| {
            if b.failing {
                return Err(ActuatorError::Init("simulated fault".to_string()));
            }
            b.grid_frequency_hz = Some(grid_frequency_hz);
            b.channels = [ChannelState::default(); 2];
            Ok(())
        })
    }

    fn enable(&mut self, channel: Channel) -> Result<(), ActuatorError> {
        self.command(channel, |c| c.enabled = true)
    }

    fn disable(&mut self, channel: Channel) -> Result<(), ActuatorError> {
        self.command(channel, |c| c.enabled = false)
    }

    fn set_phase_angle(&mut self, channel: Channel, angle: u16) -> Result<(), ActuatorError> {
        if angle > MAX_PHASE_ANGLE {
            return Err(ActuatorError::InvalidAngle(angle));
        }
        self.command(channel, |c| c.angle = angle)
    }
}
