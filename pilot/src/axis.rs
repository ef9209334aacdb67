use std::ops::Neg;
use std::str::FromStr;

use protocol::Setpoint;

use crate::symbol::Symbol;

pub const THRUST_STEP: i32 = 100;
pub const YAW_STEP: i32 = 10;
pub const PITCH_STEP: f32 = 1.0;
pub const ROLL_STEP: f32 = 0.5;

/// Value the roll bounce conditions are compared against.
///
/// The roll commands historically compare the *thrust* against the roll
/// limits. That is kept as the default until confirmed otherwise; `Roll`
/// compares the roll axis against its own limits instead.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RollReference {
    #[default]
    Thrust,
    Roll,
}

impl FromStr for RollReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thrust" => Ok(RollReference::Thrust),
            "roll" => Ok(RollReference::Roll),
            other => Err(format!("unknown roll reference `{other}` (thrust|roll)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub hover: i32,
    pub up_thrust: i32,
    pub down_thrust: i32,
    pub yaw_left: i32,
    pub yaw_right: i32,
    pub forward_pitch: f32,
    pub backward_pitch: f32,
    pub roll_left: f32,
    pub roll_right: f32,
    pub roll_reference: RollReference,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            hover: 2000,
            up_thrust: 3000,
            down_thrust: 1000,
            yaw_left: 90,
            yaw_right: -90,
            forward_pitch: -10.0,
            backward_pitch: 10.0,
            roll_left: 5.0,
            roll_right: -5.0,
            roll_reference: RollReference::Thrust,
        }
    }
}

/// The four control axes. Starts neutral (all zero, motors off).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AxisState {
    pub thrust: i32,
    pub yaw: i32,
    pub pitch: f32,
    pub roll: f32,
}

impl AxisState {
    /// Applies one command and returns the next state.
    ///
    /// Every command moves a single axis one step toward its limit. Once
    /// the limit is reached the step is reversed, so repeated taps bounce
    /// the axis between the limit and one step short of it. Symbols
    /// outside the alphabet, including stop, leave the state untouched.
    pub fn apply(self, symbol: Symbol, limits: &Limits) -> AxisState {
        let mut next = self;
        match symbol {
            Symbol::Hover => next.thrust += toward_upper(self.thrust, limits.hover, THRUST_STEP),
            Symbol::Up => next.thrust += toward_upper(self.thrust, limits.up_thrust, THRUST_STEP),
            Symbol::Down => {
                next.thrust += toward_lower(self.thrust, limits.down_thrust, THRUST_STEP)
            }
            Symbol::YawLeft => next.yaw += toward_upper(self.yaw, limits.yaw_left, YAW_STEP),
            Symbol::YawRight => next.yaw += toward_lower(self.yaw, limits.yaw_right, YAW_STEP),
            Symbol::PitchForward => {
                next.pitch += toward_lower(self.pitch, limits.forward_pitch, PITCH_STEP)
            }
            Symbol::PitchBackward => {
                next.pitch += toward_upper(self.pitch, limits.backward_pitch, PITCH_STEP)
            }
            Symbol::RollLeft => {
                next.roll += toward_upper(self.roll_reference(limits), limits.roll_left, ROLL_STEP)
            }
            Symbol::RollRight => {
                next.roll += toward_lower(self.roll_reference(limits), limits.roll_right, ROLL_STEP)
            }
            Symbol::Idle | Symbol::Stop | Symbol::Unknown(_) => {}
        }
        next
    }

    fn roll_reference(&self, limits: &Limits) -> f32 {
        match limits.roll_reference {
            RollReference::Thrust => self.thrust as f32,
            RollReference::Roll => self.roll,
        }
    }
}

impl From<&AxisState> for Setpoint {
    fn from(state: &AxisState) -> Self {
        Setpoint {
            roll: state.roll,
            pitch: state.pitch,
            yaw: state.yaw as f32,
            thrust: state.thrust.clamp(0, u16::MAX as i32) as u16,
        }
    }
}

/// Step for an axis commanded upward: positive until `limit` is reached.
fn toward_upper<T>(value: T, limit: T, step: T) -> T
where
    T: PartialOrd + Neg<Output = T>,
{
    if value >= limit {
        -step
    } else {
        step
    }
}

/// Step for an axis commanded downward: negative until `limit` is reached.
fn toward_lower<T>(value: T, limit: T, step: T) -> T
where
    T: PartialOrd + Neg<Output = T>,
{
    if value <= limit {
        step
    } else {
        -step
    }
}
