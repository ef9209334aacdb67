#![cfg_attr(not(test), no_std)]

use minicbor::{CborLen, Decode, Encode};

/// Instantaneous attitude and power target sent to the vehicle.
#[derive(Encode, Decode, CborLen, Debug, Default, Clone, Copy, PartialEq)]
pub struct Setpoint {
    // degrees
    #[n(0)]
    pub roll: f32,
    // degrees
    #[n(1)]
    pub pitch: f32,
    // degrees per second
    #[n(2)]
    pub yaw: f32,
    // [0..65535]
    #[n(3)]
    pub thrust: u16,
}

impl Setpoint {
    /// All axes neutral, motors off. Also unlocks thrust on the vehicle.
    pub const NEUTRAL: Setpoint = Setpoint {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        thrust: 0,
    };

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

/// Telemetry returned by the vehicle in radio ACK payloads.
#[derive(Encode, Decode, CborLen, Debug, Clone, Copy, PartialEq)]
pub struct Status {
    #[n(0)]
    pub roll: f32,
    #[n(1)]
    pub pitch: f32,
    #[n(2)]
    pub battery: f32,
}
