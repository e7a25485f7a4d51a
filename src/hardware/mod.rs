//! Hardware layer: the mux bus and the drivers for the devices behind it

pub mod bus;
pub mod rotary_valve;
pub mod syringe_pump;
pub mod temperature_controller;

pub use bus::{Bus, BusAddress, DeviceSession, DiscreteValve, LineState};
pub use rotary_valve::RotaryValve;
pub use syringe_pump::SyringePump;
pub use temperature_controller::{ControllerProbe, TemperatureController};
