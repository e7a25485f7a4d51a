//! Capability traits
//!
//! - [`Device`]: anything addressed through the mux bus
//! - [`TemperatureProbe`]: anything the steady-state loop can poll

use crate::error::AppResult;
use crate::hardware::bus::{Bus, BusAddress, DeviceSession};
use async_trait::async_trait;

/// A device reachable through the mux bus
#[async_trait]
pub trait Device: Send + Sync {
    /// Bus address of this device
    fn target(&self) -> BusAddress;

    /// Line speed the device expects
    fn baud_rate(&self) -> u32;

    /// Take the bus, select this device and switch the line to its speed.
    async fn open<'a>(&self, bus: &'a Bus) -> AppResult<DeviceSession<'a>> {
        let mut session = bus.session(self.target()).await?;
        session.set_baud_rate(self.baud_rate()).await?;
        Ok(session)
    }
}

/// Source of temperature readings in °C
#[async_trait]
pub trait TemperatureProbe: Send + Sync {
    async fn current_temperature(&self) -> AppResult<f64>;
}
