//! Cavro XCalibur syringe pump driver
//!
//! Protocol Reference: XCalibur pump operator manual, DT protocol
//! - Command frame: `/1<body>R\r` (address 1, `R` executes)
//! - Every command is followed by a status query `/1QR\r`; the pump is idle
//!   and error-free when the reply carries the status byte `` ` `` (0x60)
//! - Plunger position is commanded in motor steps: `steps = resolution ×
//!   volume / capacity`, and the division must be exact
//!
//! # Example Usage
//!
//! ```no_run
//! use polony_fluidics::hardware::{Bus, SyringePump};
//! use polony_fluidics::traits::Device;
//!
//! # async fn example(bus: &Bus) -> polony_fluidics::error::AppResult<()> {
//! let pump = SyringePump::new(9600);
//! let mut session = pump.open(bus).await?;
//! pump.set_speed(&mut session, 20).await?;
//! pump.set_valve_port(&mut session, 1).await?;
//! pump.set_absolute_volume(&mut session, 500).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{SyringeConfig, MAX_PUMP_SPEED};
use crate::error::{AppResult, FluidicsError};
use crate::hardware::bus::{BusAddress, DeviceSession};
use crate::traits::Device;
use tracing::debug;

/// Status query sent after every command
const STATUS_QUERY: &str = "/1QR\r";

/// Status byte meaning "idle, no error"
const READY: &str = "`";

/// Bytes the pump echoes after accepting a command
const COMMAND_REPLY_SIZE: usize = 3;

/// Bytes read back for a status query
const STATUS_REPLY_SIZE: usize = 4;

/// Syringe pump on the mux bus
#[derive(Debug, Clone)]
pub struct SyringePump {
    baud_rate: u32,
    capacity: u32,
    resolution: u32,
    port_count: u8,
    dead_volume_setting: u8,
    default_speed: u8,
}

impl SyringePump {
    /// 1000 µl syringe, 3000 steps per stroke, nine-port valve
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            capacity: 1000,
            resolution: 3000,
            port_count: 9,
            dead_volume_setting: 5,
            default_speed: 20,
        }
    }

    pub fn from_config(config: &SyringeConfig, baud_rate: u32) -> Self {
        Self {
            baud_rate,
            capacity: config.full_stroke,
            resolution: config.steps_per_stroke,
            port_count: config.port_count,
            dead_volume_setting: config.dead_volume_setting,
            default_speed: config.default_speed,
        }
    }

    /// Set stroke capacity (µl) and steps per stroke
    pub fn with_geometry(mut self, capacity: u32, resolution: u32) -> Self {
        self.capacity = capacity;
        self.resolution = resolution;
        self
    }

    /// Stroke capacity in µl
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn port_count(&self) -> u8 {
        self.port_count
    }

    /// Convert a plunger volume to motor steps.
    ///
    /// Rejects volumes beyond one stroke and volumes that do not land on a
    /// whole step.
    pub fn steps_for(&self, volume: u32) -> AppResult<u32> {
        if volume > self.capacity {
            return Err(FluidicsError::InvalidArgument(format!(
                "absolute volume {} ul exceeds stroke capacity {} ul",
                volume, self.capacity
            )));
        }
        let scaled = u64::from(self.resolution) * u64::from(volume);
        let capacity = u64::from(self.capacity);
        if scaled % capacity != 0 {
            return Err(FluidicsError::InexactVolume {
                volume,
                capacity: self.capacity,
                resolution: self.resolution,
            });
        }
        u32::try_from(scaled / capacity)
            .map_err(|_| FluidicsError::InvalidArgument(format!("step count for {} ul overflows", volume)))
    }

    pub fn check_speed(speed: u8) -> AppResult<()> {
        if speed > MAX_PUMP_SPEED {
            return Err(FluidicsError::InvalidArgument(format!(
                "pump speed {} outside 0..={}",
                speed, MAX_PUMP_SPEED
            )));
        }
        Ok(())
    }

    pub fn check_port(&self, port: u8) -> AppResult<()> {
        if port == 0 || port > self.port_count {
            return Err(FluidicsError::InvalidArgument(format!(
                "pump port {} outside 1..={}",
                port, self.port_count
            )));
        }
        Ok(())
    }

    /// Send one command frame and confirm the pump reports ready
    async fn command(&self, session: &mut DeviceSession<'_>, body: &str) -> AppResult<()> {
        session.ensure_target(self.target())?;
        let frame = format!("/1{}R\r", body);
        session.write(&frame).await?;
        session.read(COMMAND_REPLY_SIZE).await?;
        session
            .send_and_expect(STATUS_QUERY, READY, STATUS_REPLY_SIZE)
            .await?;
        Ok(())
    }

    /// Dead-volume setting, plunger home, default speed
    pub async fn initialize(&self, session: &mut DeviceSession<'_>) -> AppResult<()> {
        self.command(session, &format!("k{}", self.dead_volume_setting))
            .await?;
        self.command(session, "Z0").await?;
        self.command(session, &format!("S{}", self.default_speed))
            .await?;
        debug!("Syringe pump initialised");
        Ok(())
    }

    /// Plunger speed code, 0 (fastest) to 40
    pub async fn set_speed(&self, session: &mut DeviceSession<'_>, speed: u8) -> AppResult<()> {
        Self::check_speed(speed)?;
        self.command(session, &format!("S{}", speed)).await?;
        debug!("Syringe pump speed {}", speed);
        Ok(())
    }

    /// Route the syringe to one of its valve ports
    pub async fn set_valve_port(&self, session: &mut DeviceSession<'_>, port: u8) -> AppResult<()> {
        self.check_port(port)?;
        self.command(session, &format!("I{}", port)).await?;
        debug!("Syringe pump port {}", port);
        Ok(())
    }

    /// Move the plunger so the syringe holds `volume` µl
    pub async fn set_absolute_volume(
        &self,
        session: &mut DeviceSession<'_>,
        volume: u32,
    ) -> AppResult<()> {
        let steps = self.steps_for(volume)?;
        self.command(session, &format!("A{}", steps)).await?;
        debug!("Syringe pump volume {} ul ({} steps)", volume, steps);
        Ok(())
    }
}

impl Device for SyringePump {
    fn target(&self) -> BusAddress {
        BusAddress::SyringePump
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}
