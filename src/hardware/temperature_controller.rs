//! PR-59 Peltier temperature controller driver
//!
//! Used for both flowcell heaters and the reagent-block cooler.
//!
//! Protocol:
//! - `$W\r`: set RUN flag (output enabled)
//! - `$Q\r`: clear RUN flag
//! - `$R0=<value>\r`: main setpoint register
//! - `$R100?\r`: sensor 1 reading, returned as a signed scientific-notation
//!   token such as `+5.200000e+01`
//!
//! Each command is acknowledged with a carriage return.

use crate::error::{AppResult, FluidicsError};
use crate::hardware::bus::{Bus, BusAddress, DeviceSession};
use crate::traits::{Device, TemperatureProbe};
use async_trait::async_trait;
use tracing::{debug, info};

const ACK: &str = "\r";
const CONTROL_REPLY_SIZE: usize = 10;
const SETPOINT_REPLY_SIZE: usize = 11;
const READING_REPLY_SIZE: usize = 21;

/// Width of a sensor reading token, `[+-]d.dddddde[+-]dd`
const READING_TOKEN_WIDTH: usize = 13;

/// Extract the temperature from a sensor register reply.
///
/// The reply must be exactly one reading token followed by the carriage
/// return terminator. The mantissa runs from the sign to the exponent marker;
/// the exponent is the signed two-digit integer after it.
pub fn parse_temperature(response: &str) -> Option<f64> {
    let token = response.strip_suffix('\r')?;
    let bytes = token.as_bytes();
    if bytes.len() != READING_TOKEN_WIDTH {
        return None;
    }
    let sign = |b: u8| matches!(b, b'+' | b'-');
    let well_formed = sign(bytes[0])
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'.'
        && bytes[3..9].iter().all(u8::is_ascii_digit)
        && matches!(bytes[9], b'e' | b'E')
        && sign(bytes[10])
        && bytes[11..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return None;
    }

    let mantissa: f64 = token[..9].parse().ok()?;
    let exponent: i32 = token[10..].parse().ok()?;
    let value = mantissa * 10f64.powi(exponent);
    value.is_finite().then_some(value)
}

/// Render a setpoint for the `$R0=` register
fn format_setpoint(temperature: f64) -> String {
    format!("{}", temperature)
}

/// A PR-59 controller at one bus address
#[derive(Debug, Clone)]
pub struct TemperatureController {
    target: BusAddress,
    baud_rate: u32,
}

impl TemperatureController {
    /// Driver for the controller at `target`; must be a thermal address
    pub fn new(target: BusAddress, baud_rate: u32) -> AppResult<Self> {
        if !target.is_temperature_controller() {
            return Err(FluidicsError::InvalidArgument(format!(
                "{} is not a temperature controller",
                target
            )));
        }
        Ok(Self { target, baud_rate })
    }

    pub async fn set_control_on(&self, session: &mut DeviceSession<'_>) -> AppResult<()> {
        session.ensure_target(self.target)?;
        session.send_and_expect("$W\r", ACK, CONTROL_REPLY_SIZE).await?;
        debug!("{} control on", self.target);
        Ok(())
    }

    pub async fn set_control_off(&self, session: &mut DeviceSession<'_>) -> AppResult<()> {
        session.ensure_target(self.target)?;
        session.send_and_expect("$Q\r", ACK, CONTROL_REPLY_SIZE).await?;
        debug!("{} control off", self.target);
        Ok(())
    }

    pub async fn set_setpoint(
        &self,
        session: &mut DeviceSession<'_>,
        temperature: f64,
    ) -> AppResult<()> {
        if !temperature.is_finite() {
            return Err(FluidicsError::InvalidArgument(format!(
                "setpoint {} is not a temperature",
                temperature
            )));
        }
        session.ensure_target(self.target)?;
        let command = format!("$R0={}\r", format_setpoint(temperature));
        session
            .send_and_expect(&command, ACK, SETPOINT_REPLY_SIZE)
            .await?;
        Ok(())
    }

    /// Enable the output and write the setpoint
    pub async fn set_temperature(
        &self,
        session: &mut DeviceSession<'_>,
        temperature: f64,
    ) -> AppResult<()> {
        self.set_control_on(session).await?;
        self.set_setpoint(session, temperature).await?;
        info!("{} set to {} C", self.target, temperature);
        Ok(())
    }

    pub async fn current_temperature(&self, session: &mut DeviceSession<'_>) -> AppResult<f64> {
        session.ensure_target(self.target)?;
        let response = session
            .send_and_expect("$R100?\r", ACK, READING_REPLY_SIZE)
            .await?;
        parse_temperature(&response).ok_or_else(|| FluidicsError::MalformedResponse {
            device: self.target.to_string(),
            response,
        })
    }

    /// Bind to a bus so the controller can be polled as a [`TemperatureProbe`]
    pub fn probe<'a>(&'a self, bus: &'a Bus) -> ControllerProbe<'a> {
        ControllerProbe {
            bus,
            controller: self,
        }
    }
}

impl Device for TemperatureController {
    fn target(&self) -> BusAddress {
        self.target
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// A controller bound to the bus; each reading opens its own session
pub struct ControllerProbe<'a> {
    bus: &'a Bus,
    controller: &'a TemperatureController,
}

#[async_trait]
impl TemperatureProbe for ControllerProbe<'_> {
    async fn current_temperature(&self) -> AppResult<f64> {
        let mut session = self.controller.open(self.bus).await?;
        self.controller.current_temperature(&mut session).await
    }
}
