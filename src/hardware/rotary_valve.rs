//! Rheodyne ten-port rotary valve driver
//!
//! Protocol:
//! - Move: `P<hh>\r` where `<hh>` is the position as two uppercase hex digits
//! - Confirm: `S\r`; the two-byte reply must echo the same digits

use crate::config::ROTARY_VALVE_POSITIONS;
use crate::error::{AppResult, FluidicsError};
use crate::hardware::bus::{BusAddress, DeviceSession};
use crate::traits::Device;
use tracing::debug;

const STATUS_QUERY: &str = "S\r";
const STATUS_REPLY_SIZE: usize = 2;

/// Two-digit uppercase hex encoding of a valve position
pub fn position_code(position: u8) -> String {
    format!("{:02X}", position)
}

/// One of the four rotary valves
#[derive(Debug, Clone)]
pub struct RotaryValve {
    target: BusAddress,
    baud_rate: u32,
    positions: u8,
}

impl RotaryValve {
    /// Driver for the valve at `target`, which must be a rotary valve address
    pub fn new(target: BusAddress, baud_rate: u32) -> AppResult<Self> {
        if !target.is_rotary_valve() {
            return Err(FluidicsError::InvalidArgument(format!(
                "{} is not a rotary valve",
                target
            )));
        }
        Ok(Self {
            target,
            baud_rate,
            positions: ROTARY_VALVE_POSITIONS,
        })
    }

    /// Driver for rotary valve `number` (1..=4)
    pub fn numbered(number: u8, baud_rate: u32) -> AppResult<Self> {
        let target = BusAddress::rotary_valve(number).ok_or_else(|| {
            FluidicsError::InvalidArgument(format!("rotary valve {} outside 1..=4", number))
        })?;
        Self::new(target, baud_rate)
    }

    pub fn positions(&self) -> u8 {
        self.positions
    }

    /// Turn to `position` (1..=10) and confirm the valve reports it
    pub async fn set_position(&self, session: &mut DeviceSession<'_>, position: u8) -> AppResult<()> {
        if position == 0 || position > self.positions {
            return Err(FluidicsError::InvalidArgument(format!(
                "{} position {} outside 1..={}",
                self.target, position, self.positions
            )));
        }
        session.ensure_target(self.target)?;

        let code = position_code(position);
        session.write(&format!("P{}\r", code)).await?;
        session
            .send_and_expect(STATUS_QUERY, &code, STATUS_REPLY_SIZE)
            .await?;
        debug!("{} at position {}", self.target, position);
        Ok(())
    }
}

impl Device for RotaryValve {
    fn target(&self) -> BusAddress {
        self.target
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::hardware::Bus;
    use std::sync::{Arc, Mutex};

    /// Valve that remembers the last `P` command and reports it on `S`
    fn valve_line() -> MockTransport {
        let position = Arc::new(Mutex::new(String::from("01")));
        MockTransport::new("line").with_responder(move |cmd| {
            let mut current = position.lock().unwrap();
            if let Some(code) = cmd.strip_prefix('P') {
                *current = code.trim_end().to_string();
                None
            } else if cmd == STATUS_QUERY {
                Some(current.clone())
            } else {
                None
            }
        })
    }

    fn bus(line: MockTransport) -> Bus {
        let mux = MockTransport::new("mux").with_responder(|_| Some(">".into()));
        Bus::new(Box::new(mux), Box::new(line))
    }

    #[test]
    fn test_position_code() {
        assert_eq!(position_code(1), "01");
        assert_eq!(position_code(9), "09");
        assert_eq!(position_code(10), "0A");
    }

    #[test]
    fn test_only_rotary_targets() {
        assert!(RotaryValve::new(BusAddress::SyringePump, 19200).is_err());
        assert!(RotaryValve::numbered(5, 19200).is_err());
        assert_eq!(
            RotaryValve::numbered(3, 19200).unwrap().target(),
            BusAddress::RotaryValve3
        );
    }

    #[tokio::test]
    async fn test_set_position_ten() {
        let line = valve_line();
        let bus = bus(line.clone());
        let valve = RotaryValve::numbered(2, 19200).unwrap();

        let mut session = valve.open(&bus).await.unwrap();
        valve.set_position(&mut session, 10).await.unwrap();
        drop(session);

        assert_eq!(line.writes(), vec!["P0A\r", "S\r"]);
        assert_eq!(bus.selected().await, Some(BusAddress::RotaryValve2));
    }

    #[tokio::test]
    async fn test_stuck_valve_is_protocol_mismatch() {
        let line = MockTransport::new("line").with_responder(|cmd| (cmd == STATUS_QUERY).then(|| "03".into()));
        let bus = bus(line);
        let valve = RotaryValve::numbered(1, 19200).unwrap();

        let mut session = valve.open(&bus).await.unwrap();
        let err = valve.set_position(&mut session, 4).await.unwrap_err();
        assert!(err.is_protocol_mismatch());
    }

    #[tokio::test]
    async fn test_position_out_of_range() {
        let line = valve_line();
        let bus = bus(line.clone());
        let valve = RotaryValve::numbered(1, 19200).unwrap();

        let mut session = valve.open(&bus).await.unwrap();
        assert!(valve.set_position(&mut session, 11).await.is_err());
        assert!(valve.set_position(&mut session, 0).await.is_err());
        drop(session);
        assert!(line.writes().is_empty());
    }
}
