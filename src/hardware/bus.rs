//! Mux device bus
//!
//! One serial line reaches every downstream device through a multiplexer
//! board. The board exposes eight digital output lines over its own telnet
//! channel:
//!
//! | line  | role                                            |
//! |-------|-------------------------------------------------|
//! | 0..=4 | data (address bits on 0..=2, or valve bits)     |
//! | 5     | strobe; a low→high edge latches the data lines  |
//! | 6, 7  | bank select: `(0,1)` devices, `(0,0)` valves    |
//!
//! Exactly one device is addressable at a time. Switching writes every
//! non-strobe line in ascending order and then pulses the strobe low→high.
//!
//! The [`Bus`] owns both channels behind one async mutex. A
//! [`DeviceSession`] is the lock guard: it re-asserts its target's address
//! when it is opened and holds the line exclusively until dropped.

use crate::adapters::Transport;
use crate::error::{AppResult, FluidicsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Number of mux output lines
pub const LINE_COUNT: u8 = 8;

/// Line whose rising edge latches the data lines
pub const STROBE_LINE: u8 = 5;

/// Prompt the mux controller prints after every accepted line write
pub const MUX_PROMPT: &str = ">";

const DEFAULT_RESPONSE_SIZE: usize = 64;
const DATA_MASK: u8 = 0b1_1111;
const BANK_SHIFT: u8 = 6;

/// Latch bank selected by lines 6 and 7 (line 6 is bit 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bank {
    DiscreteValves = 0b00,
    Unused1 = 0b01,
    DeviceSelect = 0b10,
    Unused3 = 0b11,
}

impl Bank {
    const RESET_ORDER: [Bank; 4] = [
        Bank::DiscreteValves,
        Bank::Unused1,
        Bank::DeviceSelect,
        Bank::Unused3,
    ];

    /// Line word (strobe low) carrying `data` into this bank
    fn word(self, data: u8) -> u8 {
        (data & DATA_MASK) | ((self as u8) << BANK_SHIFT)
    }
}

/// A device reachable through the mux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusAddress {
    RotaryValve1,
    RotaryValve2,
    RotaryValve3,
    RotaryValve4,
    SyringePump,
    TemperatureController1,
    TemperatureController2,
    ReagentBlockCooler,
}

impl BusAddress {
    /// Every addressable device
    pub const ALL: [BusAddress; 8] = [
        BusAddress::RotaryValve1,
        BusAddress::RotaryValve2,
        BusAddress::RotaryValve3,
        BusAddress::RotaryValve4,
        BusAddress::SyringePump,
        BusAddress::TemperatureController1,
        BusAddress::TemperatureController2,
        BusAddress::ReagentBlockCooler,
    ];

    /// Address bits as carried on lines 0..=2 (line 0 is bit 0)
    pub fn code(self) -> u8 {
        match self {
            BusAddress::TemperatureController1 => 0b000,
            BusAddress::TemperatureController2 => 0b001,
            BusAddress::ReagentBlockCooler => 0b010,
            BusAddress::SyringePump => 0b011,
            BusAddress::RotaryValve1 => 0b100,
            BusAddress::RotaryValve2 => 0b101,
            BusAddress::RotaryValve3 => 0b110,
            BusAddress::RotaryValve4 => 0b111,
        }
    }

    /// Rotary valve by its 1-based number
    pub fn rotary_valve(number: u8) -> Option<Self> {
        match number {
            1 => Some(BusAddress::RotaryValve1),
            2 => Some(BusAddress::RotaryValve2),
            3 => Some(BusAddress::RotaryValve3),
            4 => Some(BusAddress::RotaryValve4),
            _ => None,
        }
    }

    pub fn is_rotary_valve(self) -> bool {
        matches!(
            self,
            BusAddress::RotaryValve1
                | BusAddress::RotaryValve2
                | BusAddress::RotaryValve3
                | BusAddress::RotaryValve4
        )
    }

    pub fn is_temperature_controller(self) -> bool {
        matches!(
            self,
            BusAddress::TemperatureController1
                | BusAddress::TemperatureController2
                | BusAddress::ReagentBlockCooler
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BusAddress::RotaryValve1 => "RotaryValve1",
            BusAddress::RotaryValve2 => "RotaryValve2",
            BusAddress::RotaryValve3 => "RotaryValve3",
            BusAddress::RotaryValve4 => "RotaryValve4",
            BusAddress::SyringePump => "SyringePump",
            BusAddress::TemperatureController1 => "TemperatureController1",
            BusAddress::TemperatureController2 => "TemperatureController2",
            BusAddress::ReagentBlockCooler => "ReagentBlockCooler",
        }
    }

    /// Full line state that selects this device once latched
    pub fn line_state(self) -> LineState {
        LineState(Bank::DeviceSelect.word(self.code())).with_line(STROBE_LINE, true)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-way discrete valves and the mixer, latched through the valve bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscreteValve {
    V4,
    V5,
    V6,
    V7,
    Mixer,
}

impl DiscreteValve {
    /// Data line carrying this valve's bit
    pub fn line(self) -> u8 {
        match self {
            DiscreteValve::V4 => 0,
            DiscreteValve::V5 => 1,
            DiscreteValve::V6 => 2,
            DiscreteValve::V7 => 3,
            DiscreteValve::Mixer => 4,
        }
    }

    fn mask(self) -> u8 {
        1 << self.line()
    }
}

impl fmt::Display for DiscreteValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of the eight mux output lines; bit `i` is line `i`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineState(u8);

impl LineState {
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn line(self, line: u8) -> bool {
        self.0 & (1 << line) != 0
    }

    #[must_use]
    fn with_line(self, line: u8, high: bool) -> Self {
        if high {
            LineState(self.0 | (1 << line))
        } else {
            LineState(self.0 & !(1 << line))
        }
    }
}

struct BusInner {
    control: Box<dyn Transport>,
    device: Box<dyn Transport>,
    lines: LineState,
    selected: Option<BusAddress>,
    valves: u8,
    response_size: usize,
}

impl BusInner {
    async fn write_line(&mut self, line: u8, high: bool) -> AppResult<()> {
        let command = format!("m_dout[{}]={}", line, u8::from(high));
        self.control
            .send_and_expect(&command, MUX_PROMPT, self.response_size)
            .await
            .map_err(|e| FluidicsError::from_transport("Mux", e))?;
        self.lines = self.lines.with_line(line, high);
        Ok(())
    }

    /// Write every non-strobe line from `word`, then pulse the strobe low→high
    async fn latch(&mut self, word: u8) -> AppResult<()> {
        for line in (0..LINE_COUNT).filter(|&l| l != STROBE_LINE) {
            self.write_line(line, word & (1 << line) != 0).await?;
        }
        self.write_line(STROBE_LINE, false).await?;
        self.write_line(STROBE_LINE, true).await
    }

    async fn select(&mut self, target: BusAddress) -> AppResult<()> {
        debug!(%target, "select");
        match self.latch(Bank::DeviceSelect.word(target.code())).await {
            Ok(()) => {
                self.selected = Some(target);
                Ok(())
            }
            Err(e) => {
                self.selected = None;
                Err(e)
            }
        }
    }

    async fn write_valves(&mut self, valves: u8) -> AppResult<()> {
        self.latch(Bank::DiscreteValves.word(valves)).await?;
        self.valves = valves;
        Ok(())
    }
}

/// Exclusive owner of the mux channel and the shared device line
pub struct Bus {
    inner: Mutex<BusInner>,
}

impl Bus {
    /// Create a bus over the mux controller channel and the device line.
    ///
    /// No lines are written until [`Bus::reset`] or the first selection.
    pub fn new(control: Box<dyn Transport>, device: Box<dyn Transport>) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                control,
                device,
                lines: LineState::default(),
                selected: None,
                valves: 0,
                response_size: DEFAULT_RESPONSE_SIZE,
            }),
        }
    }

    /// Maximum bytes read back after each mux line write
    pub fn with_response_size(self, response_size: usize) -> Self {
        let mut inner = self.inner.into_inner();
        inner.response_size = response_size;
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Latch zeros into all four banks: no device selected, all valves closed.
    pub async fn reset(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.selected = None;
        for bank in Bank::RESET_ORDER {
            inner.latch(bank.word(0)).await?;
        }
        inner.valves = 0;
        info!("Mux reset");
        Ok(())
    }

    /// Route the device line to `target`.
    ///
    /// On failure the recorded selection is cleared; the physical line state
    /// is indeterminate until the next successful selection.
    pub async fn select_target(&self, target: BusAddress) -> AppResult<()> {
        self.inner.lock().await.select(target).await
    }

    /// Open a discrete valve (or start the mixer)
    pub async fn open_valve(&self, valve: DiscreteValve) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let valves = inner.valves | valve.mask();
        inner.write_valves(valves).await?;
        info!(%valve, "valve open");
        Ok(())
    }

    /// Close a discrete valve (or stop the mixer)
    pub async fn close_valve(&self, valve: DiscreteValve) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let valves = inner.valves & !valve.mask();
        inner.write_valves(valves).await?;
        info!(%valve, "valve closed");
        Ok(())
    }

    pub async fn valve_is_open(&self, valve: DiscreteValve) -> bool {
        self.inner.lock().await.valves & valve.mask() != 0
    }

    /// Last successfully selected device
    pub async fn selected(&self) -> Option<BusAddress> {
        self.inner.lock().await.selected
    }

    /// Current level of every mux line as last written
    pub async fn line_state(&self) -> LineState {
        self.inner.lock().await.lines
    }

    /// Take the bus and address `target` for one command exchange.
    pub async fn session(&self, target: BusAddress) -> AppResult<DeviceSession<'_>> {
        let mut guard = self.inner.lock().await;
        guard.select(target).await?;
        Ok(DeviceSession { guard, target })
    }
}

/// Exclusive use of the device line, addressed to one device
pub struct DeviceSession<'a> {
    guard: MutexGuard<'a, BusInner>,
    target: BusAddress,
}

impl DeviceSession<'_> {
    pub fn target(&self) -> BusAddress {
        self.target
    }

    /// Fail unless this session is addressed to `device`
    pub fn ensure_target(&self, device: BusAddress) -> AppResult<()> {
        if device == self.target {
            Ok(())
        } else {
            Err(FluidicsError::WrongTarget {
                device: device.to_string(),
                session: self.target.to_string(),
            })
        }
    }

    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> AppResult<()> {
        let target = self.target;
        self.guard
            .device
            .set_baud_rate(baud_rate)
            .await
            .map_err(|e| FluidicsError::from_transport(target.as_str(), e))
    }

    pub async fn write(&mut self, command: &str) -> AppResult<()> {
        let target = self.target;
        debug!(%target, ?command, "write");
        self.guard
            .device
            .write(command.as_bytes())
            .await
            .map_err(|e| FluidicsError::from_transport(target.as_str(), e))
    }

    pub async fn read(&mut self, max: usize) -> AppResult<String> {
        let target = self.target;
        let bytes = self
            .guard
            .device
            .read(max)
            .await
            .map_err(|e| FluidicsError::from_transport(target.as_str(), e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn send_and_expect(
        &mut self,
        command: &str,
        expect: &str,
        response_size: usize,
    ) -> AppResult<String> {
        let target = self.target;
        debug!(%target, ?command, "query");
        self.guard
            .device
            .send_and_expect(command, expect, response_size)
            .await
            .map_err(|e| FluidicsError::from_transport(target.as_str(), e))
    }
}
