//! Simulated instrument shared by the integration tests
//!
//! The mux controller answers every line write with its prompt. The device
//! line answers by command shape: pump frames get a ready status, rotary
//! valves echo their last commanded position and temperature controllers
//! report a reading that jumps straight to the last setpoint unless a test
//! pins it.

#![allow(dead_code)]

use polony_fluidics::adapters::MockTransport;
use polony_fluidics::config::FluidicsConfig;
use polony_fluidics::system::FluidicsSystem;
use std::sync::{Arc, Mutex};

pub const SHIPPED_CONFIG: &str = include_str!("../../config/fluidics.toml");

pub const PUMP_STATUS_QUERY: &str = "/1QR\r";

#[derive(Default)]
struct Plant {
    valve_position: Option<String>,
    setpoint: Option<f64>,
    pinned_reading: Option<f64>,
}

/// PR-59 style reading such as `+2.800000e+01\r`
pub fn reading_reply(celsius: f64) -> String {
    let plain = format!("{:+.6e}", celsius);
    let (mantissa, exponent) = plain.split_once('e').unwrap();
    let exponent: i32 = exponent.parse().unwrap();
    format!("{}e{:+03}\r", mantissa, exponent)
}

pub struct Instrument {
    pub mux: MockTransport,
    pub line: MockTransport,
    plant: Arc<Mutex<Plant>>,
}

impl Instrument {
    pub fn new() -> Self {
        let mux = MockTransport::new("mux")
            .with_responder(|cmd| cmd.starts_with("m_dout[").then(|| ">".to_string()));

        let plant = Arc::new(Mutex::new(Plant::default()));
        let state = Arc::clone(&plant);
        let line = MockTransport::new("line").with_responder(move |cmd| {
            let mut plant = state.lock().unwrap();
            if cmd.starts_with("/1") {
                Some("/0`".to_string())
            } else if let Some(code) = cmd.strip_prefix('P') {
                plant.valve_position = Some(code.trim_end().to_string());
                None
            } else if cmd == "S\r" {
                plant.valve_position.clone()
            } else if let Some(value) = cmd.strip_prefix("$R0=") {
                plant.setpoint = value.trim_end().parse().ok();
                Some("\r".to_string())
            } else if cmd == "$R100?\r" {
                let reading = plant
                    .pinned_reading
                    .or(plant.setpoint)
                    .unwrap_or(25.0);
                Some(reading_reply(reading))
            } else if cmd.starts_with('$') {
                Some("\r".to_string())
            } else {
                None
            }
        });

        Self { mux, line, plant }
    }

    /// Report `reading` from every controller regardless of setpoint
    pub fn pin_temperature(&self, reading: f64) {
        self.plant.lock().unwrap().pinned_reading = Some(reading);
    }

    pub fn config() -> FluidicsConfig {
        FluidicsConfig::from_toml_str(SHIPPED_CONFIG).unwrap()
    }

    pub async fn system(&self) -> FluidicsSystem {
        self.system_with(Self::config()).await
    }

    pub async fn system_with(&self, config: FluidicsConfig) -> FluidicsSystem {
        FluidicsSystem::new(config, Box::new(self.mux.clone()), Box::new(self.line.clone()))
            .await
            .unwrap()
    }

    /// Pump commands in order, without the status queries
    pub fn pump_commands(&self) -> Vec<String> {
        self.line
            .writes()
            .into_iter()
            .filter(|w| w.starts_with("/1") && w != PUMP_STATUS_QUERY)
            .collect()
    }

    /// Rotary valve move commands in order
    pub fn valve_moves(&self) -> Vec<String> {
        self.line
            .writes()
            .into_iter()
            .filter(|w| w.starts_with('P'))
            .collect()
    }

    /// Temperature controller commands in order
    pub fn controller_commands(&self) -> Vec<String> {
        self.line
            .writes()
            .into_iter()
            .filter(|w| w.starts_with('$'))
            .collect()
    }

    pub fn clear(&self) {
        self.mux.clear_log();
        self.line.clear_log();
    }
}
