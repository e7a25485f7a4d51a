//! Fluidics configuration using Figment
//!
//! Strongly-typed configuration for the bus, the device line, the syringe
//! pump, the tubing model, the thermal loop and the priming table.
//! Configuration is loaded from:
//! 1. a TOML file (default `config/fluidics.toml`)
//! 2. environment variables prefixed with `FLUIDICS_`
//!
//! Everything is validated before the first device command is issued; a
//! [`ConfigError`] here means nothing has touched the hardware yet.

use crate::hardware::bus::DiscreteValve;
use crate::thermal::SettlePolicy;
use crate::volumes::VolumeTable;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Highest speed code accepted by the syringe pump.
pub const MAX_PUMP_SPEED: u8 = 40;

/// Number of positions on each rotary valve.
pub const ROTARY_VALVE_POSITIONS: u8 = 10;

/// Top-level fluidics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidicsConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line and mux controller settings
    pub communication: CommunicationConfig,
    /// Syringe pump geometry and speed presets
    #[serde(default)]
    pub syringe: SyringeConfig,
    /// Tubing volumes, routes and reagent chambers
    pub fluidics: PathConfig,
    /// Temperature control settings
    #[serde(default)]
    pub thermal: ThermalConfig,
    /// Priming table
    #[serde(default)]
    pub priming: PrimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Physical channels and per-device line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationConfig {
    /// Shared device serial line (e.g., "/dev/ttyUSB0")
    pub serial_port: String,
    /// Mux controller telnet endpoint ("host:port")
    pub mux_address: String,
    /// Read timeout for both channels, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Maximum bytes read back after each mux line write
    #[serde(default = "default_mux_response_size")]
    pub mux_response_size: usize,
    /// Syringe pump baud rate
    #[serde(default = "default_syringe_pump_baud")]
    pub syringe_pump_baud: u32,
    /// Rotary valve baud rate
    #[serde(default = "default_rotary_valve_baud")]
    pub rotary_valve_baud: u32,
    /// Temperature controller baud rate (both flowcell controllers and the cooler)
    #[serde(default = "default_temperature_control_baud")]
    pub temperature_control_baud: u32,
}

/// Syringe pump geometry and named speed codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyringeConfig {
    /// Stroke capacity in microlitres
    #[serde(default = "default_full_stroke")]
    pub full_stroke: u32,
    /// Motor steps per full stroke
    #[serde(default = "default_steps_per_stroke")]
    pub steps_per_stroke: u32,
    /// Number of ports on the pump's distribution valve
    #[serde(default = "default_pump_ports")]
    pub port_count: u8,
    /// Speed code applied during initialisation
    #[serde(default = "default_pump_speed")]
    pub default_speed: u8,
    /// Backlash/dead-volume code sent during initialisation
    #[serde(default = "default_dead_volume_setting")]
    pub dead_volume_setting: u8,
    /// Named speed codes used by the procedures
    #[serde(default)]
    pub speeds: SpeedPresets,
}

impl Default for SyringeConfig {
    fn default() -> Self {
        Self {
            full_stroke: default_full_stroke(),
            steps_per_stroke: default_steps_per_stroke(),
            port_count: default_pump_ports(),
            default_speed: default_pump_speed(),
            dead_volume_setting: default_dead_volume_setting(),
            speeds: SpeedPresets::default(),
        }
    }
}

/// Pump speed codes (0 fastest, 40 slowest)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeedPresets {
    pub pull: u8,
    pub slow: u8,
    pub fast: u8,
    pub critical: u8,
    /// Creep speed for the final slow push
    pub final_pull: u8,
    pub empty: u8,
    pub mixer_empty: u8,
}

impl Default for SpeedPresets {
    fn default() -> Self {
        Self {
            pull: 17,
            slow: 25,
            fast: 12,
            critical: 30,
            final_pull: 32,
            empty: 8,
            mixer_empty: 10,
        }
    }
}

impl SpeedPresets {
    fn all(&self) -> [(&'static str, u8); 7] {
        [
            ("pull", self.pull),
            ("slow", self.slow),
            ("fast", self.fast),
            ("critical", self.critical),
            ("final_pull", self.final_pull),
            ("empty", self.empty),
            ("mixer_empty", self.mixer_empty),
        ]
    }
}

/// Tubing model and reagent chamber sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Internal volume of one flowcell
    pub flowcell_volume: u32,
    /// Volume pushed at creep speed at the end of a slow transfer
    #[serde(default)]
    pub slow_push_volume: u32,
    /// Default air gap size
    #[serde(default)]
    pub air_gap: u32,
    /// Rotary valve port open to air
    #[serde(default = "default_air_port")]
    pub air_port: u8,
    /// Rotary valve port plumbed to the wash bottle
    #[serde(default = "default_wash_port")]
    pub wash_port: u8,
    /// Flowcells installed (1 or 2)
    #[serde(default = "default_flowcell_count")]
    pub flowcell_count: u8,
    /// Tube segments between named nodes
    #[serde(default)]
    pub segments: Vec<SegmentDefinition>,
    /// Named routes as ordered node lists
    #[serde(default)]
    pub routes: BTreeMap<String, Vec<String>>,
    /// Reagent chamber volumes by name
    #[serde(default)]
    pub chambers: BTreeMap<String, u32>,
}

/// One tube segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub from: String,
    pub to: String,
    pub volume: u32,
}

/// Temperature control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Room temperature in °C
    #[serde(default = "default_room_temp")]
    pub room_temp: f64,
    /// Reagent block storage temperature in °C
    #[serde(default = "default_stage_temp")]
    pub stage_temp: f64,
    /// Settle tolerance in °C
    #[serde(default = "default_temp_tolerance")]
    pub tolerance: f64,
    /// Tolerance used when returning a flowcell to room temperature
    #[serde(default = "default_room_temp_tolerance")]
    pub room_temp_tolerance: f64,
    /// Steady-state deadline in minutes
    #[serde(default = "default_time_limit")]
    pub time_limit_min: u64,
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How a ramp is judged settled
    #[serde(default)]
    pub settle_policy: SettlePolicy,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            room_temp: default_room_temp(),
            stage_temp: default_stage_temp(),
            tolerance: default_temp_tolerance(),
            room_temp_tolerance: default_room_temp_tolerance(),
            time_limit_min: default_time_limit(),
            poll_interval_ms: default_poll_interval(),
            settle_policy: SettlePolicy::default(),
        }
    }
}

impl ThermalConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.time_limit_min.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reagent block priming table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimingConfig {
    /// Volume drawn through each reagent port
    #[serde(default = "default_prime_volume")]
    pub prime_volume: u32,
    /// Pump port the block is drawn through
    #[serde(default = "default_inlet_port")]
    pub inlet_port: u8,
    /// Pump port that dumps to waste
    #[serde(default = "default_waste_port")]
    pub waste_port: u8,
    /// One row per rotary valve
    #[serde(default)]
    pub valves: Vec<ValvePrimeRow>,
    /// Chambers reached through a discrete valve
    #[serde(default)]
    pub discrete: Vec<DiscretePrimeStep>,
}

impl Default for PrimingConfig {
    fn default() -> Self {
        Self {
            prime_volume: default_prime_volume(),
            inlet_port: default_inlet_port(),
            waste_port: default_waste_port(),
            valves: Vec::new(),
            discrete: Vec::new(),
        }
    }
}

/// Prime ports `1..=reagent_ports` of one rotary valve, then optionally
/// pull wash through `wash_port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValvePrimeRow {
    pub valve: u8,
    pub reagent_ports: u8,
    #[serde(default)]
    pub wash_port: Option<u8>,
    #[serde(default)]
    pub wash_volume: u32,
}

/// Open a discrete valve, draw `volume` to waste, close it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscretePrimeStep {
    pub valve: DiscreteValve,
    pub volume: u32,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_air_port() -> u8 {
    10
}

fn default_wash_port() -> u8 {
    9
}

fn default_flowcell_count() -> u8 {
    2
}

fn default_app_name() -> String {
    "polony-fluidics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_mux_response_size() -> usize {
    64
}

fn default_syringe_pump_baud() -> u32 {
    9600
}

fn default_rotary_valve_baud() -> u32 {
    19200
}

fn default_temperature_control_baud() -> u32 {
    115200
}

fn default_full_stroke() -> u32 {
    1000
}

fn default_steps_per_stroke() -> u32 {
    3000
}

fn default_pump_ports() -> u8 {
    9
}

fn default_pump_speed() -> u8 {
    20
}

fn default_dead_volume_setting() -> u8 {
    5
}

fn default_room_temp() -> f64 {
    28.0
}

fn default_stage_temp() -> f64 {
    4.0
}

fn default_temp_tolerance() -> f64 {
    1.0
}

fn default_room_temp_tolerance() -> f64 {
    2.0
}

fn default_time_limit() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_prime_volume() -> u32 {
    100
}

fn default_inlet_port() -> u8 {
    1
}

fn default_waste_port() -> u8 {
    3
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl FluidicsConfig {
    /// Load configuration from `config/fluidics.toml` and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/fluidics.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables (`FLUIDICS_` prefix) take precedence over the
    /// file. The result is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("FLUIDICS_").split("__")),
        )
    }

    /// Load configuration from an in-memory TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(ConfigError::LoadError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid
    /// - Channel endpoints are present and baud rates non-zero
    /// - Speed codes are within the pump's range
    /// - The slow-push volume fits in one stroke
    /// - Every route walks existing segments and the flowcell route exists
    /// - Priming rows name real valves and ports
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.validate_communication()?;
        self.validate_syringe()?;
        self.validate_thermal()?;

        if self.fluidics.slow_push_volume > self.syringe.full_stroke {
            return Err(ConfigError::ValidationError(format!(
                "slow_push_volume {} exceeds the stroke capacity {}",
                self.fluidics.slow_push_volume, self.syringe.full_stroke
            )));
        }

        self.validate_fluidics()?;
        self.validate_priming()
    }

    fn validate_fluidics(&self) -> Result<(), ConfigError> {
        let fluidics = &self.fluidics;
        for (name, port) in [("air_port", fluidics.air_port), ("wash_port", fluidics.wash_port)] {
            if port == 0 || port > ROTARY_VALVE_POSITIONS {
                return Err(ConfigError::ValidationError(format!(
                    "fluidics.{} {} outside 1..={}",
                    name, port, ROTARY_VALVE_POSITIONS
                )));
            }
        }
        if fluidics.air_port == fluidics.wash_port {
            return Err(ConfigError::ValidationError(format!(
                "fluidics.air_port and fluidics.wash_port are both {}",
                fluidics.air_port
            )));
        }
        if !(1..=2).contains(&fluidics.flowcell_count) {
            return Err(ConfigError::ValidationError(format!(
                "fluidics.flowcell_count {} outside 1..=2",
                fluidics.flowcell_count
            )));
        }
        VolumeTable::from_config(fluidics)?;
        Ok(())
    }

    fn validate_communication(&self) -> Result<(), ConfigError> {
        let comm = &self.communication;
        if comm.serial_port.is_empty() {
            return Err(ConfigError::ValidationError(
                "communication.serial_port cannot be empty".to_string(),
            ));
        }
        if comm.mux_address.is_empty() {
            return Err(ConfigError::ValidationError(
                "communication.mux_address cannot be empty".to_string(),
            ));
        }
        if comm.mux_response_size == 0 {
            return Err(ConfigError::ValidationError(
                "communication.mux_response_size must be > 0".to_string(),
            ));
        }
        for (name, baud) in [
            ("syringe_pump_baud", comm.syringe_pump_baud),
            ("rotary_valve_baud", comm.rotary_valve_baud),
            ("temperature_control_baud", comm.temperature_control_baud),
        ] {
            if baud == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "communication.{} must be > 0",
                    name
                )));
            }
        }
        Ok(())
    }

    fn validate_syringe(&self) -> Result<(), ConfigError> {
        let syringe = &self.syringe;
        if syringe.full_stroke == 0 || syringe.steps_per_stroke == 0 {
            return Err(ConfigError::ValidationError(
                "syringe.full_stroke and syringe.steps_per_stroke must be > 0".to_string(),
            ));
        }
        if syringe.port_count == 0 {
            return Err(ConfigError::ValidationError(
                "syringe.port_count must be > 0".to_string(),
            ));
        }
        if syringe.default_speed > MAX_PUMP_SPEED {
            return Err(ConfigError::ValidationError(format!(
                "syringe.default_speed {} exceeds {}",
                syringe.default_speed, MAX_PUMP_SPEED
            )));
        }
        for (name, speed) in syringe.speeds.all() {
            if speed > MAX_PUMP_SPEED {
                return Err(ConfigError::ValidationError(format!(
                    "syringe.speeds.{} = {} exceeds {}",
                    name, speed, MAX_PUMP_SPEED
                )));
            }
        }
        Ok(())
    }

    fn validate_thermal(&self) -> Result<(), ConfigError> {
        let thermal = &self.thermal;
        let positive = |t: f64| t.is_finite() && t > 0.0;
        if !positive(thermal.tolerance) || !positive(thermal.room_temp_tolerance) {
            return Err(ConfigError::ValidationError(
                "thermal tolerances must be positive".to_string(),
            ));
        }
        if thermal.time_limit_min.checked_mul(60).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "thermal.time_limit_min {} is too long",
                thermal.time_limit_min
            )));
        }
        if thermal.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "thermal.poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_priming(&self) -> Result<(), ConfigError> {
        let priming = &self.priming;
        for port in [priming.inlet_port, priming.waste_port] {
            if port == 0 || port > self.syringe.port_count {
                return Err(ConfigError::ValidationError(format!(
                    "priming pump port {} outside 1..={}",
                    port, self.syringe.port_count
                )));
            }
        }
        for row in &priming.valves {
            if !(1..=4).contains(&row.valve) {
                return Err(ConfigError::ValidationError(format!(
                    "priming row names rotary valve {}, expected 1..=4",
                    row.valve
                )));
            }
            if row.reagent_ports > ROTARY_VALVE_POSITIONS {
                return Err(ConfigError::ValidationError(format!(
                    "rotary valve {} has only {} ports, priming asks for {}",
                    row.valve, ROTARY_VALVE_POSITIONS, row.reagent_ports
                )));
            }
            if let Some(port) = row.wash_port {
                if port == 0 || port > ROTARY_VALVE_POSITIONS {
                    return Err(ConfigError::ValidationError(format!(
                        "rotary valve {} wash port {} outside 1..={}",
                        row.valve, port, ROTARY_VALVE_POSITIONS
                    )));
                }
            }
        }
        Ok(())
    }

    /// Syringe stroke capacity in microlitres
    pub fn stroke_capacity(&self) -> u32 {
        self.syringe.full_stroke
    }

    /// Read timeout shared by both channels
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.communication.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [communication]
        serial_port = "/dev/ttyUSB0"
        mux_address = "192.168.0.50:23"

        [fluidics]
        flowcell_volume = 100
        slow_push_volume = 200

        [[fluidics.segments]]
        from = "V4"
        to = "T"
        volume = 40

        [[fluidics.segments]]
        from = "T"
        to = "FC"
        volume = 60

        [fluidics.routes]
        valve_to_flowcell_end = ["V4", "T", "FC"]
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = FluidicsConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.syringe.full_stroke, 1000);
        assert_eq!(config.syringe.steps_per_stroke, 3000);
        assert_eq!(config.thermal.settle_policy, SettlePolicy::Symmetric);
        assert_eq!(config.thermal.deadline(), Duration::from_secs(600));
        assert_eq!(config.priming.waste_port, 3);
        assert_eq!(config.fluidics.air_port, 10);
        assert_eq!(config.fluidics.wash_port, 9);
        assert_eq!(config.fluidics.flowcell_count, 2);
    }

    #[test]
    fn test_air_and_wash_ports_must_differ() {
        let toml = MINIMAL.replace(
            "slow_push_volume = 200",
            "slow_push_volume = 200\nair_port = 9",
        );
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("are both 9"));
    }

    #[test]
    fn test_flowcell_count_range() {
        let toml = MINIMAL.replace(
            "slow_push_volume = 200",
            "slow_push_volume = 200\nflowcell_count = 3",
        );
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("flowcell_count"));
    }

    #[test]
    fn test_time_limit_overflow_rejected() {
        let toml = format!("{}\n[thermal]\ntime_limit_min = {}\n", MINIMAL, i64::MAX);
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("time_limit_min"));
    }

    #[test]
    fn test_slow_push_larger_than_stroke_rejected() {
        let toml = MINIMAL.replace("slow_push_volume = 200", "slow_push_volume = 1200");
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("exceeds the stroke capacity"));
    }

    #[test]
    fn test_invalid_log_level() {
        let toml = format!("[application]\nlog_level = \"loud\"\n{}", MINIMAL);
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_speed_out_of_range() {
        let toml = format!(
            "{}\n[syringe.speeds]\npull = 17\nslow = 25\nfast = 12\ncritical = 30\nfinal_pull = 41\nempty = 8\nmixer_empty = 10\n",
            MINIMAL
        );
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("final_pull"));
    }

    #[test]
    fn test_route_over_missing_segment_rejected() {
        let toml = MINIMAL.replace(
            r#"valve_to_flowcell_end = ["V4", "T", "FC"]"#,
            r#"valve_to_flowcell_end = ["V4", "FC"]"#,
        );
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_priming_row_bad_valve() {
        let toml = format!(
            "{}\n[[priming.valves]]\nvalve = 5\nreagent_ports = 9\n",
            MINIMAL
        );
        let result = FluidicsConfig::from_toml_str(&toml);
        assert!(result.unwrap_err().to_string().contains("rotary valve 5"));
    }
}
