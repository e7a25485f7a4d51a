//! Fluidics Configuration System
//!
//! Configuration is loaded once at start-up using Figment and is immutable
//! afterwards.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `FLUIDICS_`
//! 2. TOML configuration file (default: `config/fluidics.toml`)
//!
//! # Example
//!
//! ```no_run
//! use polony_fluidics::config::FluidicsConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FluidicsConfig::load_from("config/fluidics.toml")?;
//!     println!("Stroke capacity: {} ul", config.syringe.full_stroke);
//!     println!("Serial line: {}", config.communication.serial_port);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore so that single
//! underscores inside key names survive:
//!
//! ```text
//! FLUIDICS_APPLICATION__LOG_LEVEL=debug
//! FLUIDICS_COMMUNICATION__SERIAL_PORT=/dev/ttyUSB1
//! FLUIDICS_THERMAL__TIME_LIMIT_MIN=15
//! ```

pub mod fluidics_config;

pub use fluidics_config::{
    ApplicationConfig, CommunicationConfig, ConfigError, DiscretePrimeStep, FluidicsConfig,
    PathConfig, PrimingConfig, SegmentDefinition, SpeedPresets, SyringeConfig, ThermalConfig,
    ValvePrimeRow, MAX_PUMP_SPEED, ROTARY_VALVE_POSITIONS,
};
