//! Polony sequencer fluidics control
//!
//! This crate drives the fluidics sub-system of a polony sequencing
//! instrument:
//! - a multiplexer bus that routes one serial line to one device at a time
//!   and latches the discrete valves
//! - drivers for the syringe pump, the four rotary valves and the PR-59
//!   temperature controllers
//! - a tubing volume model, volumetric transfers with an anti-bubble slow
//!   push, and steady-state temperature waiting
//! - start-up, priming, reagent drawing and flushing procedures
//!
//! # Features
//!
//! - `instrument_serial` - Enable the physical device line (serialport)
//! - `hardware_tests` - Tests that need a connected instrument
//!
//! # Example
//!
//! ```no_run
//! use polony_fluidics::{FluidicsConfig, FluidicsSystem};
//!
//! # async fn example() -> polony_fluidics::AppResult<()> {
//! let config = FluidicsConfig::load()?;
//! let system = FluidicsSystem::connect(config).await?;
//! let speeds = system.config().syringe.speeds;
//! system.transfer(2500, speeds.fast, 1, speeds.empty, 3).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod procedures;
pub mod system;
pub mod thermal;
pub mod traits;
pub mod transfer;
pub mod volumes;

// Re-exports for convenience
pub use config::{ConfigError, FluidicsConfig};
pub use error::{AppResult, FluidicsError, TransportError};
pub use hardware::{Bus, BusAddress, DiscreteValve};
pub use system::FluidicsSystem;
pub use thermal::{SettlePolicy, SteadyState};
pub use transfer::{StrokeSpec, TransferRequest};
pub use volumes::{gap_volume, path_volume, PathSegment, VolumeTable};
