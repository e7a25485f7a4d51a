//! Fluidics system facade
//!
//! [`FluidicsSystem`] owns the bus and one driver per device and exposes the
//! operations a recipe is allowed to call. Derived volumes are computed once
//! at construction and never change afterwards.

use crate::adapters::{SerialTransport, TelnetTransport, Transport};
use crate::config::FluidicsConfig;
use crate::error::{AppResult, FluidicsError};
use crate::hardware::{
    Bus, BusAddress, DiscreteValve, RotaryValve, SyringePump, TemperatureController,
};
use crate::thermal::{SteadyState, SteadyStateWaiter, ThermalTarget};
use crate::traits::Device;
use crate::transfer::{self, StrokeSpec, TransferRequest};
use crate::volumes::VolumeTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct FluidicsSystem {
    config: FluidicsConfig,
    bus: Arc<Bus>,
    pump: SyringePump,
    rotary_valves: Vec<RotaryValve>,
    controllers: Vec<TemperatureController>,
    volumes: VolumeTable,
    waiter: SteadyStateWaiter,
}

impl FluidicsSystem {
    /// Build the system over already-connected channels and reset the mux.
    ///
    /// The configuration is validated first, so a bad file never reaches the
    /// hardware.
    pub async fn new(
        config: FluidicsConfig,
        control: Box<dyn Transport>,
        device: Box<dyn Transport>,
    ) -> AppResult<Self> {
        config.validate()?;
        let volumes = VolumeTable::from_config(&config.fluidics)?;

        let comm = &config.communication;
        let pump = SyringePump::from_config(&config.syringe, comm.syringe_pump_baud);
        let rotary_valves = (1..=4)
            .map(|n| RotaryValve::numbered(n, comm.rotary_valve_baud))
            .collect::<AppResult<Vec<_>>>()?;
        let controllers = [
            BusAddress::TemperatureController1,
            BusAddress::TemperatureController2,
            BusAddress::ReagentBlockCooler,
        ]
        .into_iter()
        .map(|target| TemperatureController::new(target, comm.temperature_control_baud))
        .collect::<AppResult<Vec<_>>>()?;
        let waiter = SteadyStateWaiter::from_config(&config.thermal);

        let bus = Bus::new(control, device).with_response_size(comm.mux_response_size);
        bus.reset().await?;

        info!(
            "Fluidics system ready: stroke {} ul, flowcell wash {} ul",
            pump.capacity(),
            volumes.flowcell_wash()
        );
        Ok(Self {
            config,
            bus: Arc::new(bus),
            pump,
            rotary_valves,
            controllers,
            volumes,
            waiter,
        })
    }

    /// Open the mux controller link and the device serial line from the
    /// configuration, then build the system.
    pub async fn connect(config: FluidicsConfig) -> AppResult<Self> {
        let comm = &config.communication;
        let timeout = config.read_timeout();

        let mut control = TelnetTransport::new(comm.mux_address.clone()).with_timeout(timeout);
        control
            .connect()
            .await
            .map_err(|e| FluidicsError::from_transport("Mux", e))?;

        let mut device = SerialTransport::new(comm.serial_port.clone(), comm.syringe_pump_baud)
            .with_timeout(timeout);
        device
            .connect()
            .await
            .map_err(|e| FluidicsError::from_transport("DeviceLine", e))?;

        Self::new(config, Box::new(control), Box::new(device)).await
    }

    pub fn config(&self) -> &FluidicsConfig {
        &self.config
    }

    /// Shared handle to the bus
    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.bus)
    }

    pub fn pump(&self) -> &SyringePump {
        &self.pump
    }

    pub fn volumes(&self) -> &VolumeTable {
        &self.volumes
    }

    pub fn waiter(&self) -> &SteadyStateWaiter {
        &self.waiter
    }

    /// Driver for rotary valve `number` (1..=4)
    pub fn rotary_valve(&self, number: u8) -> AppResult<&RotaryValve> {
        let target = BusAddress::rotary_valve(number).ok_or_else(|| {
            FluidicsError::InvalidArgument(format!("rotary valve {} outside 1..=4", number))
        })?;
        self.rotary_valves
            .iter()
            .find(|v| v.target() == target)
            .ok_or_else(|| FluidicsError::Configuration(format!("{} not configured", target)))
    }

    /// Driver for the temperature controller at `target`
    pub fn controller(&self, target: BusAddress) -> AppResult<&TemperatureController> {
        self.controllers
            .iter()
            .find(|c| c.target() == target)
            .ok_or_else(|| {
                FluidicsError::InvalidArgument(format!("{} is not a temperature controller", target))
            })
    }

    // ------------------------------------------------------------------
    // Recipe boundary
    // ------------------------------------------------------------------

    /// Move `total` µl from one pump port to another
    pub async fn transfer(
        &self,
        total: u32,
        from_speed: u8,
        from_port: u8,
        to_speed: u8,
        to_port: u8,
    ) -> AppResult<Vec<StrokeSpec>> {
        let request = TransferRequest::new(total, from_speed, from_port, to_speed, to_port);
        transfer::transfer(&self.bus, &self.pump, &request).await
    }

    /// Transfer whose last `slow_push_volume` µl are drawn at the creep speed
    pub async fn transfer_slow(
        &self,
        total: u32,
        from_speed: u8,
        from_port: u8,
        to_speed: u8,
        to_port: u8,
    ) -> AppResult<Vec<StrokeSpec>> {
        let request = TransferRequest::new(total, from_speed, from_port, to_speed, to_port)
            .with_slow_push(
                self.config.fluidics.slow_push_volume,
                self.config.syringe.speeds.final_pull,
            );
        transfer::transfer(&self.bus, &self.pump, &request).await
    }

    /// Route the device line to `target`
    pub async fn select_device(&self, target: BusAddress) -> AppResult<()> {
        self.bus.select_target(target).await
    }

    pub async fn open_valve(&self, valve: DiscreteValve) -> AppResult<()> {
        self.bus.open_valve(valve).await
    }

    pub async fn close_valve(&self, valve: DiscreteValve) -> AppResult<()> {
        self.bus.close_valve(valve).await
    }

    /// Turn rotary valve `number` to `position`
    pub async fn set_rotary_valve(&self, number: u8, position: u8) -> AppResult<()> {
        let valve = self.rotary_valve(number)?;
        let mut session = valve.open(&self.bus).await?;
        valve.set_position(&mut session, position).await
    }

    /// Enable the controller at `target` and write its setpoint
    pub async fn set_temperature(&self, target: BusAddress, temperature: f64) -> AppResult<()> {
        let controller = self.controller(target)?;
        let mut session = controller.open(&self.bus).await?;
        controller.set_temperature(&mut session, temperature).await
    }

    pub async fn control_off(&self, target: BusAddress) -> AppResult<()> {
        let controller = self.controller(target)?;
        let mut session = controller.open(&self.bus).await?;
        controller.set_control_off(&mut session).await
    }

    pub async fn read_temperature(&self, target: BusAddress) -> AppResult<f64> {
        let controller = self.controller(target)?;
        let mut session = controller.open(&self.bus).await?;
        controller.current_temperature(&mut session).await
    }

    /// Poll the controller at `target` until it settles near
    /// `poll_temperature` or `deadline` passes.
    pub async fn wait_for_steady_state(
        &self,
        target: BusAddress,
        setpoint: f64,
        poll_temperature: f64,
        tolerance: f64,
        deadline: Duration,
    ) -> AppResult<SteadyState> {
        let controller = self.controller(target)?;
        let probe = controller.probe(&self.bus);
        let thermal = ThermalTarget::new(setpoint, poll_temperature, tolerance, deadline);
        self.waiter.wait(&probe, &thermal).await
    }

    /// Volume of a named route
    pub fn path_volume(&self, route: &str) -> AppResult<u32> {
        self.volumes.route(route)
    }

    /// Air gap for a reagent slug in this instrument's flowcell
    pub fn gap_volume(&self, reagent_volume: u32) -> i64 {
        self.volumes.gap(reagent_volume)
    }
}
