//! Instrument procedures
//!
//! Initialisation, priming, reagent drawing, flushing and incubation built
//! from the recipe boundary on [`FluidicsSystem`]. Each procedure is a plain
//! async function that runs to completion or returns the first device error.
//!
//! Reagent valves V1-V3 reach the flowcells through port `n` of the flowcell
//! valve V4; V4's own ports feed the flowcells directly.

use crate::config::ValvePrimeRow;
use crate::error::{AppResult, FluidicsError};
use crate::hardware::{BusAddress, DiscreteValve};
use crate::system::FluidicsSystem;
use crate::thermal::{self, SteadyState};
use crate::traits::Device;
use crate::volumes::{FLOWCELL_ROUTE, ROTARY_FLOWCELL_ROUTE, ROTARY_LINE_ROUTE, WASH_ROUTE};
use std::time::Duration;
use tracing::info;

/// Rotary valve that feeds the flowcells
const FLOWCELL_VALVE: u8 = 4;

/// One of the two flowcells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flowcell {
    First,
    Second,
}

impl Flowcell {
    pub const ALL: [Flowcell; 2] = [Flowcell::First, Flowcell::Second];

    /// Flowcell by its 0-based index
    pub fn from_index(index: u8) -> AppResult<Self> {
        match index {
            0 => Ok(Flowcell::First),
            1 => Ok(Flowcell::Second),
            _ => Err(FluidicsError::InvalidArgument(format!(
                "flowcell {} outside 0..=1",
                index
            ))),
        }
    }

    /// Syringe pump port the flowcell outlet is plumbed to
    pub fn syringe_port(self) -> u8 {
        match self {
            Flowcell::First => 1,
            Flowcell::Second => 2,
        }
    }

    /// Controller heating this flowcell
    pub fn controller(self) -> BusAddress {
        match self {
            Flowcell::First => BusAddress::TemperatureController1,
            Flowcell::Second => BusAddress::TemperatureController2,
        }
    }
}

/// Home the plunger and apply the configured defaults
pub async fn syringe_pump_init(system: &FluidicsSystem) -> AppResult<()> {
    info!("Initialize syringe pump");
    let bus = system.bus();
    let pump = system.pump();
    let mut session = pump.open(&bus).await?;
    pump.initialize(&mut session).await
}

/// Bring both flowcell controllers to room temperature, one after the other
pub async fn temperature_control_init(system: &FluidicsSystem) -> AppResult<()> {
    info!("Initialize temperature controllers 1-2");
    let thermal = &system.config().thermal;
    for flowcell in [Flowcell::First, Flowcell::Second] {
        let target = flowcell.controller();
        system.set_temperature(target, thermal.room_temp).await?;
        system
            .wait_for_steady_state(
                target,
                thermal.room_temp,
                thermal.room_temp,
                thermal.tolerance,
                thermal.deadline(),
            )
            .await?;
    }
    Ok(())
}

/// Draw the priming volume through each reagent port of one rotary valve,
/// then pull wash through the wash port if the row names one.
pub async fn prime_rotary_valve(system: &FluidicsSystem, row: &ValvePrimeRow) -> AppResult<()> {
    let priming = &system.config().priming;
    let speeds = system.config().syringe.speeds;
    info!("Prime rotary valve V{} ({} ports)", row.valve, row.reagent_ports);

    for port in 1..=row.reagent_ports {
        system.set_rotary_valve(row.valve, port).await?;
        system
            .transfer(
                priming.prime_volume,
                speeds.fast,
                priming.inlet_port,
                speeds.empty,
                priming.waste_port,
            )
            .await?;
    }

    if let Some(port) = row.wash_port {
        info!("Draw {} ul wash up to V{} common port", row.wash_volume, row.valve);
        system.set_rotary_valve(row.valve, port).await?;
        system
            .transfer(
                row.wash_volume,
                speeds.fast,
                priming.inlet_port,
                speeds.empty,
                priming.waste_port,
            )
            .await?;
    }
    Ok(())
}

/// Prime every reagent chamber listed in the priming table
pub async fn prime_reagent_block(system: &FluidicsSystem) -> AppResult<()> {
    info!("Prime reagent block chambers");
    syringe_pump_init(system).await?;

    let priming = &system.config().priming;
    let speeds = system.config().syringe.speeds;
    for row in &priming.valves {
        prime_rotary_valve(system, row).await?;
    }
    for step in &priming.discrete {
        info!("Prime {} chamber with {} ul", step.valve, step.volume);
        system.open_valve(step.valve).await?;
        system
            .transfer(
                step.volume,
                speeds.fast,
                priming.inlet_port,
                speeds.empty,
                priming.waste_port,
            )
            .await?;
        system.close_valve(step.valve).await?;
    }
    Ok(())
}

/// Prime the block, then hold it at the storage temperature
pub async fn reagent_block_init(system: &FluidicsSystem) -> AppResult<()> {
    info!("Initialize reagent block cooler");
    prime_reagent_block(system).await?;
    system
        .set_temperature(BusAddress::ReagentBlockCooler, system.config().thermal.stage_temp)
        .await
}

/// Full start-up: temperature controllers, syringe pump, reagent block
pub async fn init(system: &FluidicsSystem) -> AppResult<()> {
    info!("Initialize fluidics sub-system");
    temperature_control_init(system).await?;
    syringe_pump_init(system).await?;
    reagent_block_init(system).await
}

/// Return a flowcell to room temperature using the wider room tolerance
pub async fn set_to_room_temperature(
    system: &FluidicsSystem,
    flowcell: Flowcell,
) -> AppResult<SteadyState> {
    let thermal = &system.config().thermal;
    info!("Set {:?} flowcell to {} C", flowcell, thermal.room_temp);
    let target = flowcell.controller();
    system.set_temperature(target, thermal.room_temp).await?;
    system
        .wait_for_steady_state(
            target,
            thermal.room_temp,
            thermal.room_temp,
            thermal.room_temp_tolerance,
            thermal.deadline(),
        )
        .await
}

/// Wash a flowcell three times over from `valve_port` of the flowcell valve
/// and eject to waste
pub async fn flush_flowcell(
    system: &FluidicsSystem,
    flowcell: Flowcell,
    valve_port: u8,
) -> AppResult<()> {
    let wash = system.volumes().flowcell_wash();
    let speeds = system.config().syringe.speeds;
    info!(
        "Flush {:?} flowcell 3 times ({} ul) from V{} port {}",
        flowcell, wash, FLOWCELL_VALVE, valve_port
    );
    system.set_rotary_valve(FLOWCELL_VALVE, valve_port).await?;
    system
        .transfer(
            wash,
            speeds.fast,
            flowcell.syringe_port(),
            speeds.empty,
            system.config().priming.waste_port,
        )
        .await?;
    Ok(())
}

/// Turn `valve` to `port` with its line open through the flowcell valve
async fn route_port(system: &FluidicsSystem, valve: u8, port: u8) -> AppResult<()> {
    match valve {
        FLOWCELL_VALVE => system.set_rotary_valve(FLOWCELL_VALVE, port).await,
        1..=3 => {
            system.set_rotary_valve(FLOWCELL_VALVE, valve).await?;
            system.set_rotary_valve(valve, port).await
        }
        _ => Err(FluidicsError::InvalidArgument(format!(
            "rotary valve {} outside 1..=4",
            valve
        ))),
    }
}

/// Route from `valve`'s common port to the far end of a flowcell
pub fn flowcell_route(valve: u8) -> &'static str {
    if valve == FLOWCELL_VALVE {
        FLOWCELL_ROUTE
    } else {
        ROTARY_FLOWCELL_ROUTE
    }
}

/// Volume to pull after a reagent slug leaves `valve` so that the slug sits
/// centred in the flowcell
pub fn flowcell_draw_volume(
    system: &FluidicsSystem,
    valve: u8,
    reagent_volume: u32,
) -> AppResult<u32> {
    let to_end = system.path_volume(flowcell_route(valve))?;
    let draw = i64::from(to_end) - system.gap_volume(reagent_volume);
    u32::try_from(draw).map_err(|_| {
        FluidicsError::InvalidArgument(format!(
            "{} ul of reagent overruns the {} ul path from V{}",
            reagent_volume, to_end, valve
        ))
    })
}

/// Pull an air plug up to `valve`'s common port through the air port.
///
/// `gap` defaults to the configured air gap.
pub async fn draw_air_to_valve(
    system: &FluidicsSystem,
    flowcell: Flowcell,
    valve: u8,
    gap: Option<u32>,
) -> AppResult<()> {
    let fluidics = &system.config().fluidics;
    let speeds = system.config().syringe.speeds;
    let gap = gap.unwrap_or(fluidics.air_gap);
    info!("Draw {} ul air gap to V{} common port", gap, valve);

    route_port(system, valve, fluidics.air_port).await?;
    system
        .transfer(
            gap,
            speeds.pull,
            flowcell.syringe_port(),
            speeds.empty,
            system.config().priming.waste_port,
        )
        .await?;
    Ok(())
}

/// Pull `volume` µl from `port` of `valve` up to the valve common port,
/// between two air gaps
pub async fn draw_reagent(
    system: &FluidicsSystem,
    flowcell: Flowcell,
    valve: u8,
    port: u8,
    volume: u32,
) -> AppResult<()> {
    let speeds = system.config().syringe.speeds;
    info!("Draw {} ul from V{} port {}", volume, valve, port);

    draw_air_to_valve(system, flowcell, valve, None).await?;
    route_port(system, valve, port).await?;
    system
        .transfer(
            volume,
            speeds.slow,
            flowcell.syringe_port(),
            speeds.empty,
            system.config().priming.waste_port,
        )
        .await?;
    draw_air_to_valve(system, flowcell, valve, None).await
}

/// Draw a reagent slug and push it into the flowcell, centred, finishing with
/// the slow-push stroke.
///
/// `draw_port` is the flowcell valve port the slug is chased from.
pub async fn draw_into_flowcell(
    system: &FluidicsSystem,
    flowcell: Flowcell,
    draw_port: u8,
    valve: u8,
    port: u8,
    reagent_volume: u32,
) -> AppResult<()> {
    let draw = flowcell_draw_volume(system, valve, reagent_volume)?;
    let speeds = system.config().syringe.speeds;
    info!(
        "Draw {} ul from V{} port {} into {:?} flowcell",
        reagent_volume, valve, port, flowcell
    );

    draw_reagent(system, flowcell, valve, port, reagent_volume).await?;
    system.set_rotary_valve(FLOWCELL_VALVE, draw_port).await?;
    info!("Chase with {} ul from V{} port {}", draw, FLOWCELL_VALVE, draw_port);
    system
        .transfer_slow(
            draw,
            speeds.pull,
            flowcell.syringe_port(),
            speeds.empty,
            system.config().priming.waste_port,
        )
        .await?;
    Ok(())
}

/// Refill the line from reagent valve `valve` (1..=3) to the flowcell valve
/// with wash and dump the old contents to waste
pub async fn clean_rotary_line(system: &FluidicsSystem, valve: u8) -> AppResult<()> {
    if !(1..=3).contains(&valve) {
        return Err(FluidicsError::InvalidArgument(format!(
            "V{} has no line to V{}",
            valve, FLOWCELL_VALVE
        )));
    }
    let volume = system.path_volume(ROTARY_LINE_ROUTE)?;
    let speeds = system.config().syringe.speeds;
    let priming = &system.config().priming;
    info!("Draw {} ul wash from V{} up to V{}", volume, valve, FLOWCELL_VALVE);

    route_port(system, valve, system.config().fluidics.wash_port).await?;
    system
        .transfer(
            volume,
            speeds.pull,
            priming.inlet_port,
            speeds.empty,
            priming.waste_port,
        )
        .await?;
    Ok(())
}

/// Draw wash through every installed flowcell
pub async fn prime_flowcells(system: &FluidicsSystem) -> AppResult<()> {
    let fluidics = &system.config().fluidics;
    let speeds = system.config().syringe.speeds;
    let volume = system
        .path_volume(FLOWCELL_ROUTE)?
        .checked_add(system.path_volume(WASH_ROUTE)?)
        .ok_or_else(|| FluidicsError::InvalidArgument("flowcell prime volume overflows".into()))?;
    info!("Prime {} flowcell(s) with {} ul wash", fluidics.flowcell_count, volume);

    system
        .set_rotary_valve(FLOWCELL_VALVE, fluidics.wash_port)
        .await?;
    for flowcell in Flowcell::ALL
        .into_iter()
        .take(usize::from(fluidics.flowcell_count))
    {
        system
            .transfer(
                volume,
                speeds.fast,
                flowcell.syringe_port(),
                speeds.empty,
                system.config().priming.waste_port,
            )
            .await?;
    }
    Ok(())
}

/// Flowcells, reagent block, then flowcells again
pub async fn prime_fluidics_system(system: &FluidicsSystem) -> AppResult<()> {
    info!("Prime fluidics system");
    prime_flowcells(system).await?;
    prime_reagent_block(system).await?;
    prime_flowcells(system).await
}

/// Run the mixer for `duration`
pub async fn ligase_mix(system: &FluidicsSystem, duration: Duration) -> AppResult<()> {
    info!("Mix reagent in mixing chamber for {} s", duration.as_secs());
    system.open_valve(DiscreteValve::Mixer).await?;
    tokio::time::sleep(duration).await;
    system.close_valve(DiscreteValve::Mixer).await
}

/// Hold for `minutes`
pub async fn incubate(minutes: u64) -> AppResult<()> {
    thermal::incubate(thermal::minutes(minutes)?).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flowcell_mapping() {
        let first = Flowcell::from_index(0).unwrap();
        assert_eq!(first.syringe_port(), 1);
        assert_eq!(first.controller(), BusAddress::TemperatureController1);

        let second = Flowcell::from_index(1).unwrap();
        assert_eq!(second.syringe_port(), 2);
        assert_eq!(second.controller(), BusAddress::TemperatureController2);

        assert!(Flowcell::from_index(2).is_err());
    }

    #[test]
    fn test_flowcell_route_by_valve() {
        assert_eq!(flowcell_route(4), FLOWCELL_ROUTE);
        for valve in 1..=3 {
            assert_eq!(flowcell_route(valve), ROTARY_FLOWCELL_ROUTE);
        }
    }
}
