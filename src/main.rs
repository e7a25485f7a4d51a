//! `fluidics` command-line utility
//!
//! Runs single recipe-boundary operations or whole procedures against the
//! instrument. `path-volume` and `gap-volume` only read the configuration and
//! never open the hardware channels.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use polony_fluidics::config::FluidicsConfig;
use polony_fluidics::hardware::{BusAddress, DiscreteValve};
use polony_fluidics::procedures::{self, Flowcell};
use polony_fluidics::system::FluidicsSystem;
use polony_fluidics::thermal;
use polony_fluidics::volumes::VolumeTable;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fluidics", version, about = "Polony sequencer fluidics control")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/fluidics.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move a volume between two syringe pump ports
    Transfer(TransferArgs),
    /// Transfer with the final slow-push stroke at creep speed
    TransferSlow(TransferArgs),
    /// Route the device line to one device
    Select { device: DeviceArg },
    /// Open or close a discrete valve (or the mixer)
    Valve { valve: ValveArg, state: ValveState },
    /// Turn a rotary valve
    Rotary { valve: u8, position: u8 },
    /// Enable a temperature controller and write its setpoint
    SetTemperature {
        device: DeviceArg,
        #[arg(allow_negative_numbers = true)]
        celsius: f64,
    },
    /// Poll a temperature controller until it settles
    WaitSteadyState {
        device: DeviceArg,
        #[arg(allow_negative_numbers = true)]
        setpoint: f64,
        /// Poll temperature; defaults to the setpoint
        #[arg(long, allow_negative_numbers = true)]
        poll: Option<f64>,
        /// Tolerance in °C; defaults to the configured tolerance
        #[arg(long)]
        tolerance: Option<f64>,
        /// Time limit in minutes; defaults to the configured limit
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Print route volumes (all routes when none is named)
    PathVolume { route: Option<String> },
    /// Print the air gap for a reagent volume
    GapVolume { reagent: u32 },
    /// Prime the reagent block from the priming table
    Prime,
    /// Temperature controllers, syringe pump and reagent block start-up
    Init,
    /// Prime every installed flowcell with wash
    PrimeFlowcells,
    /// Prime flowcells, reagent block, then flowcells again
    PrimeSystem,
    /// Wash a flowcell three times from a port of rotary valve 4
    FlushFlowcell { flowcell: u8, port: u8 },
    /// Pull an air gap up to a rotary valve's common port
    DrawAir {
        flowcell: u8,
        valve: u8,
        /// Gap in µl; defaults to the configured air gap
        #[arg(long)]
        gap: Option<u32>,
    },
    /// Pull a reagent up to a rotary valve's common port between air gaps
    DrawReagent {
        flowcell: u8,
        valve: u8,
        port: u8,
        volume: u32,
    },
    /// Draw a reagent and chase it into the centre of a flowcell
    DrawIntoFlowcell {
        flowcell: u8,
        /// Rotary valve 4 port the reagent is chased from
        draw_port: u8,
        valve: u8,
        port: u8,
        volume: u32,
    },
    /// Refill the line from a reagent valve to rotary valve 4 with wash
    CleanLine { valve: u8 },
    /// Run the mixer for a number of seconds
    Mix { seconds: u64 },
    /// Wait for a number of minutes
    Incubate { minutes: u64 },
}

#[derive(clap::Args)]
struct TransferArgs {
    /// Volume in µl
    volume: u32,
    from_speed: u8,
    from_port: u8,
    to_speed: u8,
    to_port: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceArg {
    Rv1,
    Rv2,
    Rv3,
    Rv4,
    Syringe,
    Tc1,
    Tc2,
    Cooler,
}

impl From<DeviceArg> for BusAddress {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Rv1 => BusAddress::RotaryValve1,
            DeviceArg::Rv2 => BusAddress::RotaryValve2,
            DeviceArg::Rv3 => BusAddress::RotaryValve3,
            DeviceArg::Rv4 => BusAddress::RotaryValve4,
            DeviceArg::Syringe => BusAddress::SyringePump,
            DeviceArg::Tc1 => BusAddress::TemperatureController1,
            DeviceArg::Tc2 => BusAddress::TemperatureController2,
            DeviceArg::Cooler => BusAddress::ReagentBlockCooler,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ValveArg {
    V4,
    V5,
    V6,
    V7,
    Mixer,
}

impl From<ValveArg> for DiscreteValve {
    fn from(arg: ValveArg) -> Self {
        match arg {
            ValveArg::V4 => DiscreteValve::V4,
            ValveArg::V5 => DiscreteValve::V5,
            ValveArg::V6 => DiscreteValve::V6,
            ValveArg::V7 => DiscreteValve::V7,
            ValveArg::Mixer => DiscreteValve::Mixer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ValveState {
    Open,
    Close,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FluidicsConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config.application.log_level);
    info!("Starting {}", config.application.name);

    match cli.command {
        Command::PathVolume { route } => {
            let volumes = VolumeTable::from_config(&config.fluidics)?;
            match route {
                Some(name) => println!("{}: {} ul", name, volumes.route(&name)?),
                None => {
                    for (name, volume) in volumes.routes() {
                        println!("{}: {} ul", name, volume);
                    }
                    println!("flowcell wash: {} ul", volumes.flowcell_wash());
                }
            }
            Ok(())
        }
        Command::GapVolume { reagent } => {
            let volumes = VolumeTable::from_config(&config.fluidics)?;
            println!("{} ul", volumes.gap(reagent));
            Ok(())
        }
        command => run(config, command).await,
    }
}

async fn run(config: FluidicsConfig, command: Command) -> Result<()> {
    let system = FluidicsSystem::connect(config)
        .await
        .context("connecting to the instrument")?;

    match command {
        Command::Transfer(args) => {
            let strokes = system
                .transfer(args.volume, args.from_speed, args.from_port, args.to_speed, args.to_port)
                .await?;
            println!("{} stroke(s)", strokes.len());
        }
        Command::TransferSlow(args) => {
            let strokes = system
                .transfer_slow(args.volume, args.from_speed, args.from_port, args.to_speed, args.to_port)
                .await?;
            println!("{} stroke(s)", strokes.len());
        }
        Command::Select { device } => system.select_device(device.into()).await?,
        Command::Valve { valve, state } => match state {
            ValveState::Open => system.open_valve(valve.into()).await?,
            ValveState::Close => system.close_valve(valve.into()).await?,
        },
        Command::Rotary { valve, position } => system.set_rotary_valve(valve, position).await?,
        Command::SetTemperature { device, celsius } => {
            system.set_temperature(device.into(), celsius).await?;
        }
        Command::WaitSteadyState {
            device,
            setpoint,
            poll,
            tolerance,
            minutes,
        } => {
            let settings = &system.config().thermal;
            let deadline = match minutes {
                Some(m) => thermal::minutes(m)?,
                None => settings.deadline(),
            };
            let outcome = system
                .wait_for_steady_state(
                    device.into(),
                    setpoint,
                    poll.unwrap_or(setpoint),
                    tolerance.unwrap_or(settings.tolerance),
                    deadline,
                )
                .await?;
            println!("{:?}", outcome);
        }
        Command::Prime => procedures::prime_reagent_block(&system).await?,
        Command::Init => procedures::init(&system).await?,
        Command::PrimeFlowcells => procedures::prime_flowcells(&system).await?,
        Command::PrimeSystem => procedures::prime_fluidics_system(&system).await?,
        Command::FlushFlowcell { flowcell, port } => {
            procedures::flush_flowcell(&system, Flowcell::from_index(flowcell)?, port).await?;
        }
        Command::DrawAir {
            flowcell,
            valve,
            gap,
        } => {
            procedures::draw_air_to_valve(&system, Flowcell::from_index(flowcell)?, valve, gap)
                .await?;
        }
        Command::DrawReagent {
            flowcell,
            valve,
            port,
            volume,
        } => {
            procedures::draw_reagent(&system, Flowcell::from_index(flowcell)?, valve, port, volume)
                .await?;
        }
        Command::DrawIntoFlowcell {
            flowcell,
            draw_port,
            valve,
            port,
            volume,
        } => {
            let flowcell = Flowcell::from_index(flowcell)?;
            procedures::draw_into_flowcell(&system, flowcell, draw_port, valve, port, volume)
                .await?;
        }
        Command::CleanLine { valve } => procedures::clean_rotary_line(&system, valve).await?,
        Command::Mix { seconds } => {
            procedures::ligase_mix(&system, Duration::from_secs(seconds)).await?;
        }
        Command::Incubate { minutes } => procedures::incubate(minutes).await?,
        Command::PathVolume { .. } | Command::GapVolume { .. } => {}
    }
    Ok(())
}
