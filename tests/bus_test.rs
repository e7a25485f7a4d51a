//! Integration tests for mux selection and discrete valves

mod common;

use common::Instrument;
use polony_fluidics::hardware::{BusAddress, DiscreteValve};

#[tokio::test]
async fn test_construction_resets_every_bank() {
    let instrument = Instrument::new();
    let system = instrument.system().await;

    // four banks, seven data/bank lines plus two strobe writes each
    assert_eq!(instrument.mux.writes().len(), 36);
    assert!(instrument.line.writes().is_empty());
    assert_eq!(system.bus().selected().await, None);
    for valve in [DiscreteValve::V4, DiscreteValve::V5, DiscreteValve::Mixer] {
        assert!(!system.bus().valve_is_open(valve).await);
    }
}

#[tokio::test]
async fn test_select_is_idempotent_in_line_state() {
    let instrument = Instrument::new();
    let system = instrument.system().await;

    for target in BusAddress::ALL {
        system.select_device(target).await.unwrap();
        let once = system.bus().line_state().await;
        system.select_device(target).await.unwrap();
        let twice = system.bus().line_state().await;

        assert_eq!(once, twice);
        assert_eq!(once, target.line_state());
        assert_eq!(system.bus().selected().await, Some(target));
    }
}

#[tokio::test]
async fn test_every_select_ends_with_strobe_edge() {
    let instrument = Instrument::new();
    let system = instrument.system().await;
    instrument.clear();

    system.select_device(BusAddress::ReagentBlockCooler).await.unwrap();

    let writes = instrument.mux.writes();
    assert_eq!(writes.len(), 9);
    assert_eq!(&writes[7..], ["m_dout[5]=0", "m_dout[5]=1"]);
    // cooler address 0b010 on lines 0..=2, device bank on lines 6/7
    assert_eq!(
        &writes[..7],
        [
            "m_dout[0]=0",
            "m_dout[1]=1",
            "m_dout[2]=0",
            "m_dout[3]=0",
            "m_dout[4]=0",
            "m_dout[6]=0",
            "m_dout[7]=1",
        ]
    );
}

#[tokio::test]
async fn test_valves_do_not_disturb_each_other() {
    let instrument = Instrument::new();
    let system = instrument.system().await;

    system.open_valve(DiscreteValve::V4).await.unwrap();
    system.open_valve(DiscreteValve::Mixer).await.unwrap();
    system.close_valve(DiscreteValve::V4).await.unwrap();

    let bus = system.bus();
    assert!(!bus.valve_is_open(DiscreteValve::V4).await);
    assert!(bus.valve_is_open(DiscreteValve::Mixer).await);
}

#[tokio::test]
async fn test_mux_failure_clears_selection() {
    let instrument = Instrument::new();
    let system = instrument.system().await;
    system.select_device(BusAddress::SyringePump).await.unwrap();

    instrument.mux.inject_write_failure();
    assert!(system.select_device(BusAddress::RotaryValve3).await.is_err());
    assert_eq!(system.bus().selected().await, None);

    system.select_device(BusAddress::RotaryValve3).await.unwrap();
    assert_eq!(system.bus().selected().await, Some(BusAddress::RotaryValve3));
}

#[tokio::test]
async fn test_rotary_valve_through_system() {
    let instrument = Instrument::new();
    let system = instrument.system().await;

    system.set_rotary_valve(2, 10).await.unwrap();

    assert_eq!(instrument.valve_moves(), vec!["P0A\r"]);
    assert_eq!(system.bus().selected().await, Some(BusAddress::RotaryValve2));
    assert_eq!(instrument.line.baud_rate(), Some(19200));
    assert!(system.set_rotary_valve(5, 1).await.is_err());
    assert!(system.set_rotary_valve(1, 11).await.is_err());
}
