//! Volumetric transfer
//!
//! A transfer moves an arbitrary volume from one pump port to another with a
//! syringe that holds at most one stroke. Planning is pure: a
//! [`TransferRequest`] becomes a list of [`StrokeSpec`]s, each of which is
//! one fill from `from_port` at `from_speed` followed by one full dispense to
//! `to_port` at `to_speed`.
//!
//! `k = total / capacity` full strokes are followed by one remainder stroke
//! when `total % capacity != 0`.
//!
//! A slow transfer keeps its last `threshold` µl back and draws them as a
//! separate final stroke at creep speed, so the tail of a reagent enters the
//! flowcell without pulling bubbles.

use crate::error::{AppResult, FluidicsError};
use crate::hardware::{Bus, SyringePump};
use crate::traits::Device;
use tracing::{debug, info};

/// One fill-and-dispense cycle of the syringe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeSpec {
    pub fill_volume: u32,
    pub from_speed: u8,
    pub from_port: u8,
    pub to_speed: u8,
    pub to_port: u8,
}

/// Final creep-speed stroke of a slow transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowPush {
    /// Volume drawn at creep speed; must fit in one stroke
    pub threshold: u32,
    pub creep_speed: u8,
}

/// A volume to move between two pump ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub total_volume: u32,
    pub from_speed: u8,
    pub from_port: u8,
    pub to_speed: u8,
    pub to_port: u8,
    pub slow_push: Option<SlowPush>,
}

impl TransferRequest {
    pub fn new(total_volume: u32, from_speed: u8, from_port: u8, to_speed: u8, to_port: u8) -> Self {
        Self {
            total_volume,
            from_speed,
            from_port,
            to_speed,
            to_port,
            slow_push: None,
        }
    }

    /// Hold back `threshold` µl for a final stroke drawn at `creep_speed`
    pub fn with_slow_push(mut self, threshold: u32, creep_speed: u8) -> Self {
        self.slow_push = Some(SlowPush {
            threshold,
            creep_speed,
        });
        self
    }

    fn stroke(&self, fill_volume: u32, from_speed: u8) -> StrokeSpec {
        StrokeSpec {
            fill_volume,
            from_speed,
            from_port: self.from_port,
            to_speed: self.to_speed,
            to_port: self.to_port,
        }
    }

    /// Split `volume` into full strokes plus a remainder, all at `from_speed`
    fn decompose(&self, volume: u32, capacity: u32, strokes: &mut Vec<StrokeSpec>) {
        let full = volume / capacity;
        let remainder = volume % capacity;
        strokes.extend((0..full).map(|_| self.stroke(capacity, self.from_speed)));
        if remainder != 0 {
            strokes.push(self.stroke(remainder, self.from_speed));
        }
    }

    /// Stroke plan for a syringe of `capacity` µl
    pub fn plan(&self, capacity: u32) -> AppResult<Vec<StrokeSpec>> {
        if capacity == 0 {
            return Err(FluidicsError::InvalidArgument(
                "stroke capacity must be > 0".to_string(),
            ));
        }
        let mut strokes = Vec::new();
        if self.total_volume == 0 {
            return Ok(strokes);
        }

        match self.slow_push {
            None => self.decompose(self.total_volume, capacity, &mut strokes),
            Some(SlowPush { threshold, .. }) if threshold > capacity => {
                return Err(FluidicsError::InvalidArgument(format!(
                    "slow-push threshold {} ul exceeds stroke capacity {} ul",
                    threshold, capacity
                )));
            }
            Some(SlowPush {
                threshold,
                creep_speed,
            }) => {
                if self.total_volume <= threshold {
                    strokes.push(self.stroke(self.total_volume, creep_speed));
                } else {
                    self.decompose(self.total_volume - threshold, capacity, &mut strokes);
                    if threshold != 0 {
                        strokes.push(self.stroke(threshold, creep_speed));
                    }
                }
            }
        }
        Ok(strokes)
    }
}

/// Check every stroke against the pump before any of them runs
fn validate(pump: &SyringePump, strokes: &[StrokeSpec]) -> AppResult<()> {
    for stroke in strokes {
        SyringePump::check_speed(stroke.from_speed)?;
        SyringePump::check_speed(stroke.to_speed)?;
        pump.check_port(stroke.from_port)?;
        pump.check_port(stroke.to_port)?;
        pump.steps_for(stroke.fill_volume)?;
    }
    Ok(())
}

/// Run a stroke plan. Each stroke takes the bus, selects the pump and issues
/// fill then dispense.
pub async fn execute(bus: &Bus, pump: &SyringePump, strokes: &[StrokeSpec]) -> AppResult<()> {
    validate(pump, strokes)?;

    for (i, stroke) in strokes.iter().enumerate() {
        debug!(
            "Stroke {}/{}: {} ul port {} -> port {}",
            i + 1,
            strokes.len(),
            stroke.fill_volume,
            stroke.from_port,
            stroke.to_port
        );
        let mut session = pump.open(bus).await?;
        pump.set_speed(&mut session, stroke.from_speed).await?;
        pump.set_valve_port(&mut session, stroke.from_port).await?;
        pump.set_absolute_volume(&mut session, stroke.fill_volume)
            .await?;
        pump.set_speed(&mut session, stroke.to_speed).await?;
        pump.set_valve_port(&mut session, stroke.to_port).await?;
        pump.set_absolute_volume(&mut session, 0).await?;
    }
    Ok(())
}

/// Plan and run a transfer
pub async fn transfer(
    bus: &Bus,
    pump: &SyringePump,
    request: &TransferRequest,
) -> AppResult<Vec<StrokeSpec>> {
    let strokes = request.plan(pump.capacity())?;
    info!(
        "Transfer {} ul port {} -> port {} in {} stroke(s){}",
        request.total_volume,
        request.from_port,
        request.to_port,
        strokes.len(),
        if request.slow_push.is_some() { " with slow push" } else { "" }
    );
    execute(bus, pump, &strokes).await?;
    Ok(strokes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fills(strokes: &[StrokeSpec]) -> Vec<u32> {
        strokes.iter().map(|s| s.fill_volume).collect()
    }

    #[test]
    fn test_zero_volume_is_noop() {
        let plan = TransferRequest::new(0, 10, 1, 5, 3).plan(1000).unwrap();
        assert!(plan.is_empty());
        let plan = TransferRequest::new(0, 10, 1, 5, 3)
            .with_slow_push(200, 35)
            .plan(1000)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_full_strokes_then_remainder() {
        let plan = TransferRequest::new(2500, 10, 1, 5, 3).plan(1000).unwrap();
        assert_eq!(fills(&plan), vec![1000, 1000, 500]);
        assert!(plan.iter().all(|s| s.from_speed == 10 && s.to_speed == 5));
        assert!(plan.iter().all(|s| s.from_port == 1 && s.to_port == 3));
    }

    #[test]
    fn test_exact_multiple_has_no_remainder() {
        let plan = TransferRequest::new(2000, 10, 1, 5, 3).plan(1000).unwrap();
        assert_eq!(fills(&plan), vec![1000, 1000]);
    }

    #[test]
    fn test_slow_push_tail() {
        let plan = TransferRequest::new(1500, 10, 2, 5, 3)
            .with_slow_push(200, 35)
            .plan(1000)
            .unwrap();
        assert_eq!(fills(&plan), vec![1000, 300, 200]);
        assert_eq!(plan[2].from_speed, 35);
        assert!(plan[..2].iter().all(|s| s.from_speed == 10));
    }

    #[test]
    fn test_slow_push_aligned_total_still_creeps() {
        let plan = TransferRequest::new(1200, 10, 2, 5, 3)
            .with_slow_push(200, 35)
            .plan(1000)
            .unwrap();
        assert_eq!(fills(&plan), vec![1000, 200]);
        assert_eq!(plan[1].from_speed, 35);
    }

    #[test]
    fn test_small_total_is_single_creep_stroke() {
        let plan = TransferRequest::new(150, 10, 2, 5, 3)
            .with_slow_push(200, 35)
            .plan(1000)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].fill_volume, 150);
        assert_eq!(plan[0].from_speed, 35);
        assert_eq!(plan[0].to_speed, 5);
    }

    #[test]
    fn test_threshold_above_capacity_rejected() {
        let result = TransferRequest::new(5000, 10, 2, 5, 3)
            .with_slow_push(1200, 35)
            .plan(1000);
        assert!(matches!(result, Err(FluidicsError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_threshold_means_no_creep_stroke() {
        let plan = TransferRequest::new(1500, 10, 2, 5, 3)
            .with_slow_push(0, 35)
            .plan(1000)
            .unwrap();
        assert_eq!(fills(&plan), vec![1000, 500]);
        assert!(plan.iter().all(|s| s.from_speed == 10));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(TransferRequest::new(10, 1, 1, 1, 3).plan(0).is_err());
    }
}
