//! Steady-state temperature control
//!
//! After a setpoint is written the controller is polled until the reading
//! settles near a poll temperature (which may differ from the setpoint to
//! compensate for sensor offset), or until a deadline passes.
//!
//! ```text
//! RAMPING ──(reading settled)──> SETTLED
//!    └─────(elapsed > deadline)─> TIMED_OUT   (warning, not an error)
//! ```
//!
//! All timing uses `tokio::time`, so tests can run the loop on a paused
//! clock.

use crate::config::ThermalConfig;
use crate::error::{AppResult, FluidicsError};
use crate::traits::TemperatureProbe;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const INCUBATION_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// How a reading is judged settled.
///
/// Both policies require `|poll - reading| <= tolerance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlePolicy {
    /// In the band, whichever side the reading came from
    #[default]
    Symmetric,
    /// In the band, and at least one reading so far was on the approach side
    /// of the poll temperature (at or below it when heating, at or above it
    /// when cooling). A reading that drifts into the band from the far side
    /// does not settle until the ramp has reached the poll temperature.
    Directional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampDirection {
    Heating,
    Cooling,
}

impl RampDirection {
    /// Heating when the setpoint is at or above the poll temperature
    pub fn between(setpoint: f64, poll_temperature: f64) -> Self {
        if setpoint >= poll_temperature {
            RampDirection::Heating
        } else {
            RampDirection::Cooling
        }
    }
}

/// One temperature ramp to wait for
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalTarget {
    pub setpoint: f64,
    pub poll_temperature: f64,
    pub tolerance: f64,
    pub direction: RampDirection,
    pub deadline: Duration,
}

impl ThermalTarget {
    pub fn new(setpoint: f64, poll_temperature: f64, tolerance: f64, deadline: Duration) -> Self {
        Self {
            setpoint,
            poll_temperature,
            tolerance,
            direction: RampDirection::between(setpoint, poll_temperature),
            deadline,
        }
    }

    pub fn in_band(&self, reading: f64) -> bool {
        (self.poll_temperature - reading).abs() <= self.tolerance
    }

    /// At or short of the poll temperature in the ramp direction
    pub fn on_approach_side(&self, reading: f64) -> bool {
        match self.direction {
            RampDirection::Heating => reading <= self.poll_temperature,
            RampDirection::Cooling => reading >= self.poll_temperature,
        }
    }
}

/// Settle test over the successive readings of one wait
#[derive(Debug, Clone)]
pub struct SettleCheck<'a> {
    target: &'a ThermalTarget,
    policy: SettlePolicy,
    approached: bool,
}

impl<'a> SettleCheck<'a> {
    pub fn new(target: &'a ThermalTarget, policy: SettlePolicy) -> Self {
        Self {
            target,
            policy,
            approached: false,
        }
    }

    /// Record a reading; true once the target counts as settled
    pub fn observe(&mut self, reading: f64) -> bool {
        self.approached |= self.target.on_approach_side(reading);
        self.target.in_band(reading)
            && match self.policy {
                SettlePolicy::Symmetric => true,
                SettlePolicy::Directional => self.approached,
            }
    }
}

/// Outcome of a steady-state wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SteadyState {
    Settled { temperature: f64, elapsed: Duration },
    /// Deadline passed; execution continues with the last reading
    TimedOut { temperature: f64, elapsed: Duration },
}

impl SteadyState {
    pub fn is_settled(&self) -> bool {
        matches!(self, SteadyState::Settled { .. })
    }

    /// Last reading taken
    pub fn temperature(&self) -> f64 {
        match *self {
            SteadyState::Settled { temperature, .. } | SteadyState::TimedOut { temperature, .. } => {
                temperature
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match *self {
            SteadyState::Settled { elapsed, .. } | SteadyState::TimedOut { elapsed, .. } => elapsed,
        }
    }
}

/// Polls a probe until a [`ThermalTarget`] settles or times out
#[derive(Debug, Clone)]
pub struct SteadyStateWaiter {
    poll_interval: Duration,
    policy: SettlePolicy,
}

impl Default for SteadyStateWaiter {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            policy: SettlePolicy::Symmetric,
        }
    }
}

impl SteadyStateWaiter {
    pub fn from_config(config: &ThermalConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            policy: config.settle_policy,
        }
    }

    pub fn with_policy(mut self, policy: SettlePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn policy(&self) -> SettlePolicy {
        self.policy
    }

    /// Poll until settled or past the deadline.
    ///
    /// The first reading is taken immediately. Probe errors end the wait and
    /// propagate; a missed deadline is logged and returned as
    /// [`SteadyState::TimedOut`].
    pub async fn wait(
        &self,
        probe: &dyn TemperatureProbe,
        target: &ThermalTarget,
    ) -> AppResult<SteadyState> {
        info!(
            "Waiting for {:?} to {:.2} C (poll {:.2} C, +/-{:.2} C, limit {:?})",
            target.direction, target.setpoint, target.poll_temperature, target.tolerance, target.deadline
        );
        let mut check = SettleCheck::new(target, self.policy);
        let start = Instant::now();
        loop {
            let temperature = probe.current_temperature().await?;
            let elapsed = start.elapsed();

            if check.observe(temperature) {
                info!(
                    "Steady state {:.2} C reached after {} s",
                    temperature,
                    elapsed.as_secs()
                );
                return Ok(SteadyState::Settled {
                    temperature,
                    elapsed,
                });
            }
            if elapsed > target.deadline {
                warn!(
                    "Time limit {:?} exceeded -> [current: {:.2}, target: {:.2}] C",
                    target.deadline, temperature, target.poll_temperature
                );
                return Ok(SteadyState::TimedOut {
                    temperature,
                    elapsed,
                });
            }

            debug!(
                "Elapsed {} s, current temperature {:.2} C",
                elapsed.as_secs(),
                temperature
            );
            sleep(self.poll_interval).await;
        }
    }
}

/// Convert a whole number of minutes, rejecting values past `u64` seconds
pub fn minutes(minutes: u64) -> AppResult<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| FluidicsError::InvalidArgument(format!("{} min is too long", minutes)))
}

/// Hold for `duration`, logging progress once a minute
pub async fn incubate(duration: Duration) {
    info!("Incubate for {} s", duration.as_secs());
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= duration {
            break;
        }
        sleep(INCUBATION_REPORT_INTERVAL.min(duration - elapsed)).await;
        debug!(
            "Incubation elapsed {} of {} s",
            start.elapsed().as_secs(),
            duration.as_secs()
        );
    }
    info!("Incubation finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Replays a reading sequence, repeating the last value
    struct Replay(Mutex<VecDeque<f64>>);

    impl Replay {
        fn new(readings: &[f64]) -> Self {
            Self(Mutex::new(readings.iter().copied().collect()))
        }
    }

    #[async_trait]
    impl TemperatureProbe for Replay {
        async fn current_temperature(&self) -> AppResult<f64> {
            let mut readings = self.0.lock().unwrap();
            let value = if readings.len() > 1 {
                readings.pop_front().unwrap()
            } else {
                *readings.front().unwrap()
            };
            Ok(value)
        }
    }

    #[test]
    fn test_direction() {
        assert_eq!(RampDirection::between(52.0, 52.0), RampDirection::Heating);
        assert_eq!(RampDirection::between(60.0, 52.0), RampDirection::Heating);
        assert_eq!(RampDirection::between(4.0, 28.0), RampDirection::Cooling);
    }

    #[test]
    fn test_band_and_approach_side() {
        let heating = ThermalTarget::new(60.0, 55.0, 1.0, Duration::from_secs(60));
        assert!(heating.in_band(55.8));
        assert!(!heating.in_band(57.0));
        assert!(heating.on_approach_side(54.2));
        assert!(!heating.on_approach_side(55.8));

        let cooling = ThermalTarget::new(4.0, 6.0, 1.0, Duration::from_secs(60));
        assert!(cooling.on_approach_side(6.5));
        assert!(!cooling.on_approach_side(5.5));
    }

    #[test]
    fn test_symmetric_check_is_the_band() {
        let target = ThermalTarget::new(60.0, 55.0, 1.0, Duration::from_secs(60));
        let mut check = SettleCheck::new(&target, SettlePolicy::Symmetric);
        assert!(!check.observe(57.0));
        assert!(check.observe(55.8));
    }

    #[test]
    fn test_directional_check_rejects_overshoot() {
        let target = ThermalTarget::new(60.0, 55.0, 1.0, Duration::from_secs(60));
        let mut check = SettleCheck::new(&target, SettlePolicy::Directional);
        // overshoot is outside the band
        assert!(!check.observe(57.0));
        // in the band but entered from above while heating
        assert!(!check.observe(55.8));
        assert!(check.observe(54.9));
    }

    #[test]
    fn test_directional_check_after_approach() {
        let target = ThermalTarget::new(4.0, 6.0, 1.0, Duration::from_secs(60));
        let mut check = SettleCheck::new(&target, SettlePolicy::Directional);
        assert!(!check.observe(20.0));
        // once approached from above, either side of the band counts
        assert!(check.observe(5.2));
        assert!(!check.observe(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_on_first_poll() {
        let probe = Replay::new(&[52.0]);
        let target = ThermalTarget::new(52.0, 52.0, 1.0, Duration::from_secs(60));

        let outcome = SteadyStateWaiter::default().wait(&probe, &target).await.unwrap();
        assert!(outcome.is_settled());
        assert_eq!(outcome.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_ramp() {
        let probe = Replay::new(&[30.0, 40.0, 48.0, 51.5]);
        let target = ThermalTarget::new(55.0, 52.0, 1.0, Duration::from_secs(60));

        let outcome = SteadyStateWaiter::default().wait(&probe, &target).await.unwrap();
        assert!(outcome.is_settled());
        assert_eq!(outcome.temperature(), 51.5);
        assert_eq!(outcome.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_deadline() {
        let probe = Replay::new(&[40.0]);
        let target = ThermalTarget::new(52.0, 52.0, 1.0, Duration::from_secs(60));

        let outcome = SteadyStateWaiter::default().wait(&probe, &target).await.unwrap();
        assert!(!outcome.is_settled());
        assert!(outcome.elapsed() >= Duration::from_secs(60));
        assert_eq!(outcome.temperature(), 40.0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_timeout_is_logged_as_warning() {
        let probe = Replay::new(&[20.0]);
        let target = ThermalTarget::new(4.0, 4.0, 1.0, Duration::from_secs(5));

        let outcome = SteadyStateWaiter::default().wait(&probe, &target).await.unwrap();
        assert!(!outcome.is_settled());
        assert!(logs_contain("Time limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_directional_waiter_polls_through_overshoot() {
        let probe = Replay::new(&[57.0, 55.5, 54.8]);
        let target = ThermalTarget::new(60.0, 55.0, 1.0, Duration::from_secs(60));

        let symmetric = SteadyStateWaiter::default()
            .wait(&Replay::new(&[57.0, 55.5, 54.8]), &target)
            .await
            .unwrap();
        assert_eq!(symmetric.temperature(), 55.5);
        assert_eq!(symmetric.elapsed(), Duration::from_secs(1));

        let waiter = SteadyStateWaiter::default().with_policy(SettlePolicy::Directional);
        let outcome = waiter.wait(&probe, &target).await.unwrap();
        assert!(outcome.is_settled());
        assert_eq!(outcome.temperature(), 54.8);
        assert_eq!(outcome.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_directional_waiter_times_out_on_overshoot() {
        let probe = Replay::new(&[3.5]);
        let target = ThermalTarget::new(2.0, 6.0, 1.0, Duration::from_secs(5));

        let waiter = SteadyStateWaiter::default().with_policy(SettlePolicy::Directional);
        let outcome = waiter.wait(&probe, &target).await.unwrap();
        assert!(!outcome.is_settled());
        assert_eq!(outcome.temperature(), 3.5);
    }

    #[test]
    fn test_minutes() {
        assert_eq!(minutes(2).unwrap(), Duration::from_secs(120));
        assert_eq!(minutes(0).unwrap(), Duration::ZERO);
        assert!(matches!(
            minutes(u64::MAX),
            Err(FluidicsError::InvalidArgument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incubate_waits_full_duration() {
        let start = Instant::now();
        incubate(Duration::from_secs(150)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(150));
    }
}
