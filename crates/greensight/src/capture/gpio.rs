//! Strobe and camera-trigger pulse driver.
//!
//! Pins are logical integers behind [`PulsePins`]; on non-target
//! hardware the no-op implementation reports success so the rest of
//! the pipeline can run. The driver owns both pins for the duration of
//! a sequence; no other thread may write them while a train fires.

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use greensight_core::strobe::StrobePulseTrain;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to claim pin {pin}: {reason}")]
    Claim { pin: u8, reason: String },
    #[error("failed to write pin {pin}: {reason}")]
    Write { pin: u8, reason: String },
}

/// Logical output pins.
pub trait PulsePins {
    fn claim_output(&mut self, pin: u8, initial_high: bool) -> Result<(), GpioError>;
    fn write(&mut self, pin: u8, high: bool) -> Result<(), GpioError>;
    fn release(&mut self, pin: u8);
}

/// No-op pins for non-target hardware; every operation succeeds.
#[derive(Debug, Default)]
pub struct NoopPins {
    announced: bool,
}

impl PulsePins for NoopPins {
    fn claim_output(&mut self, pin: u8, _initial_high: bool) -> Result<(), GpioError> {
        if !self.announced {
            info!(pin, "gpio unavailable on this host; pulse output is a no-op");
            self.announced = true;
        }
        Ok(())
    }

    fn write(&mut self, _pin: u8, _high: bool) -> Result<(), GpioError> {
        Ok(())
    }

    fn release(&mut self, _pin: u8) {}
}

/// Drives the strobe and trigger lines with one pulse train.
pub struct PulseDriver<P: PulsePins> {
    pins: P,
    strobe_pin: u8,
    trigger_pin: u8,
}

impl<P: PulsePins> PulseDriver<P> {
    pub fn new(pins: P, strobe_pin: u8, trigger_pin: u8) -> Self {
        Self {
            pins,
            strobe_pin,
            trigger_pin,
        }
    }

    /// Fire the train: both lines rise together at each pulse's start
    /// offset and fall after its width. The calling thread holds
    /// exclusive ownership of the pins until this returns.
    pub fn fire(&mut self, train: &StrobePulseTrain) -> Result<(), GpioError> {
        self.pins.claim_output(self.strobe_pin, false)?;
        if let Err(err) = self.pins.claim_output(self.trigger_pin, false) {
            self.pins.release(self.strobe_pin);
            return Err(err);
        }
        debug!(
            pulses = train.pulses().len(),
            priming = train.priming_count(),
            total_us = train.total_duration_us(),
            "firing pulse train"
        );

        let result = self.fire_claimed(train);

        self.pins.release(self.trigger_pin);
        self.pins.release(self.strobe_pin);
        result
    }

    fn fire_claimed(&mut self, train: &StrobePulseTrain) -> Result<(), GpioError> {
        let origin = Instant::now();
        for pulse in train.pulses() {
            wait_until(origin + Duration::from_micros(pulse.start_us));
            self.pins.write(self.strobe_pin, true)?;
            self.pins.write(self.trigger_pin, true)?;
            wait_until(origin + Duration::from_micros(pulse.end_us()));
            self.pins.write(self.strobe_pin, false)?;
            self.pins.write(self.trigger_pin, false)?;
        }
        Ok(())
    }
}

/// Sleep-then-spin wait for microsecond-level edges.
fn wait_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > Duration::from_micros(500) {
            std::thread::sleep(remaining - Duration::from_micros(200));
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greensight_core::strobe::StrobePulseTrain;

    #[derive(Default)]
    struct RecordingPins {
        claimed: Vec<u8>,
        released: Vec<u8>,
        edges: Vec<(u8, bool)>,
        fail_claim: Option<u8>,
    }

    impl PulsePins for &mut RecordingPins {
        fn claim_output(&mut self, pin: u8, _initial_high: bool) -> Result<(), GpioError> {
            if self.fail_claim == Some(pin) {
                return Err(GpioError::Claim {
                    pin,
                    reason: "scripted".into(),
                });
            }
            self.claimed.push(pin);
            Ok(())
        }
        fn write(&mut self, pin: u8, high: bool) -> Result<(), GpioError> {
            self.edges.push((pin, high));
            Ok(())
        }
        fn release(&mut self, pin: u8) {
            self.released.push(pin);
        }
    }

    fn short_train() -> StrobePulseTrain {
        StrobePulseTrain::evenly_spaced(1, 50, 2, 50, 10).unwrap()
    }

    #[test]
    fn every_pulse_produces_rising_and_falling_edges_on_both_pins() {
        let mut pins = RecordingPins::default();
        {
            let mut driver = PulseDriver::new(&mut pins, 17, 27);
            driver.fire(&short_train()).unwrap();
        }
        // 3 pulses x 2 pins x 2 edges.
        assert_eq!(pins.edges.len(), 12);
        assert_eq!(pins.claimed, vec![17, 27]);
        assert_eq!(pins.released, vec![27, 17]);
        // First event is the strobe rising.
        assert_eq!(pins.edges[0], (17, true));
    }

    #[test]
    fn failed_trigger_claim_releases_the_strobe_pin() {
        let mut pins = RecordingPins {
            fail_claim: Some(27),
            ..Default::default()
        };
        {
            let mut driver = PulseDriver::new(&mut pins, 17, 27);
            assert!(driver.fire(&short_train()).is_err());
        }
        assert_eq!(pins.claimed, vec![17]);
        assert_eq!(pins.released, vec![17]);
    }

    #[test]
    fn noop_pins_always_succeed() {
        let mut driver = PulseDriver::new(NoopPins::default(), 17, 27);
        driver.fire(&short_train()).unwrap();
    }
}
