//! Strobe pulse-train value type.
//!
//! A train is an ordered sequence of pulse events with per-pulse start
//! offset and width in microseconds, preceded by a priming prefix the
//! flight sensor needs before it delivers valid frames. Invariants:
//! strictly increasing start offsets, and total duration under the
//! camera's maximum-exposure budget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One strobe/trigger pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrobePulse {
    /// Offset of the rising edge from sequence start, µs.
    pub start_us: u64,
    /// Pulse width, µs.
    pub width_us: u64,
}

impl StrobePulse {
    pub fn end_us(&self) -> u64 {
        self.start_us + self.width_us
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PulseTrainError {
    #[error("pulse train is empty")]
    Empty,
    #[error("pulse {index} starts at {start_us} µs, not after the previous pulse")]
    NonMonotonic { index: usize, start_us: u64 },
    #[error("pulses {a} and {b} overlap")]
    Overlap { a: usize, b: usize },
    #[error("priming prefix {priming} exceeds pulse count {total}")]
    PrimingTooLong { priming: usize, total: usize },
    #[error("total duration {total_us} µs exceeds exposure budget {budget_us} µs")]
    ExceedsExposureBudget { total_us: u64, budget_us: u64 },
}

/// Ordered pulse sequence with a priming prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrobePulseTrain {
    pulses: Vec<StrobePulse>,
    priming_count: usize,
}

impl StrobePulseTrain {
    /// Build a train from explicit pulses. Fails when ordering or
    /// priming invariants are violated.
    pub fn new(pulses: Vec<StrobePulse>, priming_count: usize) -> Result<Self, PulseTrainError> {
        if pulses.is_empty() {
            return Err(PulseTrainError::Empty);
        }
        for i in 1..pulses.len() {
            if pulses[i].start_us <= pulses[i - 1].start_us {
                return Err(PulseTrainError::NonMonotonic {
                    index: i,
                    start_us: pulses[i].start_us,
                });
            }
            if pulses[i].start_us < pulses[i - 1].end_us() {
                return Err(PulseTrainError::Overlap { a: i - 1, b: i });
            }
        }
        if priming_count > pulses.len() {
            return Err(PulseTrainError::PrimingTooLong {
                priming: priming_count,
                total: pulses.len(),
            });
        }
        Ok(Self {
            pulses,
            priming_count,
        })
    }

    /// Evenly spaced train: `priming_count` priming pulses at
    /// `priming_interval_us`, then `capture_count` capture flashes at
    /// `capture_interval_us`, all with the same width.
    pub fn evenly_spaced(
        priming_count: usize,
        priming_interval_us: u64,
        capture_count: usize,
        capture_interval_us: u64,
        width_us: u64,
    ) -> Result<Self, PulseTrainError> {
        let mut pulses = Vec::with_capacity(priming_count + capture_count);
        let mut t = 0u64;
        for _ in 0..priming_count {
            pulses.push(StrobePulse {
                start_us: t,
                width_us,
            });
            t += priming_interval_us.max(width_us + 1);
        }
        for _ in 0..capture_count {
            pulses.push(StrobePulse {
                start_us: t,
                width_us,
            });
            t += capture_interval_us.max(width_us + 1);
        }
        Self::new(pulses, priming_count)
    }

    pub fn pulses(&self) -> &[StrobePulse] {
        &self.pulses
    }

    /// Priming pulses the sensor absorbs before the real capture.
    pub fn priming(&self) -> &[StrobePulse] {
        &self.pulses[..self.priming_count]
    }

    /// Pulses that light the actual capture exposure.
    pub fn capture(&self) -> &[StrobePulse] {
        &self.pulses[self.priming_count..]
    }

    pub fn priming_count(&self) -> usize {
        self.priming_count
    }

    /// End of the last pulse, µs from sequence start.
    pub fn total_duration_us(&self) -> u64 {
        self.pulses.last().map(StrobePulse::end_us).unwrap_or(0)
    }

    /// Check the train against the camera's max-exposure budget.
    pub fn check_exposure_budget(&self, budget_us: u64) -> Result<(), PulseTrainError> {
        let total_us = self.total_duration_us();
        if total_us >= budget_us {
            return Err(PulseTrainError::ExceedsExposureBudget { total_us, budget_us });
        }
        Ok(())
    }
}
