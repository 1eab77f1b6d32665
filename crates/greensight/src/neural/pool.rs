//! Tensor buffer pool.
//!
//! One input and one output buffer per detector instance. A buffer is
//! claimed at `detect` entry and released when the claim drops; a
//! claim while the buffer is in use fails with a recoverable error so
//! the caller can fall back to a thread-local heap buffer.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("tensor buffer already in use")]
pub struct PoolBusy;

#[derive(Debug, Default)]
struct PoolBuffer {
    data: Mutex<Vec<f32>>,
    /// Capacity snapshot, readable without the lock.
    capacity: AtomicUsize,
}

impl PoolBuffer {
    fn claim(&self, len: usize) -> Result<PoolClaim<'_>, PoolBusy> {
        let mut guard = self.data.try_lock().map_err(|_| PoolBusy)?;
        guard.resize(len, 0.0);
        self.capacity.store(guard.capacity(), Ordering::Relaxed);
        Ok(PoolClaim { guard })
    }
}

/// Scoped claim on a pool buffer. The buffer is released on drop, on
/// every exit path.
#[derive(Debug)]
pub struct PoolClaim<'a> {
    guard: MutexGuard<'a, Vec<f32>>,
}

impl Deref for PoolClaim<'_> {
    type Target = Vec<f32>;
    fn deref(&self) -> &Vec<f32> {
        &self.guard
    }
}

impl DerefMut for PoolClaim<'_> {
    fn deref_mut(&mut self) -> &mut Vec<f32> {
        &mut self.guard
    }
}

/// Input + output tensor buffers for one detector instance.
#[derive(Debug, Default)]
pub struct TensorPool {
    input: PoolBuffer,
    output: PoolBuffer,
}

impl TensorPool {
    /// Pre-size both buffers.
    pub fn reserve(&self, input_len: usize, output_len: usize) {
        if let Ok(claim) = self.input.claim(input_len) {
            drop(claim);
        }
        if let Ok(claim) = self.output.claim(output_len) {
            drop(claim);
        }
    }

    /// Claim the input buffer, resized to `len`.
    pub fn claim_input(&self, len: usize) -> Result<PoolClaim<'_>, PoolBusy> {
        self.input.claim(len)
    }

    /// Claim the output buffer, resized to `len`.
    pub fn claim_output(&self, len: usize) -> Result<PoolClaim<'_>, PoolBusy> {
        self.output.claim(len)
    }

    /// Bytes currently allocated across both buffers.
    pub fn bytes_allocated(&self) -> usize {
        (self.input.capacity.load(Ordering::Relaxed) + self.output.capacity.load(Ordering::Relaxed))
            * std::mem::size_of::<f32>()
    }
}
