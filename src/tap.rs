//! Packing of TAP steps into the adapter's wire format, and the bit stream that comes back.
//!
//! The adapter takes four steps per byte.  Step `i` occupies bits `2*(i % 4)` (TDI) and
//! `2*(i % 4) + 1` (TMS) of byte `i / 4`.  Replies carry one TDO bit per step, LSB first.
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Steps the immediate buffer holds.  63 bytes of steps plus the header fill one frame.
pub const TAP_BUFFER_STEPS: usize = 63 * 4;

/// Steps the schedule buffer holds for one flush cycle.
pub const SCHEDULE_BUFFER_STEPS: usize = 1024 * 4;

/// One TCK edge: the TMS level and the TDI bit shifted in with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitStep {
    pub tms: bool,
    pub tdi: bool,
}

impl BitStep {
    pub fn new(tms: bool, tdi: bool) -> Self {
        Self { tms, tdi }
    }
}

/// Fixed capacity buffer of packed steps.
#[derive(Debug)]
pub struct PackedBuffer {
    bytes: Vec<u8>,
    len: usize,
    capacity: usize,
}

impl PackedBuffer {
    /// Allocate a buffer for `steps` steps.  Fails instead of aborting if the allocation
    /// can't be satisfied.
    pub fn with_capacity(steps: usize) -> Result<Self> {
        let size = steps.div_ceil(4);
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| Error::Allocation { steps })?;
        bytes.resize(size, 0);

        Ok(Self {
            bytes,
            len: 0,
            capacity: steps,
        })
    }

    /// Append one step.  A full buffer rejects the step and leaves its contents untouched.
    pub fn append(&mut self, step: BitStep) -> Result<()> {
        if self.len >= self.capacity {
            log::warn!("tap buffer overflow, dropping step {}", self.len);
            return Err(Error::Overflow {
                capacity: self.capacity,
            });
        }

        let index = self.len / 4;
        let shift = (self.len % 4) * 2;
        if shift == 0 {
            self.bytes[index] = 0;
        }
        self.bytes[index] |= (step.tdi as u8) << shift | (step.tms as u8) << (shift + 1);
        self.len += 1;
        Ok(())
    }

    /// Unpack step `index`, if it has been written.
    pub fn step(&self, index: usize) -> Option<BitStep> {
        if index >= self.len {
            return None;
        }
        let byte = self.bytes[index / 4] >> ((index % 4) * 2);
        Some(BitStep::new(byte & 2 != 0, byte & 1 != 0))
    }

    /// The bytes holding the valid steps.  The last byte may be partially filled.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len.div_ceil(4)]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// TDO bits returned by the adapter during one flush cycle, in transfer order.
#[derive(Debug, Default)]
pub struct Bitstream {
    bytes: Vec<u8>,
}

impl Bitstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, reply: &[u8]) {
        self.bytes.extend_from_slice(reply);
    }

    /// Bit at absolute `offset`.  Offsets past the returned data read as zero.
    pub fn bit(&self, offset: usize) -> bool {
        self.bytes
            .get(offset / 8)
            .is_some_and(|byte| byte & (1 << (offset % 8)) != 0)
    }

    /// Number of bits the adapter returned, including padding in the last byte of each reply.
    pub fn len(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Unpack `out.len()` TDO bits starting at bit `skip` of `reply` into `out`, one bit per byte.
/// Bits past the end of `reply` are written as zero.
pub fn copy_bits(reply: &[u8], skip: usize, out: &mut [u8]) {
    for (i, bit) in out.iter_mut().enumerate() {
        let offset = skip + i;
        *bit = reply
            .get(offset / 8)
            .map_or(0, |byte| (byte >> (offset % 8)) & 1);
    }
}
