//! Transports standing in for the adapter in unit tests.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::error::Result;
use crate::usb::{Opcode, Transport};

/// Replays canned replies and records every write.
pub struct Scripted {
    pub writes: Vec<Vec<u8>>,
    pub reads: usize,
    pub short_write: bool,
    replies: VecDeque<Vec<u8>>,
}

impl Scripted {
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            writes: Vec::new(),
            reads: 0,
            short_write: false,
            replies: replies.into(),
        }
    }
}

impl Transport for Scripted {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        self.writes.push(data.to_vec());
        if self.short_write {
            Ok(data.len() - 1)
        } else {
            Ok(data.len())
        }
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reads += 1;
        let reply = self.replies.pop_front().unwrap_or_default();
        buf[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }
}

/// Behaves like an adapter whose TDO is wired to TDI through a shift register `delay` steps
/// long.  Simple commands are answered with `input_state`.
pub struct Loopback {
    pub delay: usize,
    pub input_state: u8,
    /// Every frame written, in order
    pub frames: Vec<Vec<u8>>,
    /// TDI of every step shifted so far
    pub history: Vec<bool>,
    /// Index of a message whose reply comes back one byte short
    pub short_reply_at: Option<usize>,
    pending: Vec<u8>,
}

impl Loopback {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            input_state: 0,
            frames: Vec::new(),
            history: Vec::new(),
            short_reply_at: None,
            pending: Vec::new(),
        }
    }

    /// Frames carrying TAP steps.
    pub fn tap_frames(&self) -> Vec<&Vec<u8>> {
        self.frames
            .iter()
            .filter(|f| f[0] & 0x0f == Opcode::TapOutput as u8)
            .collect()
    }

    pub fn reset_log(&mut self) {
        self.frames.clear();
    }

    fn shift(&mut self, frame: &[u8]) -> Vec<u8> {
        let remainder = (frame[0] >> 4) as usize;
        let mut steps = (frame.len() - 1) * 4;
        if remainder != 0 {
            steps -= 4 - remainder;
        }

        let mut reply = alloc::vec![0u8; steps.div_ceil(8)];
        for i in 0..steps {
            let tdi = (frame[1 + i / 4] >> ((i % 4) * 2)) & 1 != 0;
            self.history.push(tdi);
            let global = self.history.len() - 1;
            let tdo = global >= self.delay && self.history[global - self.delay];
            if tdo {
                reply[i / 8] |= 1 << (i % 8);
            }
        }
        reply
    }
}

impl Transport for Loopback {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        self.frames.push(data.to_vec());
        self.pending = if data[0] & 0x0f == Opcode::TapOutput as u8 {
            self.shift(data)
        } else {
            alloc::vec![self.input_state]
        };
        Ok(data.len())
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut len = self.pending.len();
        if self.short_reply_at == Some(self.frames.len() - 1) {
            len -= 1;
        }
        buf[..len].copy_from_slice(&self.pending[..len]);
        Ok(len)
    }
}
