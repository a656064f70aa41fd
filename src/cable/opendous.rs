//! Implement the `Cable` trait for Opendous based adapters
//!
//! The adapter takes packed TMS/TDI steps in 64 byte bulk frames and answers every frame with
//! the TDO bits it sampled.  Direct calls (`clock`, `transfer`) go through a small buffer that
//! is sent as soon as it fills and once more before returning.  Queued operations are packed
//! into a much larger schedule buffer at flush time, sent in as few frames as possible, and
//! their results are picked out of the returned bit stream afterwards.
mod schedule;

use crate::cable::{Cable, FlushAmount};
use crate::error::{Error, Result};
use crate::queue::{CompletedQueue, PendingQueue};
use crate::tap::{
    copy_bits, BitStep, Bitstream, PackedBuffer, SCHEDULE_BUFFER_STEPS, TAP_BUFFER_STEPS,
};
use crate::usb::{Link, Opcode, TransferStats, Transport};

#[cfg(feature = "std")]
use crate::usb::{Config, UsbTransport};

/// Highest TCK frequency the adapter accepts, in kHz.
pub const MAX_SPEED_KHZ: u32 = 4000;

const DEFAULT_FREQUENCY: u32 = 4_000_000;

pub struct Opendous<T> {
    link: Link<T>,
    // steps for direct calls, sent as soon as it fills
    tap: PackedBuffer,
    // steps of queued operations, sent at flush time
    schedule: PackedBuffer,
    // TDO returned for the schedule buffer
    tdo: Bitstream,
    last_tdo: bool,
}

#[cfg(feature = "std")]
impl Opendous<UsbTransport> {
    /// Open the adapter described by `config` and bring it into a known state.
    pub fn open(config: &Config) -> Result<Self> {
        let transport = UsbTransport::open(config)?;
        Self::new(transport)
    }
}

impl<T: Transport> Opendous<T> {
    /// Create a cable on top of an already opened transport.  Both reset lines are released.
    pub fn new(transport: T) -> Result<Self> {
        let mut cable = Self {
            link: Link::new(transport),
            tap: PackedBuffer::with_capacity(TAP_BUFFER_STEPS)?,
            schedule: PackedBuffer::with_capacity(SCHEDULE_BUFFER_STEPS)?,
            tdo: Bitstream::new(),
            last_tdo: false,
        };

        log::debug!("opendous JTAG interface ready");
        cable.set_frequency(DEFAULT_FREQUENCY);
        cable.reset(Some(false), Some(false))?;
        Ok(cable)
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    pub fn stats(&self) -> TransferStats {
        *self.link.stats()
    }

    /// Read the state of the adapter's input pins.
    pub fn read_input(&mut self) -> Result<u8> {
        self.link.simple_command(Opcode::ReadInput, 0)
    }

    /// Send the direct buffer.  On success the buffer is emptied and `last_tdo` updated; on
    /// failure the steps stay in the buffer.
    fn tap_execute(&mut self) -> Result<()> {
        let steps = self.tap.len();
        if steps == 0 {
            return Ok(());
        }

        let bytes = steps.div_ceil(4);
        let reply_len = steps.div_ceil(8);
        let out = self.link.out_frame();
        out[0] = Opcode::TapOutput.header(steps);
        out[1..=bytes].copy_from_slice(self.tap.as_bytes());

        log::debug!("tap execute: {} steps", steps);
        let reply = self.link.message(bytes + 1, reply_len)?;
        // The adapter reports TDO from before the final clock edge
        self.last_tdo = reply[reply_len - 1] & (1 << (steps % 8)) != 0;

        self.link.stats_mut().steps += steps as u64;
        self.tap.clear();
        Ok(())
    }

    /// Send the direct buffer and copy the TDO of its last `ours` steps into `out`.
    fn execute_into(&mut self, ours: usize, out: Option<&mut [u8]>) -> Result<()> {
        let skip = self.tap.len() - ours;
        self.tap_execute()?;
        if let Some(out) = out {
            copy_bits(self.link.in_frame(), skip, out);
        }
        Ok(())
    }
}

impl<T: Transport> Cable for Opendous<T> {
    fn reset(&mut self, trst: Option<bool>, srst: Option<bool>) -> Result<()> {
        log::debug!("trst={:?}, srst={:?}", trst, srst);

        // Signals are active low
        if let Some(asserted) = trst {
            self.link.simple_command(Opcode::SetTrst, !asserted as u8)?;
        }
        if let Some(asserted) = srst {
            self.link.simple_command(Opcode::SetSrst, !asserted as u8)?;
        }
        Ok(())
    }

    fn set_frequency(&mut self, frequency: u32) {
        let speed = frequency / 1000;
        if (1..=MAX_SPEED_KHZ).contains(&speed) {
            // The adapter has no rate control, TCK runs as fast as the firmware allows
            log::debug!("requested speed {}kHz", speed);
        } else {
            log::warn!(
                "Requested speed {}kHz exceeds maximum of {}kHz, ignored",
                speed,
                MAX_SPEED_KHZ
            );
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        for _ in 0..count {
            if self.tap.is_full() {
                self.tap_execute()?;
            }
            self.tap.append(BitStep::new(tms, tdi))?;
        }
        self.tap_execute()
    }

    fn get_tdo(&mut self) -> bool {
        self.last_tdo
    }

    fn transfer(&mut self, input: &[u8], mut output: Option<&mut [u8]>) -> Result<usize> {
        if let Some(out) = output.as_deref() {
            if out.len() < input.len() {
                return Err(Error::OutputTooShort {
                    needed: input.len(),
                    got: out.len(),
                });
            }
        }

        // `done` bits of `input` have been sent and their TDO copied out
        let mut done = 0;
        for (i, bit) in input.iter().enumerate() {
            if self.tap.is_full() {
                self.execute_into(i - done, output.as_deref_mut().map(|out| &mut out[done..i]))?;
                done = i;
            }
            self.tap.append(BitStep::new(false, *bit != 0))?;
        }

        if !self.tap.is_empty() {
            let len = input.len();
            self.execute_into(len - done, output.as_deref_mut().map(|out| &mut out[done..len]))?;
        }
        Ok(input.len())
    }

    fn flush(
        &mut self,
        amount: FlushAmount,
        pending: &mut dyn PendingQueue,
        completed: &mut dyn CompletedQueue,
    ) -> Result<()> {
        match amount {
            FlushAmount::Optional => return Ok(()),
            FlushAmount::UntilOutputNeeded if !completed.is_empty() => return Ok(()),
            _ => {}
        }

        self.schedule.clear();
        while !pending.is_empty() {
            self.flush_cycle(pending, completed)?;
        }

        let stats = self.link.stats();
        log::debug!(
            "flushed: {} messages, {} steps, {} cycles so far",
            stats.messages,
            stats.steps,
            stats.flushes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Loopback, Scripted};
    use alloc::vec;
    use alloc::vec::Vec;

    fn loopback(delay: usize) -> Opendous<Loopback> {
        let mut cable = Opendous::new(Loopback::new(delay)).unwrap();
        cable.transport_mut().reset_log();
        cable
    }

    #[test]
    fn init_releases_both_lines() {
        let cable = Opendous::new(Loopback::new(0)).unwrap();
        assert_eq!(cable.transport().frames, vec![vec![0x01, 1], vec![0x02, 1]]);
    }

    #[test]
    fn reset_inverts_polarity() {
        let mut cable = loopback(0);
        cable.reset(Some(false), Some(false)).unwrap();
        cable.reset(Some(true), None).unwrap();
        cable.reset(None, Some(true)).unwrap();
        cable.reset(None, None).unwrap();
        assert_eq!(
            cable.transport().frames,
            vec![vec![0x01, 1], vec![0x02, 1], vec![0x01, 0], vec![0x02, 0]]
        );
    }

    #[test]
    fn clock_executes_per_full_buffer() {
        let mut cable = loopback(0);
        cable.clock(true, false, 300).unwrap();

        let frames = cable.transport().tap_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 64);
        assert_eq!(frames[0][0], 0x00);
        assert!(frames[0][1..].iter().all(|b| *b == 0xaa));
        assert_eq!(frames[1].len(), 13);
        assert_eq!(frames[1][0], 0x00);
        assert!(cable.tap.is_empty());
        assert_eq!(cable.stats().steps, 300);
    }

    #[test]
    fn clock_of_exactly_one_buffer() {
        let mut cable = loopback(0);
        cable.clock(false, true, TAP_BUFFER_STEPS).unwrap();
        assert_eq!(cable.transport().tap_frames().len(), 1);

        cable.clock(false, true, 0).unwrap();
        assert_eq!(cable.transport().tap_frames().len(), 1);
    }

    #[test]
    fn clock_remainder_in_header() {
        let mut cable = loopback(0);
        cable.clock(true, true, 7).unwrap();
        assert_eq!(cable.transport().frames, vec![vec![0x30, 0xff, 0x3f]]);
    }

    #[test]
    fn shift_shows_one_step_lag() {
        let mut cable = loopback(1);
        let bits = [1, 0, 1, 1, 0, 0, 1, 0, 1];
        let mut out = [0u8; 9];
        assert_eq!(cable.transfer(&bits, Some(&mut out)).unwrap(), 9);
        assert_eq!(out, [0, 1, 0, 1, 1, 0, 0, 1, 0]);
        assert_eq!(cable.transport().frames[0][0], 0x10);
    }

    #[test]
    fn long_transfer_keeps_bit_order() {
        let mut cable = loopback(0);
        let bits: Vec<u8> = (0..600).map(|i| ((i * 7 + i / 3) % 2) as u8).collect();
        let mut out = vec![0u8; bits.len()];
        cable.transfer(&bits, Some(&mut out)).unwrap();
        assert_eq!(out, bits);
        assert_eq!(cable.transport().tap_frames().len(), 3);
    }

    #[test]
    fn transfer_without_output() {
        let mut cable = loopback(0);
        assert_eq!(cable.transfer(&[1; 260], None).unwrap(), 260);
        assert_eq!(cable.transport().history.len(), 260);
        assert!(cable.transport().history.iter().all(|b| *b));
    }

    #[test]
    fn transfer_rejects_short_output() {
        let mut cable = loopback(0);
        let mut out = [0u8; 2];
        let err = cable.transfer(&[1, 1, 1], Some(&mut out)).unwrap_err();
        assert!(matches!(err, Error::OutputTooShort { needed: 3, got: 2 }));
        assert!(cable.transport().frames.is_empty());
    }

    #[test]
    fn last_tdo_comes_from_bit_after_last_step() {
        let replies = vec![vec![1], vec![1], vec![0b0000_1000]];
        let mut cable = Opendous::new(Scripted::new(replies)).unwrap();
        assert!(!cable.get_tdo());
        cable.clock(false, false, 3).unwrap();
        assert!(cable.get_tdo());
    }

    #[test]
    fn failed_execute_keeps_steps() {
        let replies = vec![vec![1], vec![1], vec![]];
        let mut cable = Opendous::new(Scripted::new(replies)).unwrap();
        let err = cable.clock(true, false, 3).unwrap_err();
        assert!(matches!(err, Error::ShortTransfer { .. }));
        assert_eq!(cable.tap.len(), 3);
    }

    #[test]
    fn read_input_state() {
        let mut cable = loopback(0);
        cable.transport_mut().input_state = 0x5a;
        assert_eq!(cable.read_input().unwrap(), 0x5a);
        assert_eq!(cable.transport().frames, vec![vec![0x03, 0]]);
    }

    #[test]
    fn frequency_is_not_sent() {
        let mut cable = loopback(0);
        cable.set_frequency(1_000_000);
        cable.set_frequency(10_000_000);
        cable.set_frequency(500);
        assert!(cable.transport().frames.is_empty());
    }
}
