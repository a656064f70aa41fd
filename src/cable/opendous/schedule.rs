//! Batched execution of queued operations.
//!
//! A flush cycle takes a window from the head of the pending queue, packs all of its steps into
//! the schedule buffer, sends that in as many frames as needed and then walks the window a
//! second time to pick each operation's result out of the returned TDO stream.
use alloc::vec;

use super::Opendous;
use crate::cable::Cable;
use crate::error::{Error, Result};
use crate::queue::{Completed, CompletedQueue, Operation, PendingQueue, Signal};
use crate::tap::BitStep;
use crate::usb::{Opcode, Transport, FRAME_SIZE};

/// Largest number of packed step bytes sent in one frame.
const CHUNK_BYTES: usize = FRAME_SIZE - 2;

/// What the adapter reports for a pod signal.  Only TRST is known.
fn signal_state(signal: Signal) -> Option<bool> {
    match signal {
        Signal::Trst => Some(true),
        _ => None,
    }
}

impl<T: Transport> Opendous<T> {
    /// Run one flush cycle over the head of `pending`.  Returns the number of steps executed.
    pub(super) fn flush_cycle(
        &mut self,
        pending: &mut dyn PendingQueue,
        completed: &mut dyn CompletedQueue,
    ) -> Result<usize> {
        let window = self.accumulate(pending, completed.room())?;
        if window == 0 {
            // Nothing has been sent yet, so the head can stay queued until the host makes room
            if pending.peek(0).is_some_and(Operation::has_result) && completed.room() == 0 {
                return Err(Error::QueueFull {
                    capacity: completed.capacity(),
                });
            }
            return self.run_oversized(pending, completed);
        }

        self.send_schedule()?;
        self.resolve(window, pending, completed)
    }

    /// Pack the operations at the head of `pending` into the schedule buffer, stopping before
    /// the first one that doesn't fit or whose result would not fit in `room` more completed
    /// entries.  Nothing is removed from the queue.
    fn accumulate(&mut self, pending: &dyn PendingQueue, room: usize) -> Result<usize> {
        let n = pending.len();
        let mut window = 0;
        let mut results = 0;

        while window < n {
            let Some(op) = pending.peek(window) else {
                break;
            };
            if op.steps() > self.schedule.remaining() {
                break;
            }
            if op.has_result() {
                if results == room {
                    break;
                }
                results += 1;
            }

            match op {
                Operation::Clock { tms, tdi, count } => {
                    for _ in 0..*count {
                        self.schedule.append(BitStep::new(*tms, *tdi))?;
                    }
                }
                Operation::Transfer { input, .. } => {
                    for bit in input {
                        self.schedule.append(BitStep::new(false, *bit != 0))?;
                    }
                }
                Operation::GetTdo | Operation::GetSignal(_) => {}
            }
            window += 1;
        }

        log::debug!(
            "scheduled {} of {} operations, {} steps",
            window,
            n,
            self.schedule.len()
        );
        Ok(window)
    }

    /// Send the schedule buffer, one full frame at a time, and collect the TDO bits of every
    /// frame in order.
    fn send_schedule(&mut self) -> Result<()> {
        let mut remaining = self.schedule.len();
        let mut offset = 0;
        self.tdo.clear();

        while remaining > 0 {
            let steps = remaining.min(CHUNK_BYTES * 4);
            let bytes = steps.div_ceil(4);
            let reply_len = steps.div_ceil(8);

            let out = self.link.out_frame();
            out[0] = Opcode::TapOutput.header(steps);
            out[1..=bytes].copy_from_slice(&self.schedule.as_bytes()[offset..offset + bytes]);
            let reply = self.link.message(bytes + 1, reply_len)?;
            self.tdo.extend(reply);

            offset += bytes;
            remaining -= steps;
            self.link.stats_mut().steps += steps as u64;
        }

        self.schedule.clear();
        self.link.stats_mut().flushes += 1;
        Ok(())
    }

    /// Take `window` operations off `pending` and commit the results of the observable ones.
    fn resolve(
        &mut self,
        window: usize,
        pending: &mut dyn PendingQueue,
        completed: &mut dyn CompletedQueue,
    ) -> Result<usize> {
        let mut offset = 0;

        for _ in 0..window {
            let Some(op) = pending.next_pending() else {
                break;
            };

            match op {
                Operation::GetTdo => {
                    completed.commit_completed(Completed::Tdo(self.tdo_at(offset)))?;
                }
                Operation::GetSignal(signal) => {
                    let value = signal_state(signal);
                    completed.commit_completed(Completed::Signal { signal, value })?;
                }
                Operation::Clock { count, .. } => offset += count,
                Operation::Transfer { input, capture } => {
                    if capture {
                        let output = (0..input.len())
                            .map(|k| self.tdo.bit(offset + k) as u8)
                            .collect();
                        completed.commit_completed(Completed::Transfer { output })?;
                    }
                    offset += input.len();
                }
            }
        }

        self.last_tdo = self.tdo_at(offset);
        Ok(offset)
    }

    /// TDO at `offset` of the returned stream.  Past the returned data the adapter reported
    /// nothing new, so the last known level stands.
    fn tdo_at(&self, offset: usize) -> bool {
        if offset < self.tdo.len() {
            self.tdo.bit(offset)
        } else {
            self.last_tdo
        }
    }

    /// The head operation is larger than the whole schedule buffer.  Execute it through the
    /// direct path, which has no length limit.
    fn run_oversized(
        &mut self,
        pending: &mut dyn PendingQueue,
        completed: &mut dyn CompletedQueue,
    ) -> Result<usize> {
        let Some(op) = pending.next_pending() else {
            return Ok(0);
        };
        let steps = op.steps();
        log::warn!(
            "operation of {} steps exceeds the schedule buffer, executing directly",
            steps
        );

        match op {
            Operation::Clock { tms, tdi, count } => self.clock(tms, tdi, count)?,
            Operation::Transfer { input, capture } => {
                if capture {
                    let mut output = vec![0; input.len()];
                    self.transfer(&input, Some(&mut output))?;
                    completed.commit_completed(Completed::Transfer { output })?;
                } else {
                    self.transfer(&input, None)?;
                }
            }
            Operation::GetTdo => completed.commit_completed(Completed::Tdo(self.last_tdo))?,
            Operation::GetSignal(signal) => {
                let value = signal_state(signal);
                completed.commit_completed(Completed::Signal { signal, value })?;
            }
        }
        Ok(steps)
    }
}
