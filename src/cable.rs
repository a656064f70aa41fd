//! Implementations for JTAG hardware adapters live here.  Hardware adapters should implement the
//! `Cable` trait.
pub mod opendous;

#[cfg(feature = "std")]
use alloc::boxed::Box;

use crate::error::Result;
use crate::queue::{CompletedQueue, PendingQueue};

/// How much of the pending queue a flush has to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAmount {
    /// The caller can live with operations staying queued.
    Optional,
    /// Execute only if no results are waiting to be consumed.
    UntilOutputNeeded,
    /// Execute everything that is queued.
    Complete,
}

pub trait Cable {
    /// Drive the TRST and SRST lines.  `Some(true)` asserts a line, `Some(false)` releases it
    /// and `None` leaves it as it is.
    fn reset(&mut self, trst: Option<bool>, srst: Option<bool>) -> Result<()>;
    /// Request a TCK frequency in hertz.
    fn set_frequency(&mut self, frequency: u32);
    /// Clock `count` steps with the given TMS and TDI levels.  Returns once all of them have
    /// been sent.
    fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()>;
    /// TDO as sampled by the most recent exchange with the adapter.
    fn get_tdo(&mut self) -> bool;
    /// Shift `input` through TDI with TMS low, one bit per byte.  If `output` is given the TDO
    /// bits are written to it, one per byte.  Returns the number of bits shifted.
    fn transfer(&mut self, input: &[u8], output: Option<&mut [u8]>) -> Result<usize>;
    /// Execute queued operations from `pending` and commit their results to `completed`.
    fn flush(
        &mut self,
        amount: FlushAmount,
        pending: &mut dyn PendingQueue,
        completed: &mut dyn CompletedQueue,
    ) -> Result<()>;
}

/// Open a cable by name.  `clock` is the requested TCK frequency in hertz.
#[cfg(feature = "std")]
pub fn new_from_string(name: &str, clock: u32) -> Result<Box<dyn Cable>> {
    use crate::error::Error;
    use crate::usb::Config;

    match name {
        "opendous" => {
            let mut cable = opendous::Opendous::open(&Config::default())?;
            cable.set_frequency(clock);
            Ok(Box::new(cable))
        }
        _ => Err(Error::UnknownCable(name.into())),
    }
}
