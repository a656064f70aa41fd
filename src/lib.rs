//! This crate drives JTAG scan chains through Opendous based USB adapters.  The adapter takes
//! packed TMS/TDI steps in fixed size bulk frames and answers with the TDO bits it sampled.
//!
//! At the lowest level, `usb::Link` performs one write/read exchange with the adapter over any
//! `usb::Transport`; a libusb transport is provided with the `std` feature.  `tap` packs steps
//! into the adapter's wire format four to a byte.
//!
//! The `Cable` trait is what a host JTAG layer talks to.  Direct calls (`clock`, `transfer`,
//! `reset`) execute before they return.  Operations can also be queued on a
//! `queue::PendingQueue` and executed in batches with `flush`, which packs as many of them as
//! fit into a single transfer and hands their results back through a `queue::CompletedQueue`
//! in submission order.
//!
//! # Example
//! ```no_run
//! use opendous_jtag::cable::{Cable, FlushAmount};
//! use opendous_jtag::cable::opendous::Opendous;
//! use opendous_jtag::queue::{Completed, Operation, OperationRing};
//! use opendous_jtag::usb::Config;
//!
//! let mut cable = Opendous::open(&Config::default()).expect("open");
//! let mut pending = OperationRing::new(64);
//! let mut done = OperationRing::<Completed>::new(64);
//!
//! // Test-Logic-Reset, then Shift-DR
//! pending.push_back(Operation::Clock { tms: true, tdi: false, count: 5 }).unwrap();
//! for tms in [false, true, false, false] {
//!     pending.push_back(Operation::Clock { tms, tdi: false, count: 1 }).unwrap();
//! }
//! pending.push_back(Operation::Transfer { input: vec![0; 32], capture: true }).unwrap();
//! cable.flush(FlushAmount::Complete, &mut pending, &mut done).expect("flush");
//!
//! if let Some(Completed::Transfer { output }) = done.pop_front() {
//!     let idcode = output.iter().rev().fold(0u32, |acc, bit| acc << 1 | *bit as u32);
//!     println!("idcode {:08x}", idcode);
//! }
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod cable;
pub mod error;
pub mod queue;
pub mod tap;
pub mod usb;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
