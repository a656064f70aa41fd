use alloc::string::String;
use core::fmt;

/// Direction of a bulk transfer, as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "write"),
            Direction::In => write!(f, "read"),
        }
    }
}

/// Errors reported by the cable driver.  Nothing in this crate retries on error; the caller
/// decides whether to abort or reopen the connection.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame of {len} bytes exceeds the {max} byte transfer size")]
    FrameTooLarge { len: usize, max: usize },
    #[error("bulk {direction} transferred {actual} bytes, expected {expected}")]
    ShortTransfer {
        direction: Direction,
        expected: usize,
        actual: usize,
    },
    #[error("tap buffer overflow, capacity is {capacity} steps")]
    Overflow { capacity: usize },
    #[error("failed to allocate a tap buffer of {steps} steps")]
    Allocation { steps: usize },
    #[error("completed queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },
    #[error("output buffer holds {got} bits, {needed} needed")]
    OutputTooShort { needed: usize, got: usize },
    #[error("no opendous adapter attached")]
    NotFound,
    #[error("unknown cable {0}")]
    UnknownCable(String),
    #[cfg(feature = "std")]
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
