//! Deferred TAP operations and the queues that carry them between the host and the cable.
//!
//! The host owns both queues.  A cable reads the pending queue front to back when it is told to
//! flush, and commits one `Completed` entry for every operation whose result the host wants to
//! see, in submission order.
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Pod signals a host may ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Trst,
    Srst,
    Tck,
    Tms,
    Tdi,
    Tdo,
}

/// A TAP operation queued for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Clock `count` steps with fixed TMS and TDI.
    Clock { tms: bool, tdi: bool, count: usize },
    /// Read the TDO level at this point in the sequence.
    GetTdo,
    /// Read the state of a pod signal.
    GetSignal(Signal),
    /// Shift `input` (one bit per byte, non-zero is high) through TDI with TMS low.  When
    /// `capture` is set the TDO bits are returned in a `Completed::Transfer`.
    Transfer { input: Vec<u8>, capture: bool },
}

impl Operation {
    /// Number of TAP steps this operation adds to the stream.
    pub fn steps(&self) -> usize {
        match self {
            Operation::Clock { count, .. } => *count,
            Operation::Transfer { input, .. } => input.len(),
            Operation::GetTdo | Operation::GetSignal(_) => 0,
        }
    }

    /// Whether executing this operation commits a `Completed` entry.
    pub fn has_result(&self) -> bool {
        match self {
            Operation::GetTdo | Operation::GetSignal(_) => true,
            Operation::Transfer { capture, .. } => *capture,
            Operation::Clock { .. } => false,
        }
    }
}

/// The result of an observable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completed {
    Tdo(bool),
    /// `value` is `None` when the cable can't report the signal.
    Signal { signal: Signal, value: Option<bool> },
    /// TDO bits, one per byte.
    Transfer { output: Vec<u8> },
}

/// Operations waiting to be executed.
pub trait PendingQueue {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look at the operation `index` places behind the head without removing it.
    fn peek(&self, index: usize) -> Option<&Operation>;

    /// Remove and return the head.
    fn next_pending(&mut self) -> Option<Operation>;
}

/// Results handed back to the host.
pub trait CompletedQueue {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Number of results that can be committed before the queue is full.
    fn room(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    fn commit_completed(&mut self, done: Completed) -> Result<()>;
}

/// Fixed capacity FIFO backed by a slot arena.  `head` indexes the oldest entry and the
/// occupied slots wrap around the end of the arena.
#[derive(Debug)]
pub struct OperationRing<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> OperationRing<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: usize) -> usize {
        (self.head + index) % self.slots.len()
    }

    pub fn push_back(&mut self, item: T) -> Result<()> {
        if self.len == self.slots.len() {
            return Err(Error::QueueFull {
                capacity: self.slots.len(),
            });
        }
        let slot = self.slot(self.len);
        self.slots[slot] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.slot(index)].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

impl PendingQueue for OperationRing<Operation> {
    fn len(&self) -> usize {
        self.len
    }

    fn peek(&self, index: usize) -> Option<&Operation> {
        self.get(index)
    }

    fn next_pending(&mut self) -> Option<Operation> {
        self.pop_front()
    }
}

impl CompletedQueue for OperationRing<Completed> {
    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn commit_completed(&mut self, done: Completed) -> Result<()> {
        self.push_back(done)
    }
}
