//! Bulk transfers to and from the adapter.  Every exchange is one write of an outbound frame
//! followed by one read of an inbound frame.
use core::fmt::Write;
use core::time::Duration;

use alloc::boxed::Box;
use alloc::string::String;

use crate::error::{Direction, Error, Result};

pub const VENDOR_ID: u16 = 0x03eb;
pub const PRODUCT_ID: u16 = 0x204f;

pub const WRITE_ENDPOINT: u8 = 0x02;
pub const READ_ENDPOINT: u8 = 0x81;

pub const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Size of both the outbound and the inbound frame.
pub const FRAME_SIZE: usize = 64;

/// Command in the low nibble of the first outbound byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Shift packed TMS/TDI steps.  The high nibble holds the step count modulo 4.
    TapOutput = 0x0,
    SetTrst = 0x1,
    SetSrst = 0x2,
    ReadInput = 0x3,
    TapOutputEmu = 0x4,
    SetDelay = 0x5,
}

impl Opcode {
    /// Header byte for a frame carrying `steps` packed steps.
    pub fn header(self, steps: usize) -> u8 {
        self as u8 | ((steps % 4) as u8) << 4
    }
}

/// Connection parameters for the adapter.
#[derive(Debug, Clone)]
pub struct Config {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub write_endpoint: u8,
    pub read_endpoint: u8,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            interface: 0,
            write_endpoint: WRITE_ENDPOINT,
            read_endpoint: READ_ENDPOINT,
            timeout: USB_TIMEOUT,
        }
    }
}

/// Builder to create a [Config] and override individual fields
///
/// # Example
///
/// ```
/// use opendous_jtag::usb::Builder;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .product_id(0x2050)
///     .timeout(Duration::from_millis(200))
///     .build();
/// assert_eq!(config.vendor_id, 0x03eb);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn vendor_id(mut self, vid: u16) -> Self {
        self.config.vendor_id = vid;
        self
    }

    pub fn product_id(mut self, pid: u16) -> Self {
        self.config.product_id = pid;
        self
    }

    pub fn interface(mut self, interface: u8) -> Self {
        self.config.interface = interface;
        self
    }

    /// Set the read and write timeout of each bulk transfer
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// A blocking bulk pipe to the adapter.  Both calls return the number of bytes actually
/// transferred.
pub trait Transport {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize>;
    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write_bulk(data)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_bulk(buf)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write_bulk(data)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_bulk(buf)
    }
}

/// libusb connection to an adapter.
#[cfg(feature = "std")]
pub struct UsbTransport {
    device: rusb::DeviceHandle<rusb::GlobalContext>,
    config: Config,
}

#[cfg(feature = "std")]
impl UsbTransport {
    /// Open the first adapter matching the configured VID/PID and claim its interface.
    pub fn open(config: &Config) -> Result<Self> {
        let mut device = rusb::open_device_with_vid_pid(config.vendor_id, config.product_id)
            .ok_or(Error::NotFound)?;
        // Not supported on every platform
        let _ = device.set_auto_detach_kernel_driver(true);
        device.claim_interface(config.interface)?;
        log::info!(
            "Opened opendous adapter {:04x}:{:04x}",
            config.vendor_id,
            config.product_id
        );

        Ok(Self {
            device,
            config: config.clone(),
        })
    }
}

#[cfg(feature = "std")]
impl Transport for UsbTransport {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        let wr = self
            .device
            .write_bulk(self.config.write_endpoint, data, self.config.timeout)?;
        Ok(wr)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rd = self
            .device
            .read_bulk(self.config.read_endpoint, buf, self.config.timeout)?;
        Ok(rd)
    }
}

#[cfg(feature = "std")]
impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.device.release_interface(self.config.interface);
    }
}

/// Transfer counters, kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Completed write/read exchanges
    pub messages: u64,
    /// TAP steps sent, on both the immediate and the scheduled path
    pub steps: u64,
    /// Scheduled flush cycles
    pub flushes: u64,
}

/// The two frames shared with the transport, and the exchanges built on them.
pub struct Link<T> {
    transport: T,
    out: [u8; FRAME_SIZE],
    input: [u8; FRAME_SIZE],
    stats: TransferStats,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            out: [0; FRAME_SIZE],
            input: [0; FRAME_SIZE],
            stats: TransferStats::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    /// The outbound frame, to be filled before calling `write` or `message`.
    pub fn out_frame(&mut self) -> &mut [u8; FRAME_SIZE] {
        &mut self.out
    }

    /// The inbound frame as left by the last `read`.
    pub fn in_frame(&self) -> &[u8; FRAME_SIZE] {
        &self.input
    }

    /// Write the first `len` bytes of the outbound frame.
    pub fn write(&mut self, len: usize) -> Result<usize> {
        if len > FRAME_SIZE {
            log::error!("illegal write length {} (max={})", len, FRAME_SIZE);
            return Err(Error::FrameTooLarge {
                len,
                max: FRAME_SIZE,
            });
        }
        log_frame("out", &self.out[..len]);
        let wr = self.transport.write_bulk(&self.out[..len])?;
        log::trace!("wrote {} of {} bytes", wr, len);
        Ok(wr)
    }

    /// Read one inbound frame.
    pub fn read(&mut self) -> Result<usize> {
        let rd = self.transport.read_bulk(&mut self.input)?;
        log_frame("in", &self.input[..rd.min(FRAME_SIZE)]);
        Ok(rd)
    }

    /// Write `out_len` bytes, then read a reply that must be exactly `in_len` bytes long.
    pub fn message(&mut self, out_len: usize, in_len: usize) -> Result<&[u8]> {
        let wr = self.write(out_len)?;
        if wr != out_len {
            log::error!("bulk write failed (requested={}, result={})", out_len, wr);
            return Err(Error::ShortTransfer {
                direction: Direction::Out,
                expected: out_len,
                actual: wr,
            });
        }

        let rd = self.read()?;
        if rd != in_len {
            log::error!("bulk read failed (requested={}, result={})", in_len, rd);
            return Err(Error::ShortTransfer {
                direction: Direction::In,
                expected: in_len,
                actual: rd,
            });
        }

        self.stats.messages += 1;
        Ok(&self.input[..in_len])
    }

    /// Send a two byte command and return the single byte the adapter answers with.
    pub fn simple_command(&mut self, opcode: Opcode, data: u8) -> Result<u8> {
        log::debug!("simple command {:#04x} {:#04x}", opcode as u8, data);
        self.out[0] = opcode as u8;
        self.out[1] = data;
        let reply = self.message(2, 1)?;
        Ok(reply[0])
    }
}

const BYTES_PER_LINE: usize = 16;

fn log_frame(label: &str, buf: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    for (i, chunk) in buf.chunks(BYTES_PER_LINE).enumerate() {
        let mut line = String::new();
        let _ = write!(line, "{:04x}", i * BYTES_PER_LINE);
        for b in chunk {
            let _ = write!(line, " {:02x}", b);
        }
        log::trace!("{}: {}", label, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Scripted;
    use alloc::vec;

    #[test]
    fn header_encodes_remainder() {
        assert_eq!(Opcode::TapOutput.header(252), 0x00);
        assert_eq!(Opcode::TapOutput.header(9), 0x10);
        assert_eq!(Opcode::TapOutput.header(7), 0x30);
        assert_eq!(Opcode::SetSrst.header(0), 0x02);
    }

    #[test]
    fn message_round_trip() {
        let mut link = Link::new(Scripted::new(vec![vec![0xaa, 0x55]]));
        link.out_frame()[..3].copy_from_slice(&[0, 1, 2]);
        let reply = link.message(3, 2).unwrap();
        assert_eq!(reply, &[0xaa, 0x55]);
        assert_eq!(link.transport().writes, vec![vec![0, 1, 2]]);
        assert_eq!(link.stats().messages, 1);
    }

    #[test]
    fn oversized_write_is_refused() {
        let mut link = Link::new(Scripted::new(vec![]));
        let err = link.write(FRAME_SIZE + 1).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len: 65, max: 64 }));
        assert!(link.transport().writes.is_empty());
    }

    #[test]
    fn short_write_skips_read() {
        let mut scripted = Scripted::new(vec![vec![0]]);
        scripted.short_write = true;
        let mut link = Link::new(scripted);
        let err = link.message(4, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortTransfer {
                direction: Direction::Out,
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(link.transport().reads, 0);
    }

    #[test]
    fn short_read_is_a_failure() {
        let mut link = Link::new(Scripted::new(vec![vec![1, 2, 3]]));
        let err = link.message(2, 4).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortTransfer {
                direction: Direction::In,
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(link.stats().messages, 0);
    }

    #[test]
    fn simple_command_frame() {
        let mut link = Link::new(Scripted::new(vec![vec![0x7e]]));
        assert_eq!(link.simple_command(Opcode::ReadInput, 0).unwrap(), 0x7e);
        assert_eq!(link.transport().writes, vec![vec![0x03, 0x00]]);
    }

    #[test]
    fn builder_overrides() {
        let config = Builder::new()
            .vendor_id(0x1234)
            .interface(1)
            .timeout(Duration::from_millis(5))
            .build();
        assert_eq!(config.vendor_id, 0x1234);
        assert_eq!(config.product_id, PRODUCT_ID);
        assert_eq!(config.interface, 1);
        assert_eq!(config.write_endpoint, WRITE_ENDPOINT);
        assert_eq!(config.read_endpoint, READ_ENDPOINT);
        assert_eq!(config.timeout, Duration::from_millis(5));
    }
}
