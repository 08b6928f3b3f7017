//! Packet buffer with header and trailer room
//!
//! A `PacketBuffer` owns a fixed-size backing region and exposes a window
//! into it. Protocol layers grow the window at the front to prepend headers,
//! shrink it at the front to strip them, and do the same at the back for
//! link-layer padding. The backing region never grows after construction.

use alloc::vec;
use alloc::vec::Vec;

use super::ethernet::{ETHERNET_HEADER_SIZE, ETHERNET_MIN_TRANSPORT_UNIT};
use super::NetError;

/// Space reserved in front of freshly built payloads.
///
/// Large enough for an Ethernet header, an IPv4 header and an ICMP header.
pub const BUF_HEADROOM: usize = 64;

/// Space reserved behind freshly built payloads, enough to pad any payload
/// up to the Ethernet minimum.
pub const BUF_TAILROOM: usize = ETHERNET_MIN_TRANSPORT_UNIT;

/// Fixed-capacity byte buffer with a movable data window
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    storage: Vec<u8>,
    /// Offset of the first data byte within `storage`
    start: usize,
    /// Number of data bytes
    len: usize,
}

impl PacketBuffer {
    /// Create a zeroed buffer of `len` data bytes with default head and tail room
    pub fn new(len: usize) -> Self {
        PacketBuffer {
            storage: vec![0; BUF_HEADROOM + len + BUF_TAILROOM],
            start: BUF_HEADROOM,
            len,
        }
    }

    /// Create a buffer holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::new(data.len());
        buf.data_mut().copy_from_slice(data);
        buf
    }

    /// Create an empty receive buffer able to hold `capacity` bytes.
    ///
    /// Receive buffers have no headroom; drivers fill them with [`load`](Self::load).
    pub fn with_capacity(capacity: usize) -> Self {
        PacketBuffer {
            storage: vec![0; capacity],
            start: 0,
            len: 0,
        }
    }

    /// Receive buffer sized for one maximal Ethernet frame
    pub fn for_rx() -> Self {
        Self::with_capacity(super::ethernet::ETHERNET_MTU + ETHERNET_HEADER_SIZE)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total size of the backing region
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.start..self.start + self.len]
    }

    /// Replace the contents with a received frame, resetting the window to
    /// the start of the backing region.
    pub fn load(&mut self, frame: &[u8]) -> Result<(), NetError> {
        if frame.len() > self.storage.len() {
            return Err(NetError::BufferOverflow);
        }
        self.start = 0;
        self.len = frame.len();
        self.storage[..frame.len()].copy_from_slice(frame);
        Ok(())
    }

    /// Empty the window without touching the backing region
    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    /// Grow the window by `n` zeroed bytes at the front
    pub fn add_header(&mut self, n: usize) -> Result<(), NetError> {
        if n > self.start {
            return Err(NetError::BufferOverflow);
        }
        self.start -= n;
        self.len += n;
        self.storage[self.start..self.start + n].fill(0);
        Ok(())
    }

    /// Shrink the window by `n` bytes at the front
    pub fn remove_header(&mut self, n: usize) -> Result<(), NetError> {
        if n > self.len {
            return Err(NetError::BufferUnderflow);
        }
        self.start += n;
        self.len -= n;
        Ok(())
    }

    /// Grow the window by `n` zeroed bytes at the back
    pub fn add_padding(&mut self, n: usize) -> Result<(), NetError> {
        let end = self.start + self.len;
        if end + n > self.storage.len() {
            return Err(NetError::BufferOverflow);
        }
        self.storage[end..end + n].fill(0);
        self.len += n;
        Ok(())
    }

    /// Shrink the window by `n` bytes at the back
    pub fn remove_padding(&mut self, n: usize) -> Result<(), NetError> {
        if n > self.len {
            return Err(NetError::BufferUnderflow);
        }
        self.len -= n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_prepend_and_strip() {
        let mut buf = PacketBuffer::from_slice(&[1, 2, 3]);
        buf.add_header(2).unwrap();
        assert_eq!(buf.data(), &[0, 0, 1, 2, 3]);
        buf.data_mut()[0] = 9;
        buf.remove_header(1).unwrap();
        assert_eq!(buf.data(), &[0, 1, 2, 3]);
    }

    #[test]
    fn header_prepend_fails_without_headroom() {
        let mut buf = PacketBuffer::new(4);
        assert!(buf.add_header(BUF_HEADROOM).is_ok());
        assert_eq!(buf.add_header(1), Err(NetError::BufferOverflow));
        assert_eq!(buf.len(), BUF_HEADROOM + 4);
    }

    #[test]
    fn padding_is_zeroed_and_bounded() {
        let mut buf = PacketBuffer::from_slice(&[0xAA; 10]);
        buf.add_padding(BUF_TAILROOM).unwrap();
        assert_eq!(buf.len(), 10 + BUF_TAILROOM);
        assert!(buf.data()[10..].iter().all(|&b| b == 0));
        assert_eq!(buf.add_padding(1), Err(NetError::BufferOverflow));

        buf.remove_padding(BUF_TAILROOM).unwrap();
        assert_eq!(buf.data(), &[0xAA; 10]);
    }

    #[test]
    fn removing_more_than_len_fails() {
        let mut buf = PacketBuffer::from_slice(&[1, 2]);
        assert_eq!(buf.remove_header(3), Err(NetError::BufferUnderflow));
        assert_eq!(buf.remove_padding(3), Err(NetError::BufferUnderflow));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn load_resets_window() {
        let mut buf = PacketBuffer::with_capacity(8);
        buf.load(&[1, 2, 3, 4]).unwrap();
        buf.remove_header(2).unwrap();
        buf.load(&[5, 6, 7]).unwrap();
        assert_eq!(buf.data(), &[5, 6, 7]);
        assert_eq!(buf.load(&[0; 9]), Err(NetError::BufferOverflow));
    }
}
