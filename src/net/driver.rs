//! Link-layer driver abstraction
//!
//! The stack never touches hardware directly. A NIC driver (e1000, VirtIO
//! net, a TAP device) implements [`Driver`] and is handed to the stack at
//! construction.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::buffer::PacketBuffer;

/// Raw frame transmit/receive primitives
pub trait Driver {
    /// Receive one frame into `buf`
    ///
    /// Returns the number of bytes received, or 0 when no frame is pending.
    fn recv(&mut self, buf: &mut PacketBuffer) -> usize;

    /// Transmit one complete Ethernet frame
    fn send(&mut self, frame: &[u8]) -> Result<(), &'static str>;
}

/// In-memory driver backed by two frame queues
///
/// Frames pushed with [`inject`](Self::inject) are returned by `recv`;
/// transmitted frames accumulate until taken with [`take_sent`](Self::take_sent).
#[derive(Debug, Default)]
pub struct MemoryDriver {
    rx_queue: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for reception
    pub fn inject(&mut self, frame: &[u8]) {
        self.rx_queue.push_back(frame.to_vec());
    }

    /// Frames transmitted so far
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Drain and return the transmitted frames
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.sent)
    }
}

impl Driver for MemoryDriver {
    fn recv(&mut self, buf: &mut PacketBuffer) -> usize {
        let Some(frame) = self.rx_queue.pop_front() else {
            return 0;
        };
        match buf.load(&frame) {
            Ok(()) => frame.len(),
            Err(e) => {
                log::warn!("NET: Dropping oversized frame ({} bytes): {}", frame.len(), e);
                buf.clear();
                0
            }
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), &'static str> {
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_come_back_in_order() {
        let mut driver = MemoryDriver::new();
        let mut buf = PacketBuffer::with_capacity(16);
        assert_eq!(driver.recv(&mut buf), 0);

        driver.inject(&[1, 2, 3]);
        driver.inject(&[4]);
        assert_eq!(driver.recv(&mut buf), 3);
        assert_eq!(buf.data(), &[1, 2, 3]);
        assert_eq!(driver.recv(&mut buf), 1);
        assert_eq!(buf.data(), &[4]);
        assert_eq!(driver.recv(&mut buf), 0);
    }

    #[test]
    fn oversized_frame_is_not_received() {
        let mut driver = MemoryDriver::new();
        let mut buf = PacketBuffer::with_capacity(4);
        driver.inject(&[0; 5]);
        assert_eq!(driver.recv(&mut buf), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn sent_frames_are_recorded() {
        let mut driver = MemoryDriver::new();
        driver.send(&[7, 7]).unwrap();
        assert_eq!(driver.sent().len(), 1);
        assert_eq!(driver.take_sent(), alloc::vec![alloc::vec![7, 7]]);
        assert!(driver.sent().is_empty());
    }
}
