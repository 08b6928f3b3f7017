//! Ethernet frame parsing and construction
//!
//! Implements IEEE 802.3 Ethernet II frame format.

use core::fmt;

use super::buffer::PacketBuffer;
use super::driver::Driver;
use super::{Interface, Malformed, NetError, NetStack, RxOutcome};

/// Ethernet frame header size (without VLAN tag)
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Minimum Ethernet payload size; shorter payloads are zero-padded
pub const ETHERNET_MIN_TRANSPORT_UNIT: usize = 46;

/// Minimum Ethernet frame size (excluding FCS)
pub const ETHERNET_MIN_SIZE: usize = ETHERNET_HEADER_SIZE + ETHERNET_MIN_TRANSPORT_UNIT;

/// Maximum Ethernet payload size (MTU)
pub const ETHERNET_MTU: usize = 1500;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// EtherType for ARP
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// EtherType for IPv6
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);
    pub const ZERO: MacAddress = MacAddress([0; 6]);
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Decoded Ethernet header, held by value so it outlives buffer mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Parse the header at the front of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ETHERNET_HEADER_SIZE {
            return None;
        }

        let dst_mac = MacAddress([data[0], data[1], data[2], data[3], data[4], data[5]]);
        let src_mac = MacAddress([data[6], data[7], data[8], data[9], data[10], data[11]]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);

        Some(EthernetHeader {
            dst_mac,
            src_mac,
            ethertype,
        })
    }

    /// Write the header into the first 14 bytes of `out`
    pub fn write(&self, out: &mut [u8]) {
        out[0..6].copy_from_slice(&self.dst_mac.0);
        out[6..12].copy_from_slice(&self.src_mac.0);
        out[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
    }
}

/// Signature of a link-layer protocol handler (IPv4, ARP)
///
/// The buffer holds the frame payload with the Ethernet header stripped.
pub type LinkHandler<D> = fn(&mut NetStack<D>, &mut PacketBuffer, MacAddress) -> RxOutcome;

impl<D: Driver> NetStack<D> {
    /// Handle a received Ethernet frame
    pub fn frame_in(&mut self, buf: &mut PacketBuffer) -> RxOutcome {
        let Some(header) = EthernetHeader::parse(buf.data()) else {
            log::debug!("ETH: Dropping truncated frame ({} bytes)", buf.len());
            return RxOutcome::DroppedMalformed(Malformed::Truncated);
        };
        if buf.remove_header(ETHERNET_HEADER_SIZE).is_err() {
            return RxOutcome::DroppedMalformed(Malformed::Truncated);
        }

        let Some(handler) = self.link.lookup(header.ethertype).copied() else {
            log::debug!(
                "ETH: Ignoring ethertype {:#06x} from {}",
                header.ethertype,
                header.src_mac
            );
            return RxOutcome::DroppedUnsupportedProtocol(header.ethertype);
        };
        handler(self, buf, header.src_mac)
    }
}

impl<D: Driver> Interface<D> {
    /// Frame `buf` and hand it to the driver
    ///
    /// Short payloads are padded to the Ethernet minimum before the header
    /// is prepended. Driver transmit failures are logged, not returned.
    pub fn frame_out(
        &mut self,
        mut buf: PacketBuffer,
        dst_mac: MacAddress,
        ethertype: u16,
    ) -> Result<(), NetError> {
        if buf.len() < ETHERNET_MIN_TRANSPORT_UNIT {
            if let Err(e) = buf.add_padding(ETHERNET_MIN_TRANSPORT_UNIT - buf.len()) {
                log::warn!("ETH: Padding failed: {}", e);
                return Err(e);
            }
        }
        if let Err(e) = buf.add_header(ETHERNET_HEADER_SIZE) {
            log::warn!("ETH: No room for header: {}", e);
            return Err(e);
        }

        let header = EthernetHeader {
            dst_mac,
            src_mac: self.config.mac_addr,
            ethertype,
        };
        header.write(buf.data_mut());

        self.transmit(buf.data());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::driver::MemoryDriver;
    use crate::net::SLIRP_CONFIG;

    const PEER: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x01]);

    fn frame(ethertype: u16, payload: &[u8]) -> alloc::vec::Vec<u8> {
        let mut out = alloc::vec![0u8; ETHERNET_HEADER_SIZE];
        EthernetHeader {
            dst_mac: SLIRP_CONFIG.mac_addr,
            src_mac: PEER,
            ethertype,
        }
        .write(&mut out);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn header_parse_reads_big_endian_ethertype() {
        let bytes = frame(ETHERTYPE_ARP, &[]);
        let header = EthernetHeader::parse(&bytes).unwrap();
        assert_eq!(header.ethertype, 0x0806);
        assert_eq!(header.src_mac, PEER);
        assert_eq!(header.dst_mac, SLIRP_CONFIG.mac_addr);
        assert!(EthernetHeader::parse(&bytes[..13]).is_none());
    }

    #[test]
    fn short_payload_is_padded_before_header() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        stack
            .interface_mut()
            .frame_out(PacketBuffer::from_slice(&[0xAB; 10]), PEER, ETHERTYPE_IPV4)
            .unwrap();

        let sent = stack.interface_mut().driver_mut().take_sent();
        assert_eq!(sent.len(), 1);
        let out = &sent[0];
        assert_eq!(out.len(), ETHERNET_MIN_SIZE);
        assert_eq!(&out[0..6], &PEER.0);
        assert_eq!(&out[6..12], &SLIRP_CONFIG.mac_addr.0);
        assert_eq!(&out[12..14], &[0x08, 0x00]);
        assert_eq!(&out[14..24], &[0xAB; 10]);
        assert!(out[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn full_payload_is_not_padded() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        stack
            .interface_mut()
            .frame_out(PacketBuffer::from_slice(&[1; 100]), PEER, 0x88B5)
            .unwrap();
        let sent = stack.interface_mut().driver_mut().take_sent();
        assert_eq!(sent[0].len(), ETHERNET_HEADER_SIZE + 100);
        assert_eq!(&sent[0][12..14], &[0x88, 0xB5]);
    }

    #[test]
    fn frame_without_headroom_is_not_sent() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        let mut buf = PacketBuffer::with_capacity(ETHERNET_MIN_TRANSPORT_UNIT);
        buf.load(&[0; ETHERNET_MIN_TRANSPORT_UNIT]).unwrap();
        let result = stack.interface_mut().frame_out(buf, PEER, ETHERTYPE_IPV4);
        assert_eq!(result, Err(NetError::BufferOverflow));
        assert!(stack.interface().driver().sent().is_empty());
    }

    #[test]
    fn unknown_ethertype_is_dropped() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        let mut buf = PacketBuffer::with_capacity(64);
        buf.load(&frame(ETHERTYPE_IPV6, &[0; 40])).unwrap();
        assert_eq!(
            stack.frame_in(&mut buf),
            RxOutcome::DroppedUnsupportedProtocol(ETHERTYPE_IPV6)
        );
    }

    #[test]
    fn truncated_frame_is_dropped() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        let mut buf = PacketBuffer::with_capacity(64);
        buf.load(&[0xFF; 13]).unwrap();
        assert_eq!(
            stack.frame_in(&mut buf),
            RxOutcome::DroppedMalformed(Malformed::Truncated)
        );
        assert_eq!(buf.len(), 13);
    }
}
