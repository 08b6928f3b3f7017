//! ICMP error signaling
//!
//! Generates destination-unreachable messages (RFC 792) for datagrams the
//! stack cannot deliver. Echo and other ICMP traffic is left to whatever
//! handler registers for `PROTOCOL_ICMP`.

use alloc::vec::Vec;

use super::driver::Driver;
use super::ipv4::{internet_checksum, Ipv4Address, IPV4_HEADER_MIN_SIZE, PROTOCOL_ICMP};
use super::{Interface, NetError};

/// ICMP type: Destination Unreachable
pub const ICMP_DEST_UNREACHABLE: u8 = 3;

/// Destination unreachable code: protocol unreachable
pub const ICMP_CODE_PROTOCOL_UNREACHABLE: u8 = 2;

/// Destination unreachable code: port unreachable
pub const ICMP_CODE_PORT_UNREACHABLE: u8 = 3;

/// ICMP header size
pub const ICMP_HEADER_SIZE: usize = 8;

/// Bytes of the offending datagram's payload quoted after its header
const ICMP_QUOTED_PAYLOAD: usize = 8;

/// Parsed ICMP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpPacket<'a> {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// Identifier/sequence for echo, unused for unreachable
    pub rest: [u8; 4],
    pub payload: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    /// Parse an ICMP packet from raw bytes
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_SIZE {
            return None;
        }

        Some(IcmpPacket {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            rest: [data[4], data[5], data[6], data[7]],
            payload: &data[ICMP_HEADER_SIZE..],
        })
    }

    /// Build a destination-unreachable message quoting `datagram`
    ///
    /// The quote is the offending IP header plus the first 8 bytes of its
    /// payload, or less if the datagram is shorter.
    pub fn unreachable(code: u8, datagram: &[u8]) -> Vec<u8> {
        let header_len = datagram
            .first()
            .map(|b| (b & 0x0F) as usize * 4)
            .unwrap_or(0)
            .max(IPV4_HEADER_MIN_SIZE);
        let quote_len = (header_len + ICMP_QUOTED_PAYLOAD).min(datagram.len());

        let mut packet = Vec::with_capacity(ICMP_HEADER_SIZE + quote_len);
        packet.push(ICMP_DEST_UNREACHABLE);
        packet.push(code);
        // Checksum (placeholder)
        packet.extend_from_slice(&[0, 0]);
        // Unused
        packet.extend_from_slice(&[0; 4]);
        packet.extend_from_slice(&datagram[..quote_len]);

        let checksum = internet_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
        packet
    }
}

impl<D: Driver> Interface<D> {
    /// Tell `dst_ip` that `datagram` could not be delivered
    pub fn signal_unreachable(
        &mut self,
        datagram: &[u8],
        dst_ip: Ipv4Address,
        code: u8,
    ) -> Result<(), NetError> {
        let message = IcmpPacket::unreachable(code, datagram);
        log::debug!("ICMP: Sending unreachable code={} to {}", code, dst_ip);
        self.datagram_out(&message, dst_ip, PROTOCOL_ICMP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(payload_len: usize) -> Vec<u8> {
        let mut d = alloc::vec![0u8; IPV4_HEADER_MIN_SIZE + payload_len];
        d[0] = 0x45;
        for (i, b) in d[IPV4_HEADER_MIN_SIZE..].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        d
    }

    #[test]
    fn unreachable_quotes_header_and_eight_bytes() {
        let original = datagram(32);
        let message = IcmpPacket::unreachable(ICMP_CODE_PROTOCOL_UNREACHABLE, &original);
        assert_eq!(message.len(), ICMP_HEADER_SIZE + IPV4_HEADER_MIN_SIZE + 8);

        let icmp = IcmpPacket::parse(&message).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_DEST_UNREACHABLE);
        assert_eq!(icmp.code, ICMP_CODE_PROTOCOL_UNREACHABLE);
        assert_eq!(icmp.rest, [0; 4]);
        assert_eq!(icmp.payload, &original[..28]);
        assert_eq!(internet_checksum(&message), 0);
    }

    #[test]
    fn short_datagram_is_quoted_whole() {
        let original = datagram(3);
        let message = IcmpPacket::unreachable(ICMP_CODE_PORT_UNREACHABLE, &original);
        assert_eq!(IcmpPacket::parse(&message).unwrap().payload, &original[..]);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(IcmpPacket::parse(&[3, 2, 0, 0]).is_none());
    }
}
