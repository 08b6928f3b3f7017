//! IPv4 datagram validation, dispatch and fragmentation
//!
//! Implements basic IPv4 packet handling (RFC 791). Incoming fragments are
//! not reassembled; each one is validated and delivered on its own.

use core::fmt;
use core::sync::atomic::Ordering;

use super::buffer::PacketBuffer;
use super::driver::Driver;
use super::ethernet::{MacAddress, ETHERNET_MTU};
use super::icmp::ICMP_CODE_PROTOCOL_UNREACHABLE;
use super::{Interface, Malformed, NetError, NetStack, RxOutcome};

/// IPv4 header minimum size (no options)
pub const IPV4_HEADER_MIN_SIZE: usize = 20;

/// Largest payload a single datagram can carry
pub const IPV4_MAX_PAYLOAD: usize = u16::MAX as usize - IPV4_HEADER_MIN_SIZE;

/// Largest payload carried by one fragment on Ethernet
pub const IPV4_MAX_FRAGMENT_PAYLOAD: usize = ETHERNET_MTU - IPV4_HEADER_MIN_SIZE;

/// More-fragments bit of the flags/offset field
pub const IP_MORE_FRAGMENTS: u16 = 0x2000;

/// Fragment offset bits of the flags/offset field, in 8-byte units
pub const IP_FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

/// IPv4 protocol number for ICMP
pub const PROTOCOL_ICMP: u8 = 1;

/// IPv4 protocol number for TCP
pub const PROTOCOL_TCP: u8 = 6;

/// IPv4 protocol number for UDP
pub const PROTOCOL_UDP: u8 = 17;

/// Default TTL for outgoing packets
pub const DEFAULT_TTL: u8 = 64;

/// 32-bit IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Decoded IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Version (should be 4)
    pub version: u8,
    /// Header length in 32-bit words
    pub ihl: u8,
    /// Type of service / DSCP
    pub tos: u8,
    /// Total length
    pub total_length: u16,
    /// Identification
    pub identification: u16,
    /// Flags and fragment offset
    pub flags_fragment: u16,
    /// Time to live
    pub ttl: u8,
    pub protocol: u8,
    /// Header checksum as transmitted
    pub checksum: u16,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
}

impl Ipv4Header {
    /// Decode the fixed 20 header bytes at the front of `data`
    ///
    /// No field is validated here; see [`NetStack::datagram_in`].
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_MIN_SIZE {
            return None;
        }

        Some(Ipv4Header {
            version: (data[0] >> 4) & 0x0F,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_length: u16::from_be_bytes([data[2], data[3]]),
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags_fragment: u16::from_be_bytes([data[6], data[7]]),
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src_ip: Ipv4Address([data[12], data[13], data[14], data[15]]),
            dst_ip: Ipv4Address([data[16], data[17], data[18], data[19]]),
        })
    }

    /// Write the fixed 20 header bytes into `out`
    pub fn write(&self, out: &mut [u8]) {
        out[0] = (self.version << 4) | (self.ihl & 0x0F);
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.identification.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        out[12..16].copy_from_slice(&self.src_ip.0);
        out[16..20].copy_from_slice(&self.dst_ip.0);
    }

    /// Header length in bytes
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    pub fn more_fragments(&self) -> bool {
        self.flags_fragment & IP_MORE_FRAGMENTS != 0
    }

    /// Fragment offset in bytes
    pub fn fragment_offset(&self) -> usize {
        (self.flags_fragment & IP_FRAGMENT_OFFSET_MASK) as usize * 8
    }
}

/// Calculate the Internet checksum (RFC 1071)
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    // Sum 16-bit words
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }

    // Add odd byte if present
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    // One's complement
    !(sum as u16)
}

/// Check the header checksum of the datagram at the front of `data`
///
/// The checksum field is zeroed for the computation and put back afterwards,
/// so `data` is unchanged on return.
fn verify_header_checksum(data: &mut [u8], header_len: usize) -> bool {
    let transmitted = [data[10], data[11]];
    data[10] = 0;
    data[11] = 0;
    let computed = internet_checksum(&data[..header_len]);
    data[10] = transmitted[0];
    data[11] = transmitted[1];
    computed == u16::from_be_bytes(transmitted)
}

fn malformed(reason: Malformed) -> RxOutcome {
    log::debug!("IPv4: Dropping datagram: {:?}", reason);
    RxOutcome::DroppedMalformed(reason)
}

/// Link-layer entry point registered for `ETHERTYPE_IPV4`
pub(crate) fn ipv4_input<D: Driver>(
    stack: &mut NetStack<D>,
    buf: &mut PacketBuffer,
    _src_mac: MacAddress,
) -> RxOutcome {
    stack.datagram_in(buf)
}

impl<D: Driver> NetStack<D> {
    /// Validate an incoming datagram and deliver its payload upward
    pub fn datagram_in(&mut self, buf: &mut PacketBuffer) -> RxOutcome {
        let Some(header) = Ipv4Header::parse(buf.data()) else {
            return malformed(Malformed::Truncated);
        };

        if header.version != 4 {
            return malformed(Malformed::BadVersion);
        }
        let total_length = header.total_length as usize;
        if total_length > buf.len() {
            return malformed(Malformed::LengthMismatch);
        }
        let header_len = header.header_len();
        if header_len < IPV4_HEADER_MIN_SIZE || header_len > total_length {
            return malformed(Malformed::BadHeaderLength);
        }

        if !verify_header_checksum(buf.data_mut(), header_len) {
            return malformed(Malformed::BadChecksum);
        }

        // We don't do routing
        if header.dst_ip != self.iface.config.ip_addr {
            return malformed(Malformed::NotForUs);
        }

        // Anything past total_length is link-layer padding
        if buf.len() > total_length && buf.remove_padding(buf.len() - total_length).is_err() {
            return malformed(Malformed::LengthMismatch);
        }

        if !self.upper.contains(header.protocol) {
            log::debug!(
                "IPv4: Unknown protocol {} from {}",
                header.protocol,
                header.src_ip
            );
            if let Err(e) = self.iface.signal_unreachable(
                buf.data(),
                header.src_ip,
                ICMP_CODE_PROTOCOL_UNREACHABLE,
            ) {
                log::warn!("IPv4: Failed to signal unreachable: {}", e);
            }
            return RxOutcome::Signaled;
        }

        if buf.remove_header(header_len).is_err() {
            return malformed(Malformed::BadHeaderLength);
        }
        if self
            .upper
            .dispatch(&mut self.iface, buf, header.protocol, header.src_ip)
        {
            RxOutcome::Forwarded
        } else {
            RxOutcome::DroppedUnsupportedProtocol(header.protocol as u16)
        }
    }
}

impl<D: Driver> Interface<D> {
    /// Identification value the next outbound datagram will carry
    pub fn peek_ip_id(&self) -> u16 {
        self.ip_id.load(Ordering::Relaxed)
    }

    fn next_ip_id(&self) -> u16 {
        self.ip_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Prepend an IPv4 header to one already-sized fragment and send it
    ///
    /// `offset` is in bytes and must be a multiple of 8.
    pub fn fragment_out(
        &mut self,
        buf: PacketBuffer,
        dst_ip: Ipv4Address,
        protocol: u8,
        id: u16,
        offset: u16,
        more_fragments: bool,
    ) -> Result<(), NetError> {
        let buf = self.encode_fragment(buf, dst_ip, protocol, id, offset, more_fragments)?;
        self.resolve_and_send(buf, dst_ip)
    }

    fn encode_fragment(
        &self,
        mut buf: PacketBuffer,
        dst_ip: Ipv4Address,
        protocol: u8,
        id: u16,
        offset: u16,
        more_fragments: bool,
    ) -> Result<PacketBuffer, NetError> {
        buf.add_header(IPV4_HEADER_MIN_SIZE)?;

        let flags = if more_fragments { IP_MORE_FRAGMENTS } else { 0 };
        let header = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: buf.len() as u16,
            identification: id,
            flags_fragment: flags | (offset >> 3),
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_ip: self.config.ip_addr,
            dst_ip,
        };
        header.write(buf.data_mut());
        let checksum = internet_checksum(&buf.data()[..IPV4_HEADER_MIN_SIZE]);
        buf.data_mut()[10..12].copy_from_slice(&checksum.to_be_bytes());

        log::debug!(
            "IPv4: Sending fragment id={} offset={} mf={} len={} to {}",
            id,
            offset,
            more_fragments,
            buf.len(),
            dst_ip
        );
        Ok(buf)
    }

    /// Send `payload` to `dst_ip`, fragmenting it to fit the Ethernet MTU
    ///
    /// Every fragment is copied into its own buffer; `payload` is never
    /// modified. All fragments share one identification value.
    pub fn datagram_out(
        &mut self,
        payload: &[u8],
        dst_ip: Ipv4Address,
        protocol: u8,
    ) -> Result<(), NetError> {
        if payload.len() > IPV4_MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge);
        }

        let max_len = IPV4_MAX_FRAGMENT_PAYLOAD;
        if self.arp_lookup(dst_ip).is_none() {
            // Room for every fragment is made before any is parked
            let fragments = payload.len().div_ceil(max_len).max(1);
            self.arp_miss(dst_ip, fragments)?;
        }

        let id = self.next_ip_id();
        let mut offset = 0;

        while offset + max_len < payload.len() {
            let fragment = PacketBuffer::from_slice(&payload[offset..offset + max_len]);
            let fragment =
                self.encode_fragment(fragment, dst_ip, protocol, id, offset as u16, true)?;
            self.send_or_park(fragment, dst_ip)?;
            offset += max_len;
        }

        let last = PacketBuffer::from_slice(&payload[offset..]);
        let last = self.encode_fragment(last, dst_ip, protocol, id, offset as u16, false)?;
        self.send_or_park(last, dst_ip)
    }
}
