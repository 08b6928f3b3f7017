//! ARP (Address Resolution Protocol) implementation
//!
//! Implements RFC 826 for IPv4-to-Ethernet address resolution. Datagrams
//! whose next hop is not yet resolved wait in a bounded queue until the
//! reply arrives.

use alloc::vec::Vec;

use crossbeam_queue::ArrayQueue;

use super::buffer::PacketBuffer;
use super::driver::Driver;
use super::ethernet::{MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use super::{Interface, Ipv4Address, Malformed, NetError, NetStack, RxOutcome};

/// ARP hardware type for Ethernet
pub const ARP_HTYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4
pub const ARP_PTYPE_IPV4: u16 = 0x0800;

/// ARP operation: request
pub const ARP_OP_REQUEST: u16 = 1;

/// ARP operation: reply
pub const ARP_OP_REPLY: u16 = 2;

/// ARP packet header size for Ethernet/IPv4
pub const ARP_PACKET_SIZE: usize = 28;

/// Maximum ARP cache entries
pub const ARP_CACHE_SIZE: usize = 16;

/// Maximum datagrams waiting for resolution
pub const ARP_PENDING_SIZE: usize = 8;

/// ARP cache entry
#[derive(Debug, Clone, Copy)]
struct ArpCacheEntry {
    ip: Ipv4Address,
    mac: MacAddress,
    valid: bool,
}

const FREE_ENTRY: ArpCacheEntry = ArpCacheEntry {
    ip: Ipv4Address::UNSPECIFIED,
    mac: MacAddress::ZERO,
    valid: false,
};

/// Fixed-size IPv4 → MAC cache
#[derive(Debug, Clone)]
pub struct ArpCache {
    entries: [ArpCacheEntry; ARP_CACHE_SIZE],
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache {
            entries: [FREE_ENTRY; ARP_CACHE_SIZE],
        }
    }

    /// Look up a MAC address
    pub fn lookup(&self, ip: Ipv4Address) -> Option<MacAddress> {
        self.entries
            .iter()
            .find(|e| e.valid && e.ip == ip)
            .map(|e| e.mac)
    }

    /// Record `ip` → `mac`, replacing the first entry when the cache is full
    pub fn update(&mut self, ip: Ipv4Address, mac: MacAddress) {
        let entry = ArpCacheEntry {
            ip,
            mac,
            valid: true,
        };

        if let Some(slot) = self.entries.iter_mut().find(|e| e.valid && e.ip == ip) {
            *slot = entry;
            return;
        }

        match self.entries.iter_mut().find(|e| !e.valid) {
            Some(slot) => *slot = entry,
            // Cache full - replace first entry (simple replacement policy)
            None => self.entries[0] = entry,
        }
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A datagram parked until its next hop resolves
#[derive(Debug)]
pub(crate) struct PendingDatagram {
    dst_ip: Ipv4Address,
    buf: PacketBuffer,
}

pub(crate) fn pending_queue() -> ArrayQueue<PendingDatagram> {
    ArrayQueue::new(ARP_PENDING_SIZE)
}

/// Parsed ARP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    /// Operation (1 = request, 2 = reply)
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Address,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Address,
}

impl ArpPacket {
    /// Parse an Ethernet/IPv4 ARP packet from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ARP_PACKET_SIZE {
            return None;
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];

        // Validate this is Ethernet/IPv4 ARP
        if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return None;
        }

        Some(ArpPacket {
            operation: u16::from_be_bytes([data[6], data[7]]),
            sender_mac: MacAddress([data[8], data[9], data[10], data[11], data[12], data[13]]),
            sender_ip: Ipv4Address([data[14], data[15], data[16], data[17]]),
            target_mac: MacAddress([data[18], data[19], data[20], data[21], data[22], data[23]]),
            target_ip: Ipv4Address([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Encode the packet
    pub fn build(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ARP_PACKET_SIZE);

        packet.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        packet.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        packet.push(6);
        packet.push(4);
        packet.extend_from_slice(&self.operation.to_be_bytes());
        packet.extend_from_slice(&self.sender_mac.0);
        packet.extend_from_slice(&self.sender_ip.0);
        packet.extend_from_slice(&self.target_mac.0);
        packet.extend_from_slice(&self.target_ip.0);

        packet
    }
}

/// Link-layer entry point registered for `ETHERTYPE_ARP`
pub(crate) fn arp_input<D: Driver>(
    stack: &mut NetStack<D>,
    buf: &mut PacketBuffer,
    _src_mac: MacAddress,
) -> RxOutcome {
    match ArpPacket::parse(buf.data()) {
        Some(arp) => stack.iface.handle_arp(&arp),
        None => {
            log::debug!("ARP: Dropping malformed packet ({} bytes)", buf.len());
            RxOutcome::DroppedMalformed(Malformed::BadArp)
        }
    }
}

impl<D: Driver> Interface<D> {
    /// Frame `buf` for `dst_ip`, or park it and ask who has `dst_ip`
    pub fn resolve_and_send(
        &mut self,
        buf: PacketBuffer,
        dst_ip: Ipv4Address,
    ) -> Result<(), NetError> {
        if let Some(mac) = self.arp.lookup(dst_ip) {
            return self.frame_out(buf, mac, ETHERTYPE_IPV4);
        }

        self.arp_miss(dst_ip, 1)?;
        self.park(buf, dst_ip)
    }

    /// Ask who has `dst_ip` and make room to park `count` datagrams for it
    ///
    /// Every miss broadcasts a request, so a lost request is recovered by the
    /// next send. When the queue is short of room the oldest parked datagrams
    /// are dropped; a batch larger than the whole queue is refused.
    pub(crate) fn arp_miss(
        &mut self,
        dst_ip: Ipv4Address,
        count: usize,
    ) -> Result<(), NetError> {
        self.arp_request(dst_ip)?;

        if count > ARP_PENDING_SIZE {
            log::warn!(
                "ARP: {} datagrams for {} exceed the pending queue",
                count,
                dst_ip
            );
            return Err(NetError::BufferOverflow);
        }
        while ARP_PENDING_SIZE - self.arp_pending.len() < count {
            match self.arp_pending.pop() {
                Some(oldest) => log::warn!(
                    "ARP: Pending queue full, dropping datagram for {}",
                    oldest.dst_ip
                ),
                None => break,
            }
        }
        Ok(())
    }

    /// Park `buf` until `dst_ip` resolves
    fn park(&mut self, buf: PacketBuffer, dst_ip: Ipv4Address) -> Result<(), NetError> {
        self.arp_pending
            .push(PendingDatagram { dst_ip, buf })
            .map_err(|_| NetError::BufferOverflow)
    }

    /// Frame `buf` if `dst_ip` is resolved, otherwise park it without a new request
    pub(crate) fn send_or_park(
        &mut self,
        buf: PacketBuffer,
        dst_ip: Ipv4Address,
    ) -> Result<(), NetError> {
        match self.arp.lookup(dst_ip) {
            Some(mac) => self.frame_out(buf, mac, ETHERTYPE_IPV4),
            None => self.park(buf, dst_ip),
        }
    }

    /// Broadcast an ARP request for `target_ip`
    pub fn arp_request(&mut self, target_ip: Ipv4Address) -> Result<(), NetError> {
        let request = ArpPacket {
            operation: ARP_OP_REQUEST,
            sender_mac: self.config.mac_addr,
            sender_ip: self.config.ip_addr,
            target_mac: MacAddress::ZERO,
            target_ip,
        };
        self.frame_out(
            PacketBuffer::from_slice(&request.build()),
            MacAddress::BROADCAST,
            ETHERTYPE_ARP,
        )?;
        log::debug!("ARP: Sent request for {}", target_ip);
        Ok(())
    }

    /// Resolved MAC address for `ip`, if cached
    pub fn arp_lookup(&self, ip: Ipv4Address) -> Option<MacAddress> {
        self.arp.lookup(ip)
    }

    /// Number of datagrams waiting for resolution
    pub fn arp_pending(&self) -> usize {
        self.arp_pending.len()
    }

    fn handle_arp(&mut self, arp: &ArpPacket) -> RxOutcome {
        // Always learn from ARP packets (update cache with sender info)
        self.arp.update(arp.sender_ip, arp.sender_mac);
        self.flush_pending(arp.sender_ip, arp.sender_mac);

        if arp.target_ip != self.config.ip_addr {
            return RxOutcome::Forwarded;
        }

        match arp.operation {
            ARP_OP_REQUEST => {
                log::debug!("ARP: Request from {} for our IP", arp.sender_ip);
                let reply = ArpPacket {
                    operation: ARP_OP_REPLY,
                    sender_mac: self.config.mac_addr,
                    sender_ip: self.config.ip_addr,
                    target_mac: arp.sender_mac,
                    target_ip: arp.sender_ip,
                };
                match self.frame_out(
                    PacketBuffer::from_slice(&reply.build()),
                    arp.sender_mac,
                    ETHERTYPE_ARP,
                ) {
                    Ok(()) => log::debug!("ARP: Sent reply"),
                    Err(e) => log::warn!("ARP: Failed to send reply: {}", e),
                }
            }
            ARP_OP_REPLY => {
                log::debug!("ARP: Reply from {} -> {}", arp.sender_ip, arp.sender_mac);
            }
            _ => {}
        }
        RxOutcome::Forwarded
    }

    /// Send every parked datagram addressed to `ip`
    fn flush_pending(&mut self, ip: Ipv4Address, mac: MacAddress) {
        for _ in 0..self.arp_pending.len() {
            let Some(pending) = self.arp_pending.pop() else {
                break;
            };
            if pending.dst_ip != ip {
                // Re-queue; the slot we just popped is free
                let _ = self.arp_pending.push(pending);
                continue;
            }
            if let Err(e) = self.frame_out(pending.buf, mac, ETHERTYPE_IPV4) {
                log::warn!("ARP: Failed to send pending datagram to {}: {}", ip, e);
            }
        }
    }
}

impl<D: Driver> NetStack<D> {
    /// Seed a static ARP entry
    pub fn arp_insert(&mut self, ip: Ipv4Address, mac: MacAddress) {
        log::debug!("ARP: Static entry {} -> {}", ip, mac);
        self.iface.arp.update(ip, mac);
    }
}
