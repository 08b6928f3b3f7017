//! Network stack for Breenix
//!
//! Implements the link and network layers of a minimal stack:
//! - Ethernet frame parsing and construction
//! - IPv4 datagram validation, dispatch and fragmentation
//! - ARP for IPv4 address resolution
//! - ICMP destination-unreachable signaling
//!
//! Processing is synchronous and run-to-completion: [`NetStack::poll`]
//! takes one frame from the driver and carries it all the way to the
//! upper-layer handler before returning.

pub mod arp;
pub mod buffer;
pub mod driver;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod mux;

use alloc::boxed::Box;
use alloc::vec;
use core::fmt;
use core::sync::atomic::AtomicU16;

use crossbeam_queue::ArrayQueue;

pub use buffer::PacketBuffer;
pub use driver::{Driver, MemoryDriver};
pub use ethernet::{LinkHandler, MacAddress};
pub use ipv4::Ipv4Address;
pub use mux::{Multiplexer, ProtocolHandler, UpperProtocols};

use arp::{ArpCache, PendingDatagram};

/// Network interface configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetConfig {
    /// Our hardware address
    pub mac_addr: MacAddress,
    /// Our IPv4 address
    pub ip_addr: Ipv4Address,
}

/// Default network configuration for QEMU user-mode networking (SLIRP)
/// QEMU's default user-mode network uses 10.0.2.0/24
pub const SLIRP_CONFIG: NetConfig = NetConfig {
    mac_addr: MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]), // QEMU default NIC
    ip_addr: Ipv4Address([10, 0, 2, 15]),
};

/// Network configuration for macOS vmnet/bridge networking
/// socket_vmnet daemon uses 192.168.105.x
pub const VMNET_CONFIG: NetConfig = NetConfig {
    mac_addr: MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
    ip_addr: Ipv4Address([192, 168, 105, 100]), // Static guest IP (avoiding DHCP conflicts)
};

/// Select network config based on compile-time feature or default to SLIRP
#[cfg(feature = "vmnet")]
pub const DEFAULT_CONFIG: NetConfig = VMNET_CONFIG;

#[cfg(not(feature = "vmnet"))]
pub const DEFAULT_CONFIG: NetConfig = SLIRP_CONFIG;

impl Default for NetConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// Errors reported by egress and setup paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Not enough head or tail room in a packet buffer
    BufferOverflow,
    /// Tried to strip more bytes than a packet buffer holds
    BufferUnderflow,
    /// Payload does not fit in a single IPv4 datagram
    PayloadTooLarge,
    /// Protocol identifier already has a handler
    DuplicateProtocol,
    /// Driver refused the frame
    DriverError(&'static str),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::BufferOverflow => write!(f, "packet buffer capacity exceeded"),
            NetError::BufferUnderflow => write!(f, "packet buffer too short"),
            NetError::PayloadTooLarge => write!(f, "payload exceeds IPv4 datagram size"),
            NetError::DuplicateProtocol => write!(f, "protocol already registered"),
            NetError::DriverError(e) => write!(f, "driver error: {}", e),
        }
    }
}

/// Why an incoming packet was dropped as malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Shorter than the fixed header
    Truncated,
    /// IP version other than 4
    BadVersion,
    /// IHL below 5 words or beyond the total length
    BadHeaderLength,
    /// Declared total length exceeds the received bytes
    LengthMismatch,
    BadChecksum,
    /// Destination is not our address
    NotForUs,
    /// Not an Ethernet/IPv4 ARP packet
    BadArp,
}

/// What became of one received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Delivered to a registered handler
    Forwarded,
    DroppedMalformed(Malformed),
    /// No handler for this EtherType or IP protocol; dropped silently
    DroppedUnsupportedProtocol(u16),
    /// Unknown IP protocol; the sender was sent an ICMP unreachable
    Signaled,
}

/// Egress half of the stack: configuration, driver and per-interface state
pub struct Interface<D: Driver> {
    config: NetConfig,
    driver: D,
    /// Identification for the next outbound datagram
    ip_id: AtomicU16,
    arp: ArpCache,
    arp_pending: ArrayQueue<PendingDatagram>,
}

impl<D: Driver> Interface<D> {
    fn new(driver: D, config: NetConfig) -> Self {
        Interface {
            config,
            driver,
            ip_id: AtomicU16::new(0),
            arp: ArpCache::new(),
            arp_pending: arp::pending_queue(),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Hand a finished frame to the driver
    fn transmit(&mut self, frame: &[u8]) {
        if let Err(e) = self.driver.send(frame) {
            log::warn!("NET: Transmit failed: {}", NetError::DriverError(e));
        }
    }
}

/// A complete Ethernet/IPv4 stack bound to one driver
pub struct NetStack<D: Driver> {
    iface: Interface<D>,
    link: Multiplexer<u16, LinkHandler<D>>,
    upper: UpperProtocols<D>,
    /// Reused for every received frame
    rx: PacketBuffer,
}

impl<D: Driver> NetStack<D> {
    /// Bring up a stack on `driver` with IPv4 and ARP registered
    pub fn new(driver: D, config: NetConfig) -> Self {
        log::info!("NET: MAC address: {}", config.mac_addr);
        log::info!("NET: IP address: {}", config.ip_addr);

        let link = Multiplexer::from_entries(vec![
            (ethernet::ETHERTYPE_IPV4, ipv4::ipv4_input::<D> as LinkHandler<D>),
            (ethernet::ETHERTYPE_ARP, arp::arp_input::<D> as LinkHandler<D>),
        ]);

        NetStack {
            iface: Interface::new(driver, config),
            link,
            upper: Multiplexer::new(),
            rx: PacketBuffer::for_rx(),
        }
    }

    /// Register an upper-layer protocol handler (ICMP, UDP, TCP...)
    pub fn register_protocol<H>(&mut self, protocol: u8, handler: H) -> Result<(), NetError>
    where
        H: ProtocolHandler<D> + 'static,
    {
        self.upper.register(protocol, Box::new(handler))
    }

    /// Register an additional link-layer protocol
    pub fn register_link_protocol(
        &mut self,
        ethertype: u16,
        handler: LinkHandler<D>,
    ) -> Result<(), NetError> {
        self.link.register(ethertype, handler)
    }

    /// Receive and process at most one frame
    ///
    /// Returns `None` when the driver had nothing to deliver.
    pub fn poll(&mut self) -> Option<RxOutcome> {
        let mut rx = core::mem::take(&mut self.rx);
        let outcome = if self.iface.driver.recv(&mut rx) > 0 {
            Some(self.frame_in(&mut rx))
        } else {
            None
        };
        rx.clear();
        self.rx = rx;
        outcome
    }

    /// Send `payload` to `dst_ip` as one or more IPv4 fragments
    pub fn send(
        &mut self,
        payload: &[u8],
        dst_ip: Ipv4Address,
        protocol: u8,
    ) -> Result<(), NetError> {
        self.iface.datagram_out(payload, dst_ip, protocol)
    }

    pub fn interface(&self) -> &Interface<D> {
        &self.iface
    }

    pub fn interface_mut(&mut self) -> &mut Interface<D> {
        &mut self.iface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_without_frames_is_a_no_op() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        assert_eq!(stack.poll(), None);
        assert!(stack.interface().driver().sent().is_empty());
    }

    #[test]
    fn runt_frame_leaves_state_untouched() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        stack.interface_mut().driver_mut().inject(&[0xFF; 10]);
        assert_eq!(
            stack.poll(),
            Some(RxOutcome::DroppedMalformed(Malformed::Truncated))
        );
        assert_eq!(stack.interface().peek_ip_id(), 0);
        assert_eq!(stack.interface().arp_pending(), 0);
        assert!(stack.interface().driver().sent().is_empty());
        assert_eq!(stack.rx.capacity(), PacketBuffer::for_rx().capacity());
    }

    #[test]
    fn duplicate_upper_protocol_is_rejected() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        let noop =
            |_: &mut Interface<MemoryDriver>, _: &mut PacketBuffer, _: u8, _: Ipv4Address| {};
        stack.register_protocol(ipv4::PROTOCOL_UDP, noop).unwrap();
        assert_eq!(
            stack.register_protocol(ipv4::PROTOCOL_UDP, noop),
            Err(NetError::DuplicateProtocol)
        );
    }

    #[test]
    fn ipv4_and_arp_are_preregistered() {
        let mut stack = NetStack::new(MemoryDriver::new(), SLIRP_CONFIG);
        fn ignore(
            _: &mut NetStack<MemoryDriver>,
            _: &mut PacketBuffer,
            _: MacAddress,
        ) -> RxOutcome {
            RxOutcome::Forwarded
        }
        assert_eq!(
            stack.register_link_protocol(ethernet::ETHERTYPE_IPV4, ignore),
            Err(NetError::DuplicateProtocol)
        );
        assert!(stack
            .register_link_protocol(ethernet::ETHERTYPE_IPV6, ignore)
            .is_ok());
    }

    #[test]
    fn error_messages_are_readable() {
        assert_eq!(
            alloc::format!("{}", NetError::DriverError("link down")),
            "driver error: link down"
        );
    }
}
