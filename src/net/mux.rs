//! Protocol multiplexer
//!
//! Maps a protocol identifier (an EtherType at the link layer, an IP
//! protocol number at the network layer) to the handler registered for it.
//! Tables are append-only: protocols register once while the stack is being
//! assembled and stay registered for its lifetime.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::buffer::PacketBuffer;
use super::driver::Driver;
use super::{Interface, Ipv4Address, NetError};

/// Upper-layer protocol handler (ICMP, UDP, TCP...)
///
/// Receives the datagram payload with the IP header already stripped. The
/// interface is passed in so handlers can transmit replies.
pub trait ProtocolHandler<D: Driver> {
    fn handle(
        &mut self,
        iface: &mut Interface<D>,
        payload: &mut PacketBuffer,
        protocol: u8,
        src_ip: Ipv4Address,
    );
}

impl<D, F> ProtocolHandler<D> for F
where
    D: Driver,
    F: FnMut(&mut Interface<D>, &mut PacketBuffer, u8, Ipv4Address),
{
    fn handle(
        &mut self,
        iface: &mut Interface<D>,
        payload: &mut PacketBuffer,
        protocol: u8,
        src_ip: Ipv4Address,
    ) {
        self(iface, payload, protocol, src_ip)
    }
}

/// Append-only protocol table
pub struct Multiplexer<K, H> {
    entries: Vec<(K, H)>,
}

impl<K: Copy + Eq + core::fmt::Debug, H> Multiplexer<K, H> {
    pub fn new() -> Self {
        Multiplexer { entries: Vec::new() }
    }

    /// Build a table from entries known to have distinct keys
    pub(crate) fn from_entries(entries: Vec<(K, H)>) -> Self {
        Multiplexer { entries }
    }

    /// Register `handler` for `protocol`
    ///
    /// A protocol can only be registered once.
    pub fn register(&mut self, protocol: K, handler: H) -> Result<(), NetError> {
        if self.contains(protocol) {
            return Err(NetError::DuplicateProtocol);
        }
        log::debug!("NET: Registered protocol {:?}", protocol);
        self.entries.push((protocol, handler));
        Ok(())
    }

    pub fn contains(&self, protocol: K) -> bool {
        self.entries.iter().any(|(k, _)| *k == protocol)
    }

    pub fn lookup(&self, protocol: K) -> Option<&H> {
        self.entries
            .iter()
            .find(|(k, _)| *k == protocol)
            .map(|(_, h)| h)
    }

    pub fn lookup_mut(&mut self, protocol: K) -> Option<&mut H> {
        self.entries
            .iter_mut()
            .find(|(k, _)| *k == protocol)
            .map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Copy + Eq + core::fmt::Debug, H> Default for Multiplexer<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Table of upper-layer handlers keyed by IP protocol number
pub type UpperProtocols<D> = Multiplexer<u8, Box<dyn ProtocolHandler<D>>>;

impl<D: Driver> Multiplexer<u8, Box<dyn ProtocolHandler<D>>> {
    /// Hand `payload` to the handler registered for `protocol`
    ///
    /// Returns false when no handler is registered.
    pub fn dispatch(
        &mut self,
        iface: &mut Interface<D>,
        payload: &mut PacketBuffer,
        protocol: u8,
        src_ip: Ipv4Address,
    ) -> bool {
        match self.lookup_mut(protocol) {
            Some(handler) => {
                handler.handle(iface, payload, protocol, src_ip);
                true
            }
            None => false,
        }
    }
}
