//! Breenix network packet path
//!
//! Ethernet framing and IPv4 datagram processing, usable from the kernel
//! (`no_std` + `alloc`) and testable on the host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod net;
