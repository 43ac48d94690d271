// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Abstractions for platform dependencies: the UDP send path, the NDP
//! transmit primitives and the engine-side receive callback.
//!
//! The engines treat every collaborator as non-blocking. A send failure is
//! never an engine error; it is absorbed and the datagram is retried on the
//! next retransmission tick.

use std::net::{IpAddr, Ipv6Addr};

use crate::iface::NetInterface;

/// Reasons an outgoing datagram could not be handed to the stack.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SendError {
    /// No buffer could be allocated for the datagram.
    #[error("out of memory")]
    OutOfMemory,
    /// The link is down or the driver refused the frame.
    #[error("link down")]
    LinkDown,
}

/// The UDP transmit path of the surrounding stack.
pub trait UdpSender: Send + Sync {
    /// Sends a datagram on `iface` from `src_port` to `dst_ip:dst_port`.
    ///
    /// `ttl` is the IPv4 TTL; pass 0 to let the IPv6 layer pick its default
    /// hop limit.
    fn send_datagram(
        &self,
        iface: &NetInterface,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        payload: &[u8],
        ttl: u8,
    ) -> Result<(), SendError>;
}

/// The NDP transmit primitives used by the SLAAC and DHCPv6 engines.
pub trait NdpSender: Send + Sync {
    /// Sends a Neighbor Solicitation probing `target`; `multicast` selects
    /// the solicited-node multicast destination used during DAD.
    fn send_neighbor_solicitation(
        &self,
        iface: &NetInterface,
        target: Ipv6Addr,
        multicast: bool,
    ) -> Result<(), SendError>;

    /// Sends a Router Solicitation to the all-routers multicast group.
    fn send_router_solicitation(&self, iface: &NetInterface) -> Result<(), SendError>;
}

/// Addressing of an incoming UDP datagram, standing in for the IP
/// pseudo-header and UDP header of the packet path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UdpMetadata {
    /// Source address of the enclosing IP packet.
    pub src_ip: IpAddr,
    /// Destination address of the enclosing IP packet.
    pub dst_ip: IpAddr,
    /// Source UDP port.
    pub src_port: u16,
    /// Destination UDP port.
    pub dst_port: u16,
}

/// A receiver registered with an interface's UDP demux.
///
/// Invoked from the stack's packet path with no engine lock held; the
/// engine acquires its own lock on entry.
pub trait UdpReceiver: Send + Sync {
    /// Delivers one datagram payload.
    fn on_datagram(&self, meta: &UdpMetadata, payload: &[u8]);
}
