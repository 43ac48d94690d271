// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fakes for exercising the engines deterministically: a controllable
//! clock and recording transmit collaborators.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::deps::{NdpSender, SendError, UdpSender};
use crate::iface::NetInterface;
use crate::time::{Clock, Millis};

/// A [`Clock`] driven entirely by the test.
#[derive(Default)]
pub struct FakeClock {
    now_ms: AtomicU64,
}

impl FakeClock {
    /// Creates a clock positioned at time zero.
    pub fn new() -> FakeClock {
        FakeClock::default()
    }

    /// Advances the clock by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        let _ = self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, Millis(ms): Millis) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Millis {
        Millis(self.now_ms.load(Ordering::SeqCst))
    }
}

/// One datagram captured by [`FakeUdpSender`].
#[derive(Clone, Debug, PartialEq)]
pub struct SentDatagram {
    /// Source port the engine sent from.
    pub src_port: u16,
    /// Destination address.
    pub dst_ip: IpAddr,
    /// Destination port.
    pub dst_port: u16,
    /// Raw message bytes.
    pub payload: Vec<u8>,
    /// Requested TTL (0 for IPv6 default hop limit).
    pub ttl: u8,
}

/// A [`UdpSender`] that records instead of transmitting.
#[derive(Default)]
pub struct FakeUdpSender {
    sent: Mutex<Vec<SentDatagram>>,
    fail_next: Mutex<Option<SendError>>,
}

impl FakeUdpSender {
    /// Creates an empty recorder.
    pub fn new() -> FakeUdpSender {
        FakeUdpSender::default()
    }

    /// Drains and returns everything sent so far.
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Makes the next send fail with `error`.
    pub fn fail_next(&self, error: SendError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }
}

impl UdpSender for FakeUdpSender {
    fn send_datagram(
        &self,
        _iface: &NetInterface,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        payload: &[u8],
        ttl: u8,
    ) -> Result<(), SendError> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(SentDatagram {
            src_port,
            dst_ip,
            dst_port,
            payload: payload.to_vec(),
            ttl,
        });
        Ok(())
    }
}

/// One NDP transmission captured by [`FakeNdpSender`].
#[derive(Clone, Debug, PartialEq)]
pub enum NdpTransmit {
    /// A Neighbor Solicitation probing `target`.
    NeighborSolicitation {
        /// Probed address.
        target: Ipv6Addr,
        /// Whether the solicited-node multicast destination was used.
        multicast: bool,
    },
    /// A Router Solicitation.
    RouterSolicitation,
}

/// An [`NdpSender`] that records instead of transmitting.
#[derive(Default)]
pub struct FakeNdpSender {
    sent: Mutex<Vec<NdpTransmit>>,
}

impl FakeNdpSender {
    /// Creates an empty recorder.
    pub fn new() -> FakeNdpSender {
        FakeNdpSender::default()
    }

    /// Drains and returns everything sent so far.
    pub fn take_sent(&self) -> Vec<NdpTransmit> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl NdpSender for FakeNdpSender {
    fn send_neighbor_solicitation(
        &self,
        _iface: &NetInterface,
        target: Ipv6Addr,
        multicast: bool,
    ) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(NdpTransmit::NeighborSolicitation { target, multicast });
        Ok(())
    }

    fn send_router_solicitation(&self, _iface: &NetInterface) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(NdpTransmit::RouterSolicitation);
        Ok(())
    }
}
