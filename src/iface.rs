// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-interface state the acquisition engines configure: addresses and
//! their assignment states, name service and MTU parameters, plus the
//! process-wide UDP receive-callback table keyed by local port.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::deps::{UdpMetadata, UdpReceiver};
use crate::Error;

/// Number of IPv4 DNS servers retained per interface.
pub const IPV4_MAX_DNS_SERVERS: usize = 2;
/// Number of IPv6 DNS servers retained per interface.
pub const IPV6_MAX_DNS_SERVERS: usize = 2;
/// Default NDP *RetransTimer*, in milliseconds (RFC 4861 section 10).
pub const RETRANS_TIMER_DEFAULT_MS: u64 = 1000;
/// Default hop limit for outgoing IPv6 packets.
pub const DEFAULT_HOP_LIMIT: u8 = 64;

/// An Ethernet MAC address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-zeroes address.
    pub const UNSPECIFIED: MacAddr = MacAddr([0; 6]);

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        let MacAddr(octets) = *self;
        octets
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let MacAddr(o) = self;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

/// Assignment state of an interface address slot.
///
/// Tentative addresses have not yet passed Duplicate Address Detection and
/// must not be used as source addresses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AddrState {
    /// No address is assigned to the slot.
    #[default]
    Invalid,
    /// Assigned but still subject to Duplicate Address Detection.
    Tentative,
    /// Verified unique; usable without restriction.
    Preferred,
    /// Assigned by a configuration protocol and usable.
    Valid,
}

/// IPv4 configuration of an interface.
#[derive(Copy, Clone, Debug, Default)]
pub struct Ipv4Config {
    /// Host address.
    pub addr: Option<Ipv4Addr>,
    /// Assignment state of [`Self::addr`].
    pub addr_state: AddrState,
    /// Subnet mask.
    pub subnet_mask: Option<Ipv4Addr>,
    /// Default gateway.
    pub default_gateway: Option<Ipv4Addr>,
    /// Name servers.
    pub dns_servers: [Option<Ipv4Addr>; IPV4_MAX_DNS_SERVERS],
    /// Interface MTU.
    pub mtu: Option<u16>,
}

/// IPv6 configuration of an interface.
#[derive(Copy, Clone, Debug)]
pub struct Ipv6Config {
    /// Link-local address.
    pub link_local_addr: Option<Ipv6Addr>,
    /// Assignment state of the link-local address.
    pub link_local_state: AddrState,
    /// Set by the NDP collaborator when DAD finds the tentative link-local
    /// address in use elsewhere.
    pub link_local_dup: bool,
    /// Global address.
    pub global_addr: Option<Ipv6Addr>,
    /// Assignment state of the global address.
    pub global_state: AddrState,
    /// Duplicate flag for the tentative global address.
    pub global_dup: bool,
    /// On-link prefix adopted from a Router Advertisement.
    pub prefix: Option<(Ipv6Addr, u8)>,
    /// Name servers.
    pub dns_servers: [Option<Ipv6Addr>; IPV6_MAX_DNS_SERVERS],
    /// Interface MTU.
    pub mtu: Option<u32>,
    /// Hop limit for outgoing packets.
    pub cur_hop_limit: u8,
    /// NDP *ReachableTime*, in milliseconds.
    pub reachable_time: u64,
    /// NDP *RetransTimer*, in milliseconds; paces DAD probes.
    pub retrans_timer: u64,
}

impl Default for Ipv6Config {
    fn default() -> Ipv6Config {
        Ipv6Config {
            link_local_addr: None,
            link_local_state: AddrState::Invalid,
            link_local_dup: false,
            global_addr: None,
            global_state: AddrState::Invalid,
            global_dup: false,
            prefix: None,
            dns_servers: [None; IPV6_MAX_DNS_SERVERS],
            mtu: None,
            cur_hop_limit: DEFAULT_HOP_LIMIT,
            reachable_time: 0,
            retrans_timer: RETRANS_TIMER_DEFAULT_MS,
        }
    }
}

/// A network interface as seen by the acquisition engines.
///
/// The interface owns its configuration; engines mutate it only through the
/// setters below, which serialize on the per-family lock. Engines hold an
/// `Arc<NetInterface>`; the interface in turn refers to registered
/// receivers only weakly, so dropping an engine unwires it.
pub struct NetInterface {
    index: u32,
    name: String,
    hostname: String,
    mac: MacAddr,
    link_up: AtomicBool,
    ipv4: Mutex<Ipv4Config>,
    ipv6: Mutex<Ipv6Config>,
    udp_receivers: Mutex<HashMap<u16, Weak<dyn UdpReceiver>>>,
}

impl fmt::Debug for NetInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetInterface")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("mac", &self.mac)
            .finish_non_exhaustive()
    }
}

impl NetInterface {
    /// Creates an interface with no addresses assigned and the link down.
    pub fn new(index: u32, name: &str, hostname: &str, mac: MacAddr) -> Arc<NetInterface> {
        Arc::new(NetInterface {
            index,
            name: name.to_owned(),
            hostname: hostname.to_owned(),
            mac,
            link_up: AtomicBool::new(false),
            ipv4: Mutex::new(Ipv4Config::default()),
            ipv6: Mutex::new(Ipv6Config::default()),
            udp_receivers: Mutex::new(HashMap::new()),
        })
    }

    /// Interface index, also used as the DHCPv6 IA identifier.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host name advertised to configuration servers.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Link-layer address.
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Current link state.
    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Records a link transition. The stack is responsible for also
    /// invoking each engine's `on_link_change`.
    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    /// Snapshot of the IPv4 configuration.
    pub fn ipv4_config(&self) -> Ipv4Config {
        *self.ipv4.lock().unwrap()
    }

    /// Snapshot of the IPv6 configuration.
    pub fn ipv6_config(&self) -> Ipv6Config {
        *self.ipv6.lock().unwrap()
    }

    /// Sets or clears the IPv4 host address together with its state.
    pub fn set_host_addr(&self, addr: Option<Ipv4Addr>, state: AddrState) {
        let mut ipv4 = self.ipv4.lock().unwrap();
        ipv4.addr = addr;
        ipv4.addr_state = state;
    }

    /// Sets or clears the subnet mask.
    pub fn set_subnet_mask(&self, mask: Option<Ipv4Addr>) {
        self.ipv4.lock().unwrap().subnet_mask = mask;
    }

    /// Sets or clears the default gateway.
    pub fn set_default_gateway(&self, gateway: Option<Ipv4Addr>) {
        self.ipv4.lock().unwrap().default_gateway = gateway;
    }

    /// Records an IPv4 DNS server in slot `index`; out-of-range slots are
    /// ignored.
    pub fn set_dns_server(&self, index: usize, addr: Ipv4Addr) {
        let mut ipv4 = self.ipv4.lock().unwrap();
        if let Some(slot) = ipv4.dns_servers.get_mut(index) {
            *slot = Some(addr);
        }
    }

    /// Sets the IPv4 MTU.
    pub fn set_mtu(&self, mtu: u16) {
        self.ipv4.lock().unwrap().mtu = Some(mtu);
    }

    /// Sets or clears the link-local address together with its state.
    /// Clearing also clears the duplicate flag.
    pub fn set_link_local_addr(&self, addr: Option<Ipv6Addr>, state: AddrState) {
        let mut ipv6 = self.ipv6.lock().unwrap();
        ipv6.link_local_addr = addr;
        ipv6.link_local_state = state;
        if addr.is_none() {
            ipv6.link_local_dup = false;
        }
    }

    /// Promotes the link-local address to a new state without touching the
    /// address itself.
    pub fn set_link_local_addr_state(&self, state: AddrState) {
        self.ipv6.lock().unwrap().link_local_state = state;
    }

    /// Sets or clears the global address together with its state. Clearing
    /// also clears the duplicate flag.
    pub fn set_global_addr(&self, addr: Option<Ipv6Addr>, state: AddrState) {
        let mut ipv6 = self.ipv6.lock().unwrap();
        ipv6.global_addr = addr;
        ipv6.global_state = state;
        if addr.is_none() {
            ipv6.global_dup = false;
        }
    }

    /// Promotes the global address to a new state.
    pub fn set_global_addr_state(&self, state: AddrState) {
        self.ipv6.lock().unwrap().global_state = state;
    }

    /// Sets or clears the on-link prefix.
    pub fn set_prefix(&self, prefix: Option<(Ipv6Addr, u8)>) {
        self.ipv6.lock().unwrap().prefix = prefix;
    }

    /// Records an IPv6 DNS server in slot `index`; out-of-range slots are
    /// ignored.
    pub fn set_ipv6_dns_server(&self, index: usize, addr: Ipv6Addr) {
        let mut ipv6 = self.ipv6.lock().unwrap();
        if let Some(slot) = ipv6.dns_servers.get_mut(index) {
            *slot = Some(addr);
        }
    }

    /// Sets the IPv6 MTU.
    pub fn set_ipv6_mtu(&self, mtu: u32) {
        self.ipv6.lock().unwrap().mtu = Some(mtu);
    }

    /// Reports the outcome of DAD on the tentative link-local address.
    /// Called by the NDP collaborator.
    pub fn set_link_local_dup(&self, dup: bool) {
        self.ipv6.lock().unwrap().link_local_dup = dup;
    }

    /// Reports the outcome of DAD on the tentative global address.
    pub fn set_global_dup(&self, dup: bool) {
        self.ipv6.lock().unwrap().global_dup = dup;
    }

    /// Registers `receiver` for datagrams addressed to local `port`.
    ///
    /// The table holds one receiver per port for the lifetime of the
    /// registration; a second registration for the same port fails with
    /// [`Error::OutOfResources`]. A dead weak reference counts as free.
    pub fn register_udp_receiver(
        &self,
        port: u16,
        receiver: Weak<dyn UdpReceiver>,
    ) -> Result<(), Error> {
        let mut receivers = self.udp_receivers.lock().unwrap();
        match receivers.entry(port) {
            Entry::Vacant(entry) => {
                let _ = entry.insert(receiver);
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                if entry.get().strong_count() == 0 {
                    let _ = entry.insert(receiver);
                    Ok(())
                } else {
                    Err(Error::OutOfResources("UDP receive callback slot already in use"))
                }
            }
        }
    }

    /// Removes the receiver registered for `port`, if any.
    pub fn unregister_udp_receiver(&self, port: u16) {
        let _ = self.udp_receivers.lock().unwrap().remove(&port);
    }

    /// Dispatches one incoming datagram to the receiver registered for its
    /// destination port. Datagrams for unclaimed ports are dropped.
    pub fn deliver_udp(&self, meta: &UdpMetadata, payload: &[u8]) {
        let receiver = {
            let receivers = self.udp_receivers.lock().unwrap();
            receivers.get(&meta.dst_port).and_then(Weak::upgrade)
        };
        match receiver {
            Some(receiver) => receiver.on_datagram(meta, payload),
            None => debug!(iface = %self.name, port = meta.dst_port, "dropping datagram for unclaimed port"),
        }
    }
}
