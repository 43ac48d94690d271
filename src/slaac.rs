// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! IPv6 Stateless Address Autoconfiguration (RFC 4862) with RDNSS
//! handling (RFC 6106).
//!
//! The engine forms a link-local address from the interface identifier,
//! drives Duplicate Address Detection over the NDP collaborator, solicits
//! routers, and adopts the first usable advertised prefix as a global
//! address. The NDP subsystem owns probe transmission and duplicate
//! detection; this engine decides when DAD happens and on which tentative
//! address, and reads the per-slot duplicate flag the NDP side maintains.

use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use rand::{rngs::StdRng, RngCore, SeedableRng as _};
use tracing::{debug, info, warn};

use crate::deps::NdpSender;
use crate::iface::{AddrState, MacAddr, NetInterface, IPV6_MAX_DNS_SERVERS};
use crate::time::{rand_range, Clock, Millis, SystemClock};
use crate::Error;

/// Default maximum delay before the first Router Solicitation, ms
/// (RFC 4861 MAX_RTR_SOLICITATION_DELAY).
pub const MAX_RTR_SOLICITATION_DELAY: u64 = 1000;
/// Default interval between Router Solicitations, ms
/// (RFC 4861 RTR_SOLICITATION_INTERVAL).
pub const RTR_SOLICITATION_INTERVAL: u64 = 4000;
/// Default number of Router Solicitations before concluding no router is
/// present (RFC 4861 MAX_RTR_SOLICITATIONS).
pub const MAX_RTR_SOLICITATIONS: u32 = 3;
/// Default number of Neighbor Solicitations per DAD run
/// (RFC 4862 DupAddrDetectTransmits).
pub const DUP_ADDR_DETECT_TRANSMITS: u32 = 1;

/// SLAAC engine FSM states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SlaacState {
    /// Waiting for the link to come up.
    #[default]
    Init,
    /// Verifying uniqueness of the tentative link-local address.
    LinkLocalAddrDad,
    /// Soliciting routers for a prefix.
    RouterSolicit,
    /// Verifying uniqueness of the tentative global address.
    GlobalAddrDad,
    /// A global address is configured and preferred.
    Configured,
    /// No router answered; the link-local address stands alone.
    NoRouter,
    /// A tentative address was found in use elsewhere.
    DadFailure,
}

/// One Prefix Information option from a Router Advertisement, already
/// parsed by the NDP collaborator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrefixInformation {
    /// Advertised prefix.
    pub prefix: Ipv6Addr,
    /// Prefix length in bits.
    pub prefix_len: u8,
    /// L flag.
    pub on_link: bool,
    /// A flag; only autonomous prefixes participate in SLAAC.
    pub autonomous: bool,
    /// Valid lifetime, seconds.
    pub valid_lifetime: u32,
    /// Preferred lifetime, seconds.
    pub preferred_lifetime: u32,
}

/// A Router Advertisement as delivered by the NDP receive path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouterAdvertisement {
    /// Advertised hop limit; 0 means unspecified.
    pub cur_hop_limit: u8,
    /// M flag.
    pub managed: bool,
    /// O flag.
    pub other: bool,
    /// Router lifetime, seconds.
    pub router_lifetime: u16,
    /// Reachable time, ms; 0 means unspecified.
    pub reachable_time: u32,
    /// Retransmission timer, ms; 0 means unspecified.
    pub retrans_timer: u32,
    /// MTU option, if present.
    pub mtu: Option<u32>,
    /// Prefix Information options in wire order.
    pub prefixes: Vec<PrefixInformation>,
    /// Recursive DNS servers from an RDNSS option.
    pub rdnss: Vec<Ipv6Addr>,
}

/// SLAAC engine configuration.
pub struct SlaacSettings {
    /// Interface to configure.
    pub iface: Arc<NetInterface>,
    /// NDP transmit path for DAD probes and Router Solicitations.
    pub ndp: Arc<dyn NdpSender>,
    /// Monotonic time source.
    pub clock: Arc<dyn Clock>,
    /// Lower bound of the random delay before the first RS, ms.
    pub min_rtr_solicitation_delay: u64,
    /// Upper bound of the random delay before the first RS, ms.
    pub max_rtr_solicitation_delay: u64,
    /// Interval between RS transmissions, ms.
    pub rtr_solicitation_interval: u64,
    /// RS transmissions before giving up on finding a router.
    pub max_rtr_solicitations: u32,
    /// Neighbor Solicitations per DAD run; 0 skips DAD entirely.
    pub dup_addr_detect_transmits: u32,
    /// Keep statically configured DNS servers.
    pub manual_dns_config: bool,
    /// Invoked with every received Router Advertisement, before the
    /// engine interprets it.
    pub router_adv_event: Option<Box<dyn Fn(&RouterAdvertisement) + Send + Sync>>,
    /// Randomness source override, mainly for tests.
    pub rng: Option<Box<dyn RngCore + Send>>,
}

impl SlaacSettings {
    /// Settings with every optional field at its default.
    pub fn new(iface: Arc<NetInterface>, ndp: Arc<dyn NdpSender>) -> SlaacSettings {
        SlaacSettings {
            iface,
            ndp,
            clock: Arc::new(SystemClock::new()),
            min_rtr_solicitation_delay: 0,
            max_rtr_solicitation_delay: MAX_RTR_SOLICITATION_DELAY,
            rtr_solicitation_interval: RTR_SOLICITATION_INTERVAL,
            max_rtr_solicitations: MAX_RTR_SOLICITATIONS,
            dup_addr_detect_transmits: DUP_ADDR_DETECT_TRANSMITS,
            manual_dns_config: false,
            router_adv_event: None,
            rng: None,
        }
    }
}

struct Inner {
    running: bool,
    state: SlaacState,
    timestamp: Millis,
    timeout: u64,
    retransmit_count: u32,
    rng: Box<dyn RngCore + Send>,
}

/// The SLAAC engine bound to one interface.
pub struct SlaacEngine {
    settings: SlaacSettings,
    inner: Mutex<Inner>,
}

/// Maps a MAC address to the modified EUI-64 interface identifier:
/// 0xFFFE is inserted in the middle and the Universal/Local bit is
/// inverted.
pub fn mac_addr_to_eui64(mac: MacAddr) -> [u8; 8] {
    let octets = mac.octets();
    [
        octets[0] ^ 0x02,
        octets[1],
        octets[2],
        0xff,
        0xfe,
        octets[3],
        octets[4],
        octets[5],
    ]
}

fn combine_prefix(prefix: Ipv6Addr, iid: [u8; 8]) -> Ipv6Addr {
    let mut octets = prefix.octets();
    octets[8..].copy_from_slice(&iid);
    Ipv6Addr::from(octets)
}

const LINK_LOCAL_PREFIX: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0);

fn is_link_local_prefix(prefix: Ipv6Addr) -> bool {
    prefix.octets()[..8] == LINK_LOCAL_PREFIX.octets()[..8]
}

impl SlaacEngine {
    /// Creates the engine.
    pub fn new(mut settings: SlaacSettings) -> Result<SlaacEngine, Error> {
        if settings.min_rtr_solicitation_delay > settings.max_rtr_solicitation_delay {
            return Err(Error::InvalidParameter(
                "min_rtr_solicitation_delay exceeds max_rtr_solicitation_delay",
            ));
        }
        let rng = settings
            .rng
            .take()
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()) as Box<dyn RngCore + Send>);
        Ok(SlaacEngine {
            settings,
            inner: Mutex::new(Inner {
                running: false,
                state: SlaacState::Init,
                timestamp: Millis::ZERO,
                timeout: 0,
                retransmit_count: 0,
                rng,
            }),
        })
    }

    /// Starts (or restarts) autoconfiguration.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = true;
        inner.state = SlaacState::Init;
        info!(iface = %self.settings.iface.name(), "SLAAC started");
    }

    /// Suspends the engine; the state resets to INIT.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        inner.state = SlaacState::Init;
        info!(iface = %self.settings.iface.name(), "SLAAC stopped");
    }

    /// Snapshot of the FSM state.
    pub fn state(&self) -> SlaacState {
        self.inner.lock().unwrap().state
    }

    fn now(&self) -> Millis {
        self.settings.clock.now()
    }

    /// Advances the state machine; must be invoked periodically.
    pub fn tick(&self) {
        let now = self.now();
        let iface = &self.settings.iface;
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SlaacState::Init => {
                if inner.running && iface.link_up() {
                    let iid = mac_addr_to_eui64(iface.mac());
                    let link_local = combine_prefix(LINK_LOCAL_PREFIX, iid);
                    // The link-local address starts tentative until DAD
                    // clears it.
                    iface.set_link_local_addr(Some(link_local), AddrState::Tentative);
                    info!(iface = %iface.name(), addr = %link_local, "verifying link-local address");
                    inner.timestamp = now;
                    inner.timeout = 0;
                    inner.retransmit_count = 0;
                    inner.state = SlaacState::LinkLocalAddrDad;
                }
            }
            SlaacState::LinkLocalAddrDad => {
                if now.elapsed_since(inner.timestamp) >= inner.timeout {
                    let ipv6 = iface.ipv6_config();
                    if ipv6.link_local_dup {
                        // A tentative address found in use must never be
                        // assigned.
                        iface.set_link_local_addr(None, AddrState::Invalid);
                        inner.state = SlaacState::DadFailure;
                        warn!(iface = %iface.name(), "duplicate link-local address");
                    } else if inner.retransmit_count < self.settings.dup_addr_detect_transmits {
                        if let Some(addr) = ipv6.link_local_addr {
                            if let Err(error) =
                                self.settings.ndp.send_neighbor_solicitation(iface, addr, true)
                            {
                                warn!(%error, "failed to send DAD probe");
                            }
                        }
                        inner.timestamp = now;
                        inner.timeout = ipv6.retrans_timer;
                        inner.retransmit_count += 1;
                    } else {
                        iface.set_link_local_addr_state(AddrState::Preferred);
                        inner.timestamp = now;
                        inner.timeout = rand_range(
                            &mut inner.rng,
                            self.settings.min_rtr_solicitation_delay as i64,
                            self.settings.max_rtr_solicitation_delay as i64,
                        ) as u64;
                        inner.retransmit_count = 0;
                        inner.state = SlaacState::RouterSolicit;
                        info!(iface = %iface.name(), "link-local address is unique, soliciting routers");
                    }
                }
            }
            SlaacState::RouterSolicit => {
                if now.elapsed_since(inner.timestamp) >= inner.timeout {
                    if inner.retransmit_count < self.settings.max_rtr_solicitations {
                        if let Err(error) = self.settings.ndp.send_router_solicitation(iface) {
                            warn!(%error, "failed to send router solicitation");
                        }
                        inner.timestamp = now;
                        inner.timeout = self.settings.rtr_solicitation_interval;
                        inner.retransmit_count += 1;
                    } else {
                        inner.state = SlaacState::NoRouter;
                        info!(iface = %iface.name(), "no router advertisements received");
                    }
                }
            }
            SlaacState::GlobalAddrDad => {
                if now.elapsed_since(inner.timestamp) >= inner.timeout {
                    let ipv6 = iface.ipv6_config();
                    if ipv6.global_dup {
                        iface.set_global_addr(None, AddrState::Invalid);
                        inner.state = SlaacState::DadFailure;
                        warn!(iface = %iface.name(), "duplicate global address");
                    } else if inner.retransmit_count < self.settings.dup_addr_detect_transmits {
                        if let Some(addr) = ipv6.global_addr {
                            if let Err(error) =
                                self.settings.ndp.send_neighbor_solicitation(iface, addr, true)
                            {
                                warn!(%error, "failed to send DAD probe");
                            }
                        }
                        inner.timestamp = now;
                        inner.timeout = ipv6.retrans_timer;
                        inner.retransmit_count += 1;
                    } else {
                        iface.set_global_addr_state(AddrState::Preferred);
                        inner.state = SlaacState::Configured;
                        info!(
                            iface = %iface.name(),
                            addr = ?iface.ipv6_config().global_addr,
                            "address autoconfiguration complete"
                        );
                    }
                }
            }
            SlaacState::Configured | SlaacState::NoRouter | SlaacState::DadFailure => {}
        }
    }

    /// Reacts to a link transition: both addresses and the prefix are
    /// invalidated and autoconfiguration restarts from INIT.
    pub fn on_link_change(&self) {
        let iface = &self.settings.iface;
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            iface.set_link_local_addr(None, AddrState::Invalid);
            iface.set_global_addr(None, AddrState::Invalid);
            iface.set_prefix(None);
        }
        inner.state = SlaacState::Init;
        debug!(up = iface.link_up(), "SLAAC observed link change");
    }

    /// Processes a Router Advertisement delivered by the NDP receive
    /// path.
    ///
    /// The user callback observes every advertisement; the engine itself
    /// only acts on one while waiting for (or having given up on) a
    /// router.
    pub fn on_router_advertisement(&self, ra: &RouterAdvertisement) {
        if let Some(callback) = &self.settings.router_adv_event {
            callback(ra);
        }

        let iface = &self.settings.iface;
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SlaacState::RouterSolicit | SlaacState::NoRouter => {}
            _ => return,
        }

        // The first autonomous /64 prefix that is not the link-local
        // prefix, has a nonzero valid lifetime and a consistent preferred
        // lifetime wins.
        let info = match ra.prefixes.iter().find(|info| {
            info.autonomous
                && info.prefix_len == 64
                && !is_link_local_prefix(info.prefix)
                && info.valid_lifetime > 0
                && info.preferred_lifetime <= info.valid_lifetime
        }) {
            Some(info) => info,
            None => return,
        };

        iface.set_prefix(Some((info.prefix, info.prefix_len)));
        let iid = mac_addr_to_eui64(iface.mac());
        let global = combine_prefix(info.prefix, iid);
        iface.set_global_addr(Some(global), AddrState::Tentative);
        if !self.settings.manual_dns_config {
            for (i, server) in ra.rdnss.iter().take(IPV6_MAX_DNS_SERVERS).enumerate() {
                iface.set_ipv6_dns_server(i, *server);
            }
        }
        info!(iface = %iface.name(), prefix = %info.prefix, addr = %global, "adopted advertised prefix");

        inner.timestamp = self.now();
        inner.timeout = 0;
        inner.retransmit_count = 0;
        inner.state = SlaacState::GlobalAddrDad;
    }
}
