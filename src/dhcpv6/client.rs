// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The DHCPv6 client state machine (RFC 3315 sections 17.1 and 18.1).
//!
//! Every client-initiated exchange follows the same retransmission
//! algebra, parameterized by ⟨IRT, MRT, MRC, MRD⟩: the first timeout is
//! IRT, each retransmission doubles it up to MRT, and the exchange is
//! abandoned after MRC transmissions or MRD elapsed milliseconds when
//! those bounds are nonzero. Every computed timeout gains a uniform
//! ±10 % jitter.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rand::{rngs::StdRng, RngCore, SeedableRng as _};
use tracing::{debug, info, warn};

use crate::deps::{NdpSender, UdpMetadata, UdpReceiver, UdpSender};
use crate::dhcpv6::duid::{duid_ll, DUID_MAX_SIZE};
use crate::dhcpv6::parse::{
    self, encode_dns_name, option_code, status_code, Dhcpv6Option, IaAddr, IaNa, Message,
    MessageType, HEADER_SIZE, MAX_SERVER_PREFERENCE,
};
use crate::dhcpv6::{ALL_DHCP_RELAY_AGENTS_AND_SERVERS, CLIENT_PORT, SERVER_PORT};
use crate::iface::{AddrState, NetInterface, IPV6_MAX_DNS_SERVERS};
use crate::time::{apply_jitter, rand_jitter, rand_range, Clock, Millis, SystemClock, INFINITE_LIFETIME};
use crate::Error;

/// Upper bound on the DNS-encoded client FQDN carried in option 39.
pub const MAX_FQDN_SIZE: usize = 16;

/// Option codes requested from the server in every Option Request option.
const REQUESTED_OPTIONS: [u16; 3] =
    [option_code::DNS_SERVERS, option_code::DOMAIN_LIST, option_code::FQDN];

/// DHCPv6 client FSM states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Dhcpv6State {
    /// Waiting to begin an acquisition attempt.
    #[default]
    Init,
    /// Soliciting servers, collecting Advertise messages.
    Solicit,
    /// Requesting an address from the selected server.
    Request,
    /// Waiting to revalidate a previous lease.
    InitConfirm,
    /// Confirming that the leased address still fits the link.
    Confirm,
    /// Holding a valid lease.
    Bound,
    /// Extending lifetimes with the granting server.
    Renew,
    /// Extending lifetimes with any server.
    Rebind,
    /// Reporting the leased address as already in use.
    Decline,
}

impl Dhcpv6State {
    /// Whether a previous lease exists, making INIT-CONFIRM the re-entry
    /// point after a link transition.
    fn has_lease(self) -> bool {
        match self {
            Dhcpv6State::Init | Dhcpv6State::Solicit | Dhcpv6State::Request => false,
            Dhcpv6State::InitConfirm
            | Dhcpv6State::Confirm
            | Dhcpv6State::Bound
            | Dhcpv6State::Renew
            | Dhcpv6State::Rebind
            | Dhcpv6State::Decline => true,
        }
    }
}

/// Retransmission parameters for one exchange (RFC 3315 section 14).
/// All durations in milliseconds; zero disables the corresponding bound.
#[derive(Copy, Clone, Debug)]
pub struct RetransParams {
    /// Initial retransmission timeout.
    pub irt: u64,
    /// Upper bound on the retransmission timeout; 0 means uncapped.
    pub mrt: u64,
    /// Maximum transmissions; 0 means unbounded.
    pub mrc: u32,
    /// Maximum exchange duration; 0 means unbounded.
    pub mrd: u64,
}

/// Protocol timing for every exchange. Defaults are the RFC 3315
/// constants; tests shrink them.
#[derive(Copy, Clone, Debug)]
pub struct Dhcpv6Timing {
    /// Upper bound of the random delay before the first Solicit.
    pub sol_max_delay: u64,
    /// Solicit exchange parameters.
    pub sol: RetransParams,
    /// Request exchange parameters.
    pub req: RetransParams,
    /// Upper bound of the random delay before the first Confirm.
    pub cnf_max_delay: u64,
    /// Confirm exchange parameters.
    pub cnf: RetransParams,
    /// Renew exchange parameters (additionally bounded by T2).
    pub ren: RetransParams,
    /// Rebind exchange parameters (additionally bounded by the valid
    /// lifetime).
    pub reb: RetransParams,
    /// Decline exchange parameters.
    pub dec: RetransParams,
}

impl Default for Dhcpv6Timing {
    fn default() -> Dhcpv6Timing {
        Dhcpv6Timing {
            sol_max_delay: 1000,
            sol: RetransParams { irt: 1000, mrt: 120_000, mrc: 0, mrd: 0 },
            req: RetransParams { irt: 1000, mrt: 30_000, mrc: 10, mrd: 0 },
            cnf_max_delay: 1000,
            cnf: RetransParams { irt: 1000, mrt: 4000, mrc: 0, mrd: 10_000 },
            ren: RetransParams { irt: 10_000, mrt: 600_000, mrc: 0, mrd: 0 },
            reb: RetransParams { irt: 10_000, mrt: 600_000, mrc: 0, mrd: 0 },
            dec: RetransParams { irt: 1000, mrt: 0, mrc: 5, mrd: 0 },
        }
    }
}

/// DHCPv6 client configuration.
pub struct Dhcpv6ClientSettings {
    /// Interface to configure.
    pub iface: Arc<NetInterface>,
    /// UDP transmit path.
    pub udp: Arc<dyn UdpSender>,
    /// NDP transmit path, used to pair each first Solicit/Confirm with a
    /// Router Solicitation.
    pub ndp: Arc<dyn NdpSender>,
    /// Monotonic time source.
    pub clock: Arc<dyn Clock>,
    /// Offer to complete the exchange in two messages (Solicit/Reply).
    pub rapid_commit: bool,
    /// Keep statically configured DNS servers.
    pub manual_dns_config: bool,
    /// Advisory acquisition deadline in ms; 0 disables the callback.
    pub timeout: u64,
    /// Invoked once per acquisition attempt when `timeout` elapses.
    pub timeout_event: Option<Box<dyn Fn() + Send + Sync>>,
    /// Invoked after the engine reacted to a link transition.
    pub link_change_event: Option<Box<dyn Fn(bool) + Send + Sync>>,
    /// Invoked on every FSM transition.
    pub state_change_event: Option<Box<dyn Fn(Dhcpv6State) + Send + Sync>>,
    /// Protocol timing.
    pub timing: Dhcpv6Timing,
    /// Randomness source override, mainly for tests.
    pub rng: Option<Box<dyn RngCore + Send + Sync>>,
}

impl Dhcpv6ClientSettings {
    /// Settings with every optional field at its default.
    pub fn new(
        iface: Arc<NetInterface>,
        udp: Arc<dyn UdpSender>,
        ndp: Arc<dyn NdpSender>,
    ) -> Dhcpv6ClientSettings {
        Dhcpv6ClientSettings {
            iface,
            udp,
            ndp,
            clock: Arc::new(SystemClock::new()),
            rapid_commit: false,
            manual_dns_config: false,
            timeout: 0,
            timeout_event: None,
            link_change_event: None,
            state_change_event: None,
            timing: Dhcpv6Timing::default(),
            rng: None,
        }
    }
}

enum Notification {
    StateChange(Dhcpv6State),
    Timeout,
    LinkChange(bool),
}

struct Inner {
    running: bool,
    state: Dhcpv6State,
    timestamp: Millis,
    timeout: u64,
    retransmit_count: u32,
    xid: u32,
    client_addr: Ipv6Addr,
    server_id: Vec<u8>,
    server_preference: i32,
    t1: u32,
    t2: u32,
    preferred_lifetime: u32,
    valid_lifetime: u32,
    config_start: Millis,
    exchange_start: Millis,
    lease_start: Millis,
    timeout_event_fired: bool,
    rng: Box<dyn RngCore + Send + Sync>,
    pending: Vec<Notification>,
}

/// A DHCPv6 client bound to one interface.
///
/// Construction registers the client as the UDP receiver for port 546 on
/// its interface; dropping the client releases the slot.
pub struct Dhcpv6Client {
    settings: Dhcpv6ClientSettings,
    client_id: Vec<u8>,
    fqdn_name: Vec<u8>,
    inner: Mutex<Inner>,
}

impl Dhcpv6Client {
    /// Creates the client and claims the interface's port-546 receive
    /// slot. The client DUID-LL and the DNS-encoded FQDN are derived from
    /// the interface once, here.
    pub fn new(mut settings: Dhcpv6ClientSettings) -> Result<Arc<Dhcpv6Client>, Error> {
        let Dhcpv6Timing { sol, req, cnf, ren, reb, dec, .. } = settings.timing;
        for params in [sol, req, cnf, ren, reb, dec] {
            let RetransParams { irt, .. } = params;
            if irt == 0 {
                return Err(Error::InvalidParameter("IRT must be nonzero"));
            }
        }

        let rng = settings
            .rng
            .take()
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()) as Box<dyn RngCore + Send + Sync>);
        let client_id = duid_ll(settings.iface.mac());

        // Bound the hostname so the encoded FQDN fits MAX_FQDN_SIZE
        // (one length byte plus the root label around the first label).
        let hostname = settings.iface.hostname();
        let mut end = hostname.len().min(MAX_FQDN_SIZE - 2);
        while !hostname.is_char_boundary(end) {
            end -= 1;
        }
        let fqdn_name = encode_dns_name(&hostname[..end]);

        let client = Arc::new(Dhcpv6Client {
            client_id,
            fqdn_name,
            inner: Mutex::new(Inner {
                running: false,
                state: Dhcpv6State::Init,
                timestamp: Millis::ZERO,
                timeout: 0,
                retransmit_count: 0,
                xid: 0,
                client_addr: Ipv6Addr::UNSPECIFIED,
                server_id: Vec::new(),
                server_preference: -1,
                t1: 0,
                t2: 0,
                preferred_lifetime: 0,
                valid_lifetime: 0,
                config_start: Millis::ZERO,
                exchange_start: Millis::ZERO,
                lease_start: Millis::ZERO,
                timeout_event_fired: false,
                rng,
                pending: Vec::new(),
            }),
            settings,
        });
        client
            .settings
            .iface
            .register_udp_receiver(CLIENT_PORT, Arc::downgrade(&client) as Weak<dyn UdpReceiver>)?;
        Ok(client)
    }

    /// Starts (or restarts) address acquisition.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = true;
        inner.state = Dhcpv6State::Init;
        info!(iface = %self.settings.iface.name(), "DHCPv6 client started");
    }

    /// Suspends the client; the state resets to INIT.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        inner.state = Dhcpv6State::Init;
        info!(iface = %self.settings.iface.name(), "DHCPv6 client stopped");
    }

    /// Snapshot of the FSM state.
    pub fn state(&self) -> Dhcpv6State {
        self.inner.lock().unwrap().state
    }

    /// Advances the state machine; must be invoked periodically.
    pub fn tick(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            Dhcpv6State::Init => self.state_init(&mut inner),
            Dhcpv6State::Solicit => self.state_solicit(&mut inner),
            Dhcpv6State::Request => self.state_request(&mut inner),
            Dhcpv6State::InitConfirm => self.state_init_confirm(&mut inner),
            Dhcpv6State::Confirm => self.state_confirm(&mut inner),
            Dhcpv6State::Bound => self.state_bound(&mut inner),
            Dhcpv6State::Renew => self.state_renew(&mut inner),
            Dhcpv6State::Rebind => self.state_rebind(&mut inner),
            Dhcpv6State::Decline => self.state_decline(&mut inner),
        }
        self.unlock_and_dispatch(inner);
    }

    /// Reacts to a link transition: the global address is invalidated and
    /// the FSM re-enters INIT, or INIT-CONFIRM when a lease exists.
    pub fn on_link_change(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            self.settings.iface.set_global_addr(None, AddrState::Invalid);
        }
        inner.state =
            if inner.state.has_lease() { Dhcpv6State::InitConfirm } else { Dhcpv6State::Init };
        let up = self.settings.iface.link_up();
        debug!(up, state = ?inner.state, "DHCPv6 client observed link change");
        inner.pending.push(Notification::LinkChange(up));
        self.unlock_and_dispatch(inner);
    }

    /// Begins a Decline exchange for the leased address. The caller (the
    /// NDP collaborator's DAD machinery) detects the conflict and invokes
    /// this.
    pub fn decline(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.change_state(&mut inner, Dhcpv6State::Decline, 0);
        self.unlock_and_dispatch(inner);
    }

    fn now(&self) -> Millis {
        self.settings.clock.now()
    }

    fn unlock_and_dispatch(&self, mut inner: MutexGuard<'_, Inner>) {
        let pending = std::mem::take(&mut inner.pending);
        drop(inner);
        for notification in pending {
            match notification {
                Notification::StateChange(state) => {
                    if let Some(callback) = &self.settings.state_change_event {
                        callback(state);
                    }
                }
                Notification::Timeout => {
                    if let Some(callback) = &self.settings.timeout_event {
                        callback();
                    }
                }
                Notification::LinkChange(up) => {
                    if let Some(callback) = &self.settings.link_change_event {
                        callback(up);
                    }
                }
            }
        }
    }

    fn change_state(&self, inner: &mut Inner, state: Dhcpv6State, delay: u64) {
        inner.timestamp = self.now();
        inner.timeout = delay;
        inner.retransmit_count = 0;
        inner.state = state;
        info!(iface = %self.settings.iface.name(), state = ?state, "DHCPv6 client state");
        inner.pending.push(Notification::StateChange(state));
    }

    fn check_timeout(&self, inner: &mut Inner) {
        if self.settings.timeout_event.is_none() || self.settings.timeout == 0 {
            return;
        }
        if self.now().elapsed_since(inner.config_start) >= self.settings.timeout
            && !inner.timeout_event_fired
        {
            inner.timeout_event_fired = true;
            inner.pending.push(Notification::Timeout);
        }
    }

    fn new_xid(&self, inner: &mut Inner) {
        inner.xid = inner.rng.next_u32() & 0x00ff_ffff;
    }

    fn jittered(&self, inner: &mut Inner, timeout: u64) -> u64 {
        let jitter = rand_jitter(&mut inner.rng, timeout);
        apply_jitter(timeout, jitter)
    }

    fn state_init(&self, inner: &mut Inner) {
        if !inner.running || !self.settings.iface.link_up() {
            return;
        }
        let delay =
            rand_range(&mut inner.rng, 0, self.settings.timing.sol_max_delay as i64) as u64;
        inner.config_start = self.now();
        inner.timeout_event_fired = false;
        self.change_state(inner, Dhcpv6State::Solicit, delay);
    }

    fn state_solicit(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.sol;
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            if inner.retransmit_count == 0 {
                // Pair the first Solicit with a Router Solicitation so the
                // SLAAC side of the interface converges at the same time.
                if let Err(error) = self.settings.ndp.send_router_solicitation(&self.settings.iface)
                {
                    warn!(%error, "failed to send router solicitation");
                }
                inner.server_preference = -1;
                self.new_xid(inner);
                inner.exchange_start = now;
                self.send_solicit(inner);
                inner.timestamp = now;
                inner.timeout = self.jittered(inner, params.irt);
                inner.retransmit_count += 1;
            } else if inner.server_preference >= 0 {
                // A usable Advertise arrived during the first RT.
                self.change_state(inner, Dhcpv6State::Request, 0);
            } else {
                self.send_solicit(inner);
                inner.timestamp = now;
                let doubled = (inner.timeout * 2).min(params.mrt);
                inner.timeout = self.jittered(inner, doubled);
                inner.retransmit_count += 1;
            }
        }
        self.check_timeout(inner);
    }

    fn state_request(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.req;
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            if inner.retransmit_count == 0 {
                self.new_xid(inner);
                inner.exchange_start = now;
                self.send_request(inner);
                inner.timestamp = now;
                inner.timeout = self.jittered(inner, params.irt);
                inner.retransmit_count += 1;
            } else if inner.retransmit_count < params.mrc {
                self.send_request(inner);
                inner.timestamp = now;
                let doubled = (inner.timeout * 2).min(params.mrt);
                inner.timeout = self.jittered(inner, doubled);
                inner.retransmit_count += 1;
            } else {
                // No response within a reasonable period; restart the
                // initialization procedure.
                self.change_state(inner, Dhcpv6State::Init, 0);
            }
        }
        self.check_timeout(inner);
    }

    fn state_init_confirm(&self, inner: &mut Inner) {
        if !inner.running || !self.settings.iface.link_up() {
            return;
        }
        let delay =
            rand_range(&mut inner.rng, 0, self.settings.timing.cnf_max_delay as i64) as u64;
        inner.config_start = self.now();
        inner.timeout_event_fired = false;
        self.change_state(inner, Dhcpv6State::Confirm, delay);
    }

    fn state_confirm(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.cnf;
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            if inner.retransmit_count == 0 {
                if let Err(error) = self.settings.ndp.send_router_solicitation(&self.settings.iface)
                {
                    warn!(%error, "failed to send router solicitation");
                }
                self.new_xid(inner);
                inner.exchange_start = now;
                self.send_confirm(inner);
                inner.timestamp = now;
                inner.timeout = self.jittered(inner, params.irt);
                inner.retransmit_count += 1;
            } else {
                self.send_confirm(inner);
                inner.timestamp = now;
                let doubled = (inner.timeout * 2).min(params.mrt);
                inner.timeout = self.jittered(inner, doubled);
                inner.retransmit_count += 1;
            }
        } else if inner.retransmit_count > 0
            && now.elapsed_since(inner.exchange_start) >= params.mrd
        {
            // The exchange fails once MRD milliseconds have elapsed since
            // the first transmission.
            self.change_state(inner, Dhcpv6State::Init, 0);
        }
        self.check_timeout(inner);
    }

    fn state_bound(&self, inner: &mut Inner) {
        if inner.t1 == INFINITE_LIFETIME {
            return;
        }
        let now = self.now();
        if now.elapsed_since(inner.lease_start) >= u64::from(inner.t1) * 1000 {
            inner.config_start = now;
            self.change_state(inner, Dhcpv6State::Renew, 0);
        }
    }

    fn state_renew(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.ren;
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            let timeout = if inner.retransmit_count == 0 {
                self.new_xid(inner);
                inner.exchange_start = now;
                self.send_renew(inner);
                params.irt
            } else {
                self.send_renew(inner);
                (inner.timeout * 2).min(params.mrt)
            };
            inner.timestamp = now;
            inner.timeout = self.jittered(inner, timeout);
            inner.retransmit_count += 1;
        } else if inner.t2 != INFINITE_LIFETIME
            && now.elapsed_since(inner.lease_start) >= u64::from(inner.t2) * 1000
        {
            self.change_state(inner, Dhcpv6State::Rebind, 0);
        }
    }

    fn state_rebind(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.reb;
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            let timeout = if inner.retransmit_count == 0 {
                self.new_xid(inner);
                inner.exchange_start = now;
                self.send_rebind(inner);
                params.irt
            } else {
                self.send_rebind(inner);
                (inner.timeout * 2).min(params.mrt)
            };
            inner.timestamp = now;
            inner.timeout = self.jittered(inner, timeout);
            inner.retransmit_count += 1;
        } else if inner.valid_lifetime != INFINITE_LIFETIME
            && now.elapsed_since(inner.lease_start) >= u64::from(inner.valid_lifetime) * 1000
        {
            // The lease expired without any server extending it.
            self.settings.iface.set_global_addr(None, AddrState::Invalid);
            self.change_state(inner, Dhcpv6State::Init, 0);
        }
    }

    fn state_decline(&self, inner: &mut Inner) {
        let now = self.now();
        let params = self.settings.timing.dec;
        if now.elapsed_since(inner.timestamp) < inner.timeout {
            return;
        }
        if inner.retransmit_count == 0 {
            self.new_xid(inner);
            inner.exchange_start = now;
            self.send_decline(inner);
            inner.timestamp = now;
            inner.timeout = self.jittered(inner, params.irt);
            inner.retransmit_count += 1;
        } else if inner.retransmit_count < params.mrc {
            self.send_decline(inner);
            inner.timestamp = now;
            let doubled = inner.timeout * 2;
            inner.timeout = self.jittered(inner, doubled);
            inner.retransmit_count += 1;
        } else {
            self.change_state(inner, Dhcpv6State::Init, 0);
        }
    }

    /// Elapsed-Time option value: hundredths of a second since the first
    /// transmission of the current exchange, zero on the first message,
    /// capped at 0xFFFF.
    fn elapsed_time(&self, inner: &Inner) -> u16 {
        if inner.retransmit_count == 0 {
            return 0;
        }
        let hundredths = self.now().elapsed_since(inner.exchange_start) / 10;
        hundredths.min(0xffff) as u16
    }

    fn transmit(&self, message: &Message) {
        let bytes = parse::serialize(message);
        if let Err(error) = self.settings.udp.send_datagram(
            &self.settings.iface,
            CLIENT_PORT,
            IpAddr::V6(ALL_DHCP_RELAY_AGENTS_AND_SERVERS),
            SERVER_PORT,
            &bytes,
            0,
        ) {
            warn!(%error, "failed to send DHCPv6 message");
        }
    }

    fn ia_na(&self, addr: Option<Ipv6Addr>) -> Dhcpv6Option {
        Dhcpv6Option::IaNa(IaNa {
            iaid: self.settings.iface.index(),
            t1: 0,
            t2: 0,
            options: addr
                .map(|addr| {
                    Dhcpv6Option::IaAddr(IaAddr {
                        addr,
                        preferred_lifetime: 0,
                        valid_lifetime: 0,
                        options: Vec::new(),
                    })
                })
                .into_iter()
                .collect(),
        })
    }

    fn fqdn_option(&self) -> Dhcpv6Option {
        Dhcpv6Option::Fqdn { flags: 0, name: self.fqdn_name.clone() }
    }

    fn leased_addr(&self) -> Ipv6Addr {
        self.settings.iface.ipv6_config().global_addr.unwrap_or(Ipv6Addr::UNSPECIFIED)
    }

    fn send_solicit(&self, inner: &mut Inner) {
        let mut message = Message::new(MessageType::Solicit, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(self.ia_na(None));
        message.options.push(Dhcpv6Option::Oro(REQUESTED_OPTIONS.to_vec()));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        if self.settings.rapid_commit {
            message.options.push(Dhcpv6Option::RapidCommit);
        }
        message.options.push(self.fqdn_option());
        debug!(xid = inner.xid, "sending Solicit");
        self.transmit(&message);
    }

    fn send_request(&self, inner: &mut Inner) {
        let mut message = Message::new(MessageType::Request, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(Dhcpv6Option::ServerId(inner.server_id.clone()));
        message.options.push(self.ia_na(None));
        message.options.push(Dhcpv6Option::Oro(REQUESTED_OPTIONS.to_vec()));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        message.options.push(self.fqdn_option());
        debug!(xid = inner.xid, "sending Request");
        self.transmit(&message);
    }

    fn send_confirm(&self, inner: &mut Inner) {
        let mut message = Message::new(MessageType::Confirm, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(self.ia_na(Some(inner.client_addr)));
        message.options.push(Dhcpv6Option::Oro(REQUESTED_OPTIONS.to_vec()));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        message.options.push(self.fqdn_option());
        debug!(xid = inner.xid, "sending Confirm");
        self.transmit(&message);
    }

    fn send_renew(&self, inner: &mut Inner) {
        let addr = self.leased_addr();
        let mut message = Message::new(MessageType::Renew, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(Dhcpv6Option::ServerId(inner.server_id.clone()));
        message.options.push(self.ia_na(Some(addr)));
        message.options.push(Dhcpv6Option::Oro(REQUESTED_OPTIONS.to_vec()));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        message.options.push(self.fqdn_option());
        debug!(xid = inner.xid, "sending Renew");
        self.transmit(&message);
    }

    fn send_rebind(&self, inner: &mut Inner) {
        let addr = self.leased_addr();
        let mut message = Message::new(MessageType::Rebind, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(self.ia_na(Some(addr)));
        message.options.push(Dhcpv6Option::Oro(REQUESTED_OPTIONS.to_vec()));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        message.options.push(self.fqdn_option());
        debug!(xid = inner.xid, "sending Rebind");
        self.transmit(&message);
    }

    fn send_decline(&self, inner: &mut Inner) {
        let addr = self.leased_addr();
        let mut message = Message::new(MessageType::Decline, inner.xid);
        message.options.push(Dhcpv6Option::ClientId(self.client_id.clone()));
        message.options.push(Dhcpv6Option::ServerId(inner.server_id.clone()));
        message.options.push(self.ia_na(Some(addr)));
        message.options.push(Dhcpv6Option::ElapsedTime(self.elapsed_time(inner)));
        debug!(xid = inner.xid, "sending Decline");
        self.transmit(&message);
    }

    /// Validates the fields every server message must carry: transaction
    /// id, our Client Identifier, and a plausible Server Identifier.
    /// Returns the server DUID on success.
    fn validate_server_message<'a>(
        &self,
        inner: &Inner,
        message: &'a Message,
    ) -> Option<&'a [u8]> {
        if message.transaction_id != inner.xid {
            return None;
        }
        match message.find_option(option_code::CLIENT_ID) {
            Some(Dhcpv6Option::ClientId(duid)) if *duid == self.client_id => {}
            _ => return None,
        }
        let server_id = match message.find_option(option_code::SERVER_ID) {
            Some(Dhcpv6Option::ServerId(duid)) => duid.as_slice(),
            _ => return None,
        };
        if server_id.is_empty() || server_id.len() > DUID_MAX_SIZE {
            return None;
        }
        Some(server_id)
    }

    /// Whether the message-level Status Code option (if present) reports
    /// success.
    fn status_ok(options: &[Dhcpv6Option]) -> bool {
        match options.iter().find(|option| option.code() == option_code::STATUS_CODE) {
            Some(Dhcpv6Option::StatusCode { code, message: _ }) => *code == status_code::SUCCESS,
            _ => true,
        }
    }

    fn handle_advertise(&self, inner: &mut Inner, message: &Message) {
        // With rapid commit enabled a Reply carrying committed assignments
        // is accepted in place of an Advertise.
        if self.settings.rapid_commit && self.handle_reply(inner, message) {
            return;
        }

        if message.msg_type != MessageType::Advertise {
            return;
        }
        let server_id = match self.validate_server_message(inner, message) {
            Some(server_id) => server_id.to_vec(),
            None => return,
        };
        // An Advertise with a failure status (such as NoAddrsAvail) is
        // ignored entirely.
        if !Self::status_ok(&message.options) {
            return;
        }

        // An Advertise without a Preference option is treated as
        // preference 0.
        let preference = match message.find_option(option_code::PREFERENCE) {
            Some(Dhcpv6Option::Preference(preference)) => i32::from(*preference),
            _ => 0,
        };
        if preference > inner.server_preference {
            inner.server_preference = preference;
            inner.server_id = server_id;
        }
        debug!(preference, "accepted Advertise");

        // Preference 255 completes the exchange immediately; otherwise
        // the first RT is waited out so a better server may still answer.
        if preference == i32::from(MAX_SERVER_PREFERENCE) || inner.retransmit_count > 1 {
            self.change_state(inner, Dhcpv6State::Request, 0);
        }
    }

    fn handle_reply(&self, inner: &mut Inner, message: &Message) -> bool {
        if message.msg_type != MessageType::Reply {
            return false;
        }
        let server_id = match self.validate_server_message(inner, message) {
            Some(server_id) => server_id.to_vec(),
            None => return false,
        };

        match inner.state {
            Dhcpv6State::Solicit => {
                // Only reachable through the rapid-commit path; the Reply
                // must commit to it explicitly.
                if !self.settings.rapid_commit
                    || message.find_option(option_code::RAPID_COMMIT).is_none()
                {
                    return false;
                }
            }
            Dhcpv6State::Request | Dhcpv6State::Renew => {
                // The Reply must come from the server the exchange was
                // addressed to.
                if server_id != inner.server_id {
                    return false;
                }
            }
            // No server comparison for Confirm, Rebind and Decline: any
            // server may answer those exchanges.
            _ => {}
        }

        if !Self::status_ok(&message.options) {
            return false;
        }

        // Commit the first IA_NA that passes validation; invalid ones are
        // discarded individually and the rest of the message is still
        // processed.
        for ia_na in message.ia_na_options() {
            if let Some((addr, lifetimes)) = self.check_ia_na(ia_na) {
                let (t1, t2, preferred, valid) = lifetimes;
                inner.server_id = server_id;
                inner.client_addr = addr;
                inner.t1 = t1;
                inner.t2 = t2;
                inner.preferred_lifetime = preferred;
                inner.valid_lifetime = valid;

                let iface = &self.settings.iface;
                if !self.settings.manual_dns_config {
                    if let Some(Dhcpv6Option::DnsServers(servers)) =
                        message.find_option(option_code::DNS_SERVERS)
                    {
                        for (i, server) in servers.iter().take(IPV6_MAX_DNS_SERVERS).enumerate() {
                            iface.set_ipv6_dns_server(i, *server);
                        }
                    }
                }
                // DAD for the committed address is the NDP collaborator's
                // concern; the lease itself is valid from here on.
                iface.set_global_addr(Some(addr), AddrState::Valid);
                inner.lease_start = self.now();
                info!(
                    iface = %iface.name(),
                    addr = %addr,
                    t1,
                    t2,
                    preferred,
                    valid,
                    "DHCPv6 lease acquired"
                );
                self.change_state(inner, Dhcpv6State::Bound, 0);
                return true;
            }
        }
        false
    }

    /// Validates one IA_NA and extracts the committed address with its
    /// (T1, T2, preferred, valid) lifetimes, deriving T1/T2 when the
    /// server left them to the client's discretion.
    fn check_ia_na(&self, ia_na: &IaNa) -> Option<(Ipv6Addr, (u32, u32, u32, u32))> {
        let IaNa { iaid, t1, t2, options } = ia_na;
        if *iaid != self.settings.iface.index() {
            return None;
        }
        // An IA_NA with T1 greater than a nonzero T2 is discarded.
        if *t1 > *t2 && *t2 > 0 {
            return None;
        }
        if !Self::status_ok(options) {
            return None;
        }
        let IaAddr { addr, preferred_lifetime, valid_lifetime, options: addr_options } =
            ia_na.ia_addr()?;
        if preferred_lifetime > valid_lifetime {
            return None;
        }
        if !Self::status_ok(addr_options) {
            return None;
        }

        let mut t1 = *t1;
        let mut t2 = *t2;
        if t1 == 0 {
            t1 = preferred_lifetime / 2;
        }
        if t2 == 0 {
            t2 = t1 + t1 / 2;
        }
        Some((*addr, (t1, t2, *preferred_lifetime, *valid_lifetime)))
    }
}

impl UdpReceiver for Dhcpv6Client {
    fn on_datagram(&self, _meta: &UdpMetadata, payload: &[u8]) {
        if payload.len() < HEADER_SIZE {
            return;
        }
        let message = match parse::parse(payload) {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "dropping malformed DHCPv6 message");
                return;
            }
        };
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            Dhcpv6State::Solicit => self.handle_advertise(&mut inner, &message),
            Dhcpv6State::Request
            | Dhcpv6State::Confirm
            | Dhcpv6State::Renew
            | Dhcpv6State::Rebind
            | Dhcpv6State::Decline => {
                let _ = self.handle_reply(&mut inner, &message);
            }
            Dhcpv6State::Init | Dhcpv6State::InitConfirm | Dhcpv6State::Bound => {}
        }
        self.unlock_and_dispatch(inner);
    }
}

impl Drop for Dhcpv6Client {
    fn drop(&mut self) {
        self.settings.iface.unregister_udp_receiver(CLIENT_PORT);
    }
}
