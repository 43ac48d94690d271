// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The DHCPv4 client state machine (RFC 2131 section 4.4).
//!
//! The client walks INIT → SELECTING → REQUESTING → BOUND with the
//! RENEWING/REBINDING lease-extension loop, or INIT-REBOOT → REBOOTING when
//! a previous lease is being revalidated after a link transition. All
//! retransmissions use exponential backoff with a ±1 s uniform jitter.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rand::{rngs::StdRng, RngCore, SeedableRng as _};
use tracing::{debug, info, warn};

use crate::deps::{UdpMetadata, UdpReceiver, UdpSender};
use crate::dhcpv4::parse::{
    self, option_code, DhcpOption, Message, MessageType, OpCode, MAX_MESSAGE_SIZE, MIN_PARSE_SIZE,
};
use crate::dhcpv4::{CLIENT_PORT, SERVER_PORT};
use crate::iface::{AddrState, NetInterface, IPV4_MAX_DNS_SERVERS};
use crate::time::{apply_jitter, rand_range, Clock, Millis, SystemClock, INFINITE_LIFETIME};
use crate::Error;

/// Maximum host name length advertised in option 12.
pub const MAX_HOSTNAME_LEN: usize = 16;

const IPV4_DEFAULT_TTL: u8 = 64;

/// Option codes requested from the server in every DHCPREQUEST.
const PARAM_REQUEST_LIST: [u8; 7] = [
    option_code::SUBNET_MASK,
    option_code::ROUTER,
    option_code::DNS_SERVER,
    option_code::INTERFACE_MTU,
    option_code::LEASE_TIME,
    option_code::RENEWAL_T1,
    option_code::REBINDING_T2,
];

/// DHCPv4 client FSM states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Dhcpv4State {
    /// Waiting to begin an acquisition attempt.
    #[default]
    Init,
    /// Broadcasting DHCPDISCOVER, collecting offers.
    Selecting,
    /// Requesting the selected offer.
    Requesting,
    /// Waiting to revalidate a previous lease.
    InitReboot,
    /// Revalidating a previous lease after reboot or link flap.
    Rebooting,
    /// Holding a valid lease.
    Bound,
    /// Extending the lease with the granting server.
    Renewing,
    /// Extending the lease with any server.
    Rebinding,
}

impl Dhcpv4State {
    /// Whether a previous lease exists, making INIT-REBOOT the re-entry
    /// point after a link transition.
    fn has_lease(self) -> bool {
        match self {
            Dhcpv4State::Init | Dhcpv4State::Selecting | Dhcpv4State::Requesting => false,
            Dhcpv4State::InitReboot
            | Dhcpv4State::Rebooting
            | Dhcpv4State::Bound
            | Dhcpv4State::Renewing
            | Dhcpv4State::Rebinding => true,
        }
    }
}

/// Protocol timing, in milliseconds unless noted. The defaults are the
/// standard values; tests shrink them to keep runs fast.
#[derive(Copy, Clone, Debug)]
pub struct Dhcpv4Timing {
    /// Upper bound of the random delay before the first DHCPDISCOVER.
    pub init_delay: u64,
    /// Initial DHCPDISCOVER retransmission timeout.
    pub discover_init_rt: u64,
    /// Cap on the DHCPDISCOVER retransmission timeout.
    pub discover_max_rt: u64,
    /// Initial DHCPREQUEST retransmission timeout.
    pub request_init_rt: u64,
    /// Cap on the DHCPREQUEST retransmission timeout.
    pub request_max_rt: u64,
    /// Maximum DHCPREQUEST transmissions (a count, not ms).
    pub request_max_rc: u32,
    /// Floor on the renew/rebind retransmission interval.
    pub request_min_delay: u64,
    /// Half-width of the uniform jitter applied to every timeout.
    pub rand_factor: u64,
}

impl Default for Dhcpv4Timing {
    fn default() -> Dhcpv4Timing {
        Dhcpv4Timing {
            init_delay: 2000,
            discover_init_rt: 4000,
            discover_max_rt: 64000,
            request_init_rt: 4000,
            request_max_rt: 64000,
            request_max_rc: 4,
            request_min_delay: 60000,
            rand_factor: 1000,
        }
    }
}

/// DHCPv4 client configuration.
///
/// Built with [`Dhcpv4ClientSettings::new`] and struct-update syntax for
/// the optional fields.
pub struct Dhcpv4ClientSettings {
    /// Interface to configure.
    pub iface: Arc<NetInterface>,
    /// UDP transmit path.
    pub udp: Arc<dyn UdpSender>,
    /// Monotonic time source.
    pub clock: Arc<dyn Clock>,
    /// Host name override; the interface host name is used when `None`.
    pub hostname: Option<String>,
    /// Offer to complete the exchange in two messages (RFC 4039).
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
    pub state_change_event: Option<Box<dyn Fn(Dhcpv4State) + Send + Sync>>,
    /// Protocol timing.
    pub timing: Dhcpv4Timing,
    /// Randomness source override, mainly for tests.
    pub rng: Option<Box<dyn RngCore + Send + Sync>>,
}

impl Dhcpv4ClientSettings {
    /// Settings with every optional field at its default.
    pub fn new(iface: Arc<NetInterface>, udp: Arc<dyn UdpSender>) -> Dhcpv4ClientSettings {
        Dhcpv4ClientSettings {
            iface,
            udp,
            clock: Arc::new(SystemClock::new()),
            hostname: None,
            rapid_commit: false,
            manual_dns_config: false,
            timeout: 0,
            timeout_event: None,
            link_change_event: None,
            state_change_event: None,
            timing: Dhcpv4Timing::default(),
            rng: None,
        }
    }
}

/// Callback work queued under the lock and delivered after it is released,
/// so a callback may call back into the client without deadlocking.
enum Notification {
    StateChange(Dhcpv4State),
    Timeout,
    LinkChange(bool),
}

struct Inner {
    running: bool,
    state: Dhcpv4State,
    timestamp: Millis,
    timeout: u64,
    retransmit_timeout: u64,
    retransmit_count: u32,
    config_start: Millis,
    lease_start: Millis,
    xid: u32,
    requested_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    lease_time: u32,
    t1: u32,
    t2: u32,
    timeout_event_fired: bool,
    rng: Box<dyn RngCore + Send + Sync>,
    pending: Vec<Notification>,
}

/// A DHCPv4 client bound to one interface.
///
/// Construction registers the client as the UDP receiver for port 68 on
/// its interface; dropping the client releases the slot.
pub struct Dhcpv4Client {
    settings: Dhcpv4ClientSettings,
    hostname: String,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Dhcpv4Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dhcpv4Client").field("hostname", &self.hostname).finish_non_exhaustive()
    }
}

fn truncate_hostname(name: &str) -> String {
    let mut end = name.len().min(MAX_HOSTNAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

impl Dhcpv4Client {
    /// Creates the client and claims the interface's port-68 receive slot.
    pub fn new(mut settings: Dhcpv4ClientSettings) -> Result<Arc<Dhcpv4Client>, Error> {
        let Dhcpv4Timing { discover_init_rt, request_init_rt, request_max_rc, .. } =
            settings.timing;
        if discover_init_rt == 0 || request_init_rt == 0 {
            return Err(Error::InvalidParameter("initial retransmission timeout must be nonzero"));
        }
        if request_max_rc == 0 {
            return Err(Error::InvalidParameter("request_max_rc must be nonzero"));
        }

        let rng = settings
            .rng
            .take()
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()) as Box<dyn RngCore + Send + Sync>);
        let hostname = truncate_hostname(
            settings.hostname.as_deref().unwrap_or_else(|| settings.iface.hostname()),
        );

        let client = Arc::new(Dhcpv4Client {
            hostname,
            inner: Mutex::new(Inner {
                running: false,
                state: Dhcpv4State::Init,
                timestamp: Millis::ZERO,
                timeout: 0,
                retransmit_timeout: 0,
                retransmit_count: 0,
                config_start: Millis::ZERO,
                lease_start: Millis::ZERO,
                xid: 0,
                requested_ip: Ipv4Addr::UNSPECIFIED,
                server_ip: Ipv4Addr::UNSPECIFIED,
                lease_time: 0,
                t1: 0,
                t2: 0,
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
        inner.state = Dhcpv4State::Init;
        info!(iface = %self.settings.iface.name(), "DHCPv4 client started");
    }

    /// Suspends the client. The state resets to INIT and no further
    /// datagrams or timer transitions are produced until [`Self::start`].
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        inner.state = Dhcpv4State::Init;
        info!(iface = %self.settings.iface.name(), "DHCPv4 client stopped");
    }

    /// Snapshot of the FSM state.
    pub fn state(&self) -> Dhcpv4State {
        self.inner.lock().unwrap().state
    }

    /// Advances the state machine. Must be invoked periodically by the
    /// stack, at a cadence between 100 ms and 1 s.
    pub fn tick(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            Dhcpv4State::Init => self.state_init(&mut inner),
            Dhcpv4State::Selecting => self.state_selecting(&mut inner),
            Dhcpv4State::Requesting => self.state_requesting(&mut inner),
            Dhcpv4State::InitReboot => self.state_init_reboot(&mut inner),
            Dhcpv4State::Rebooting => self.state_rebooting(&mut inner),
            Dhcpv4State::Bound => self.state_bound(&mut inner),
            Dhcpv4State::Renewing => self.state_renewing(&mut inner),
            Dhcpv4State::Rebinding => self.state_rebinding(&mut inner),
        }
        self.unlock_and_dispatch(inner);
    }

    /// Reacts to a link transition: the configured address is invalidated
    /// and the FSM re-enters INIT, or INIT-REBOOT when a lease exists.
    pub fn on_link_change(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            self.settings.iface.set_host_addr(None, AddrState::Invalid);
            self.settings.iface.set_subnet_mask(None);
        }
        inner.state =
            if inner.state.has_lease() { Dhcpv4State::InitReboot } else { Dhcpv4State::Init };
        let up = self.settings.iface.link_up();
        debug!(up, state = ?inner.state, "DHCPv4 client observed link change");
        inner.pending.push(Notification::LinkChange(up));
        self.unlock_and_dispatch(inner);
    }

    /// Broadcasts a DHCPDECLINE for the currently offered address and
    /// restarts acquisition. The caller detects the address conflict (for
    /// example through ARP) and invokes this.
    pub fn decline(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.send_decline(&mut inner);
        self.change_state(&mut inner, Dhcpv4State::Init, 0);
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

    fn change_state(&self, inner: &mut Inner, state: Dhcpv4State, delay: u64) {
        inner.timestamp = self.now();
        inner.timeout = delay;
        inner.retransmit_count = 0;
        inner.state = state;
        info!(iface = %self.settings.iface.name(), state = ?state, "DHCPv4 client state");
        inner.pending.push(Notification::StateChange(state));
    }

    /// Fires the advisory acquisition-timeout callback, at most once per
    /// acquisition cycle.
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

    fn state_init(&self, inner: &mut Inner) {
        if !inner.running || !self.settings.iface.link_up() {
            return;
        }
        let delay =
            rand_range(&mut inner.rng, 0, self.settings.timing.init_delay as i64) as u64;
        inner.config_start = self.now();
        inner.timeout_event_fired = false;
        self.change_state(inner, Dhcpv4State::Selecting, delay);
    }

    fn state_selecting(&self, inner: &mut Inner) {
        let now = self.now();
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            let timing = self.settings.timing;
            if inner.retransmit_count == 0 {
                inner.xid = inner.rng.next_u32();
                self.send_discover(inner);
                inner.retransmit_timeout = timing.discover_init_rt;
            } else {
                self.send_discover(inner);
                inner.retransmit_timeout =
                    (inner.retransmit_timeout * 2).min(timing.discover_max_rt);
            }
            inner.timestamp = now;
            let jitter =
                rand_range(&mut inner.rng, -(timing.rand_factor as i64), timing.rand_factor as i64);
            inner.timeout = apply_jitter(inner.retransmit_timeout, jitter);
            inner.retransmit_count += 1;
        }
        self.check_timeout(inner);
    }

    /// Shared by REQUESTING and REBOOTING, which differ only in the
    /// DHCPREQUEST contents produced by [`Self::send_request`].
    fn request_with_backoff(&self, inner: &mut Inner) {
        let now = self.now();
        if now.elapsed_since(inner.timestamp) >= inner.timeout {
            let timing = self.settings.timing;
            if inner.retransmit_count == 0 {
                inner.xid = inner.rng.next_u32();
                self.send_request(inner);
                inner.retransmit_timeout = timing.request_init_rt;
            } else if inner.retransmit_count < timing.request_max_rc {
                self.send_request(inner);
                inner.retransmit_timeout =
                    (inner.retransmit_timeout * 2).min(timing.request_max_rt);
            } else {
                // No server answered; restart the initialization procedure.
                self.change_state(inner, Dhcpv4State::Init, 0);
                return;
            }
            inner.timestamp = now;
            let jitter =
                rand_range(&mut inner.rng, -(timing.rand_factor as i64), timing.rand_factor as i64);
            inner.timeout = apply_jitter(inner.retransmit_timeout, jitter);
            inner.retransmit_count += 1;
        }
        self.check_timeout(inner);
    }

    fn state_requesting(&self, inner: &mut Inner) {
        self.request_with_backoff(inner);
    }

    fn state_init_reboot(&self, inner: &mut Inner) {
        if !inner.running || !self.settings.iface.link_up() {
            return;
        }
        let delay =
            rand_range(&mut inner.rng, 0, self.settings.timing.init_delay as i64) as u64;
        inner.config_start = self.now();
        inner.timeout_event_fired = false;
        self.change_state(inner, Dhcpv4State::Rebooting, delay);
    }

    fn state_rebooting(&self, inner: &mut Inner) {
        self.request_with_backoff(inner);
    }

    fn state_bound(&self, inner: &mut Inner) {
        if inner.t1 == INFINITE_LIFETIME {
            return;
        }
        let now = self.now();
        if now.elapsed_since(inner.lease_start) >= u64::from(inner.t1) * 1000 {
            inner.config_start = now;
            self.change_state(inner, Dhcpv4State::Renewing, 0);
        }
    }

    fn state_renewing(&self, inner: &mut Inner) {
        let now = self.now();
        if now.elapsed_since(inner.timestamp) < inner.timeout {
            return;
        }
        let t2_deadline = inner.lease_start.add_ms(u64::from(inner.t2) * 1000);
        if now < t2_deadline {
            if inner.retransmit_count == 0 {
                inner.xid = inner.rng.next_u32();
            }
            self.send_request(inner);
            inner.timestamp = now;
            // Wait one-half of the remaining time until T2, down to a
            // minimum of 60 seconds, before retransmitting.
            inner.timeout = t2_deadline.elapsed_since(now);
            if inner.timeout > 2 * self.settings.timing.request_min_delay {
                inner.timeout /= 2;
            }
            inner.retransmit_count += 1;
        } else {
            self.change_state(inner, Dhcpv4State::Rebinding, 0);
        }
    }

    fn state_rebinding(&self, inner: &mut Inner) {
        let now = self.now();
        if now.elapsed_since(inner.timestamp) < inner.timeout {
            return;
        }
        let lease_deadline = inner.lease_start.add_ms(u64::from(inner.lease_time) * 1000);
        if now < lease_deadline {
            if inner.retransmit_count == 0 {
                inner.xid = inner.rng.next_u32();
            }
            self.send_request(inner);
            inner.timestamp = now;
            inner.timeout = lease_deadline.elapsed_since(now);
            if inner.timeout > 2 * self.settings.timing.request_min_delay {
                inner.timeout /= 2;
            }
            inner.retransmit_count += 1;
        } else {
            // Lease expired without an acknowledgment.
            self.settings.iface.set_host_addr(None, AddrState::Invalid);
            self.settings.iface.set_subnet_mask(None);
            self.change_state(inner, Dhcpv4State::Init, 0);
        }
    }

    fn elapsed_secs(&self, inner: &Inner) -> u16 {
        let secs = self.now().elapsed_since(inner.config_start) / 1000;
        secs.min(0xffff) as u16
    }

    fn transmit(&self, message: &Message, dst_ip: Ipv4Addr) {
        let bytes = parse::serialize(message);
        if let Err(error) = self.settings.udp.send_datagram(
            &self.settings.iface,
            CLIENT_PORT,
            IpAddr::V4(dst_ip),
            SERVER_PORT,
            &bytes,
            IPV4_DEFAULT_TTL,
        ) {
            // Treated as a no-op; the next retransmission tick retries.
            warn!(%error, "failed to send DHCP message");
        }
    }

    fn send_discover(&self, inner: &mut Inner) {
        let mut message = Message::new_request(inner.xid, self.settings.iface.mac());
        message.secs = self.elapsed_secs(inner);
        message.broadcast = true;
        message.options.push(DhcpOption::MessageType(MessageType::Discover));
        if !self.hostname.is_empty() {
            message.options.push(DhcpOption::HostName(self.hostname.clone()));
        }
        if self.settings.rapid_commit {
            message.options.push(DhcpOption::RapidCommit);
        }
        debug!(xid = inner.xid, "sending DHCPDISCOVER");
        self.transmit(&message, Ipv4Addr::BROADCAST);
    }

    fn send_request(&self, inner: &mut Inner) {
        let mut message = Message::new_request(inner.xid, self.settings.iface.mac());
        message.secs = self.elapsed_secs(inner);
        match inner.state {
            Dhcpv4State::Renewing | Dhcpv4State::Rebinding => {
                // The client address is included once the client is fully
                // configured and can respond to ARP requests.
                message.broadcast = false;
                message.ciaddr = self.settings.iface.ipv4_config().addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
            }
            _ => {
                message.broadcast = true;
            }
        }
        message.options.push(DhcpOption::MessageType(MessageType::Request));
        if !self.hostname.is_empty() {
            message.options.push(DhcpOption::HostName(self.hostname.clone()));
        }
        if inner.state == Dhcpv4State::Requesting {
            message.options.push(DhcpOption::ServerIdentifier(inner.server_ip));
        }
        if matches!(inner.state, Dhcpv4State::Requesting | Dhcpv4State::Rebooting) {
            message.options.push(DhcpOption::RequestedIpAddress(inner.requested_ip));
        }
        message.options.push(DhcpOption::ParameterRequestList(PARAM_REQUEST_LIST.to_vec()));

        let dst = if inner.state == Dhcpv4State::Renewing {
            inner.server_ip
        } else {
            Ipv4Addr::BROADCAST
        };
        debug!(xid = inner.xid, state = ?inner.state, "sending DHCPREQUEST");
        self.transmit(&message, dst);
    }

    fn send_decline(&self, inner: &mut Inner) {
        let mut message = Message::new_request(inner.xid, self.settings.iface.mac());
        message.options.push(DhcpOption::MessageType(MessageType::Decline));
        message.options.push(DhcpOption::ServerIdentifier(inner.server_ip));
        message.options.push(DhcpOption::RequestedIpAddress(inner.requested_ip));
        debug!(addr = %inner.requested_ip, "sending DHCPDECLINE");
        self.transmit(&message, Ipv4Addr::BROADCAST);
    }

    /// Common reply validation: framing fields, transaction id and
    /// hardware address. Returns false when the message is not addressed
    /// to this exchange.
    fn reply_matches(&self, inner: &Inner, message: &Message) -> bool {
        message.op == OpCode::BootReply
            && message.htype == 1
            && usize::from(message.hlen) == 6
            && message.xid == inner.xid
            && message.chaddr == self.settings.iface.mac()
    }

    fn handle_offer(&self, inner: &mut Inner, message: &Message) {
        if !self.reply_matches(inner, message) || message.yiaddr.is_unspecified() {
            return;
        }
        match message.message_type() {
            Some(MessageType::Offer) => {}
            _ => return,
        }
        let server_ip = match message.find_option(option_code::SERVER_IDENTIFIER) {
            Some(DhcpOption::ServerIdentifier(addr)) => *addr,
            _ => return,
        };
        inner.server_ip = server_ip;
        inner.requested_ip = message.yiaddr;
        debug!(yiaddr = %message.yiaddr, server = %server_ip, "accepted DHCPOFFER");
        self.change_state(inner, Dhcpv4State::Requesting, 0);
    }

    fn handle_ack_nak(&self, inner: &mut Inner, message: &Message) {
        if !self.reply_matches(inner, message) {
            return;
        }
        match message.message_type() {
            Some(MessageType::Nak) => {
                // The address is no longer appropriate for the link.
                self.settings.iface.set_host_addr(None, AddrState::Invalid);
                self.settings.iface.set_subnet_mask(None);
                debug!("DHCPNAK received, restarting configuration");
                self.change_state(inner, Dhcpv4State::Init, 0);
            }
            Some(MessageType::Ack) => self.commit_ack(inner, message),
            _ => {}
        }
    }

    fn commit_ack(&self, inner: &mut Inner, message: &Message) {
        match message.find_option(option_code::SERVER_IDENTIFIER) {
            Some(DhcpOption::ServerIdentifier(addr)) if *addr == inner.server_ip => {}
            _ => return,
        }
        let lease_time = match message.find_option(option_code::LEASE_TIME) {
            Some(DhcpOption::LeaseTime(secs)) => *secs,
            _ => return,
        };
        inner.lease_time = lease_time;

        inner.t1 = match message.find_option(option_code::RENEWAL_T1) {
            Some(DhcpOption::RenewalT1(secs)) => *secs,
            _ if lease_time != INFINITE_LIFETIME => lease_time / 2,
            _ => INFINITE_LIFETIME,
        };
        inner.t2 = match message.find_option(option_code::REBINDING_T2) {
            Some(DhcpOption::RebindingT2(secs)) => *secs,
            _ if lease_time != INFINITE_LIFETIME => (u64::from(lease_time) * 7 / 8) as u32,
            _ => INFINITE_LIFETIME,
        };

        let iface = &self.settings.iface;
        if let Some(DhcpOption::SubnetMask(mask)) = message.find_option(option_code::SUBNET_MASK) {
            iface.set_subnet_mask(Some(*mask));
        }
        if let Some(DhcpOption::Router(routers)) = message.find_option(option_code::ROUTER) {
            if let Some(first) = routers.first() {
                iface.set_default_gateway(Some(*first));
            }
        }
        if !self.settings.manual_dns_config {
            if let Some(DhcpOption::DomainNameServer(servers)) =
                message.find_option(option_code::DNS_SERVER)
            {
                for (i, server) in servers.iter().take(IPV4_MAX_DNS_SERVERS).enumerate() {
                    iface.set_dns_server(i, *server);
                }
            }
        }
        if let Some(DhcpOption::InterfaceMtu(mtu)) = message.find_option(option_code::INTERFACE_MTU)
        {
            // RFC 2132: the minimum legal MTU value is 68.
            if *mtu >= 68 {
                iface.set_mtu(*mtu);
            }
        }

        iface.set_host_addr(Some(message.yiaddr), AddrState::Valid);
        inner.lease_start = self.now();
        info!(
            iface = %iface.name(),
            addr = %message.yiaddr,
            lease = inner.lease_time,
            t1 = inner.t1,
            t2 = inner.t2,
            "DHCPv4 lease acquired"
        );
        self.change_state(inner, Dhcpv4State::Bound, 0);
    }
}

impl UdpReceiver for Dhcpv4Client {
    fn on_datagram(&self, _meta: &UdpMetadata, payload: &[u8]) {
        if payload.len() < MIN_PARSE_SIZE || payload.len() > MAX_MESSAGE_SIZE {
            return;
        }
        let message = match parse::parse(payload) {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "dropping malformed DHCP message");
                return;
            }
        };
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            Dhcpv4State::Selecting => self.handle_offer(&mut inner, &message),
            Dhcpv4State::Requesting
            | Dhcpv4State::Rebooting
            | Dhcpv4State::Renewing
            | Dhcpv4State::Rebinding => self.handle_ack_nak(&mut inner, &message),
            Dhcpv4State::Init | Dhcpv4State::InitReboot | Dhcpv4State::Bound => {}
        }
        self.unlock_and_dispatch(inner);
    }
}

impl Drop for Dhcpv4Client {
    fn drop(&mut self) {
        self.settings.iface.unregister_udp_receiver(CLIENT_PORT);
    }
}
