// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing and serialization of DHCPv6 messages (RFC 3315 section 22).
//!
//! Options are TLV with 2-byte code and 2-byte length, big-endian, and may
//! nest: an IA_NA carries IA Address sub-options, which in turn may carry a
//! Status Code. A recognized option whose payload does not have the
//! expected shape degrades to [`Dhcpv6Option::Unknown`] so that one bad
//! option never poisons the rest of the message; only structurally broken
//! TLV framing fails the whole parse.

use std::net::Ipv6Addr;

/// Fixed message header: 1-byte type, 3-byte transaction id.
pub const HEADER_SIZE: usize = 4;

/// Sub-option nesting bound; real messages stop at IA_NA → IA Address →
/// Status Code.
const MAX_OPTION_DEPTH: usize = 4;

/// DHCPv6 message types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Client locates servers.
    Solicit = 1,
    /// Server answers a Solicit.
    Advertise = 2,
    /// Client requests addresses from a chosen server.
    Request = 3,
    /// Client checks whether its addresses still fit the link.
    Confirm = 4,
    /// Client extends lifetimes with the granting server.
    Renew = 5,
    /// Client extends lifetimes with any server.
    Rebind = 6,
    /// Server response carrying addresses or status.
    Reply = 7,
    /// Client releases addresses.
    Release = 8,
    /// Client reports an address already in use.
    Decline = 9,
    /// Server-initiated reconfiguration.
    Reconfigure = 10,
    /// Stateless configuration request.
    InformationRequest = 11,
}

impl MessageType {
    fn from_wire(value: u8) -> Option<MessageType> {
        match value {
            1 => Some(MessageType::Solicit),
            2 => Some(MessageType::Advertise),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Confirm),
            5 => Some(MessageType::Renew),
            6 => Some(MessageType::Rebind),
            7 => Some(MessageType::Reply),
            8 => Some(MessageType::Release),
            9 => Some(MessageType::Decline),
            10 => Some(MessageType::Reconfigure),
            11 => Some(MessageType::InformationRequest),
            _ => None,
        }
    }
}

/// Option codes (RFC 3315 / RFC 3646 / RFC 4704 numbering).
pub mod option_code {
    /// Client Identifier.
    pub const CLIENT_ID: u16 = 1;
    /// Server Identifier.
    pub const SERVER_ID: u16 = 2;
    /// Identity Association for Non-temporary Addresses.
    pub const IA_NA: u16 = 3;
    /// IA Address, nested inside an IA.
    pub const IA_ADDR: u16 = 5;
    /// Option Request Option.
    pub const ORO: u16 = 6;
    /// Server preference.
    pub const PREFERENCE: u16 = 7;
    /// Elapsed Time.
    pub const ELAPSED_TIME: u16 = 8;
    /// Status Code.
    pub const STATUS_CODE: u16 = 13;
    /// Rapid Commit.
    pub const RAPID_COMMIT: u16 = 14;
    /// DNS Recursive Name Servers (RFC 3646).
    pub const DNS_SERVERS: u16 = 23;
    /// Domain Search List (RFC 3646).
    pub const DOMAIN_LIST: u16 = 24;
    /// Client FQDN (RFC 4704).
    pub const FQDN: u16 = 39;
}

/// Status codes carried in option 13.
pub mod status_code {
    /// Success.
    pub const SUCCESS: u16 = 0;
    /// Unspecified failure.
    pub const UNSPEC_FAIL: u16 = 1;
    /// No addresses available for assignment.
    pub const NO_ADDRS_AVAIL: u16 = 2;
    /// Client binding unknown to the server.
    pub const NO_BINDING: u16 = 3;
    /// Prefix not appropriate for the link.
    pub const NOT_ON_LINK: u16 = 4;
    /// Client must use multicast.
    pub const USE_MULTICAST: u16 = 5;
}

/// Highest value the Preference option can carry; it short-circuits server
/// selection.
pub const MAX_SERVER_PREFERENCE: u8 = 255;

/// An IA Address option nested inside an IA (RFC 3315 section 22.6).
#[derive(Clone, Debug, PartialEq)]
pub struct IaAddr {
    /// The assigned or requested address.
    pub addr: Ipv6Addr,
    /// Preferred lifetime, seconds.
    pub preferred_lifetime: u32,
    /// Valid lifetime, seconds.
    pub valid_lifetime: u32,
    /// Sub-options (typically a Status Code).
    pub options: Vec<Dhcpv6Option>,
}

/// An IA_NA option (RFC 3315 section 22.4).
#[derive(Clone, Debug, PartialEq)]
pub struct IaNa {
    /// IA identifier; this client derives it from the interface index.
    pub iaid: u32,
    /// Renew timer, seconds.
    pub t1: u32,
    /// Rebind timer, seconds.
    pub t2: u32,
    /// Sub-options (IA Address, Status Code).
    pub options: Vec<Dhcpv6Option>,
}

impl IaNa {
    /// First nested IA Address option, if any.
    pub fn ia_addr(&self) -> Option<&IaAddr> {
        self.options.iter().find_map(|option| match option {
            Dhcpv6Option::IaAddr(ia_addr) => Some(ia_addr),
            _ => None,
        })
    }
}

/// A single DHCPv6 option.
#[derive(Clone, Debug, PartialEq)]
pub enum Dhcpv6Option {
    /// Option 1, a client DUID.
    ClientId(Vec<u8>),
    /// Option 2, a server DUID.
    ServerId(Vec<u8>),
    /// Option 3.
    IaNa(IaNa),
    /// Option 5; only meaningful nested inside an IA.
    IaAddr(IaAddr),
    /// Option 6, codes the client wants the server to return.
    Oro(Vec<u16>),
    /// Option 7.
    Preference(u8),
    /// Option 8, hundredths of a second.
    ElapsedTime(u16),
    /// Option 13.
    StatusCode {
        /// Numeric status, see [`status_code`].
        code: u16,
        /// Server-provided UTF-8 explanation.
        message: String,
    },
    /// Option 14, zero length.
    RapidCommit,
    /// Option 23.
    DnsServers(Vec<Ipv6Addr>),
    /// Option 24, raw encoded domain search list.
    DomainList(Vec<u8>),
    /// Option 39.
    Fqdn {
        /// N/O/S flag byte.
        flags: u8,
        /// DNS-encoded domain name.
        name: Vec<u8>,
    },
    /// Any option this client does not interpret, carried verbatim.
    Unknown {
        /// Option code.
        code: u16,
        /// Raw option payload.
        data: Vec<u8>,
    },
}

impl Dhcpv6Option {
    /// The wire code of this option.
    pub fn code(&self) -> u16 {
        match self {
            Dhcpv6Option::ClientId(_) => option_code::CLIENT_ID,
            Dhcpv6Option::ServerId(_) => option_code::SERVER_ID,
            Dhcpv6Option::IaNa(_) => option_code::IA_NA,
            Dhcpv6Option::IaAddr(_) => option_code::IA_ADDR,
            Dhcpv6Option::Oro(_) => option_code::ORO,
            Dhcpv6Option::Preference(_) => option_code::PREFERENCE,
            Dhcpv6Option::ElapsedTime(_) => option_code::ELAPSED_TIME,
            Dhcpv6Option::StatusCode { .. } => option_code::STATUS_CODE,
            Dhcpv6Option::RapidCommit => option_code::RAPID_COMMIT,
            Dhcpv6Option::DnsServers(_) => option_code::DNS_SERVERS,
            Dhcpv6Option::DomainList(_) => option_code::DOMAIN_LIST,
            Dhcpv6Option::Fqdn { .. } => option_code::FQDN,
            Dhcpv6Option::Unknown { code, data: _ } => *code,
        }
    }
}

/// A DHCPv6 message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Message type.
    pub msg_type: MessageType,
    /// 24-bit transaction id; the top byte is always zero.
    pub transaction_id: u32,
    /// Options in wire order.
    pub options: Vec<Dhcpv6Option>,
}

impl Message {
    /// An empty message for the given exchange.
    pub fn new(msg_type: MessageType, transaction_id: u32) -> Message {
        Message { msg_type, transaction_id: transaction_id & 0x00ff_ffff, options: Vec::new() }
    }

    /// Returns the first option matching `code`, if any.
    pub fn find_option(&self, code: u16) -> Option<&Dhcpv6Option> {
        self.options.iter().find(|option| option.code() == code)
    }

    /// Iterates every top-level IA_NA option.
    pub fn ia_na_options(&self) -> impl Iterator<Item = &IaNa> {
        self.options.iter().filter_map(|option| match option {
            Dhcpv6Option::IaNa(ia_na) => Some(ia_na),
            _ => None,
        })
    }
}

/// Reasons an incoming buffer failed to parse as a DHCPv6 message.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    /// Shorter than the 4-byte header.
    #[error("message truncated ({0} bytes)")]
    Truncated(usize),
    /// The type byte named no known message.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    /// A TLV header or body extended past the buffer.
    #[error("truncated option")]
    TruncatedOption,
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_ipv6(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    Ipv6Addr::from(octets)
}

fn parse_ia_na(data: &[u8], depth: usize) -> Option<IaNa> {
    if data.len() < 12 {
        return None;
    }
    Some(IaNa {
        iaid: read_u32(&data[0..4]),
        t1: read_u32(&data[4..8]),
        t2: read_u32(&data[8..12]),
        options: parse_options(&data[12..], depth).ok()?,
    })
}

fn parse_ia_addr(data: &[u8], depth: usize) -> Option<IaAddr> {
    if data.len() < 24 {
        return None;
    }
    Some(IaAddr {
        addr: read_ipv6(&data[0..16]),
        preferred_lifetime: read_u32(&data[16..20]),
        valid_lifetime: read_u32(&data[20..24]),
        options: parse_options(&data[24..], depth).ok()?,
    })
}

fn parse_options(mut bytes: &[u8], depth: usize) -> Result<Vec<Dhcpv6Option>, ParseError> {
    let mut options = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return Err(ParseError::TruncatedOption);
        }
        let code = read_u16(&bytes[0..2]);
        let len = usize::from(read_u16(&bytes[2..4]));
        if bytes.len() < 4 + len {
            return Err(ParseError::TruncatedOption);
        }
        let data = &bytes[4..4 + len];
        bytes = &bytes[4 + len..];

        let unknown = || Dhcpv6Option::Unknown { code, data: data.to_vec() };
        let option = match code {
            option_code::CLIENT_ID => Dhcpv6Option::ClientId(data.to_vec()),
            option_code::SERVER_ID => Dhcpv6Option::ServerId(data.to_vec()),
            option_code::IA_NA if depth < MAX_OPTION_DEPTH => {
                match parse_ia_na(data, depth + 1) {
                    Some(ia_na) => Dhcpv6Option::IaNa(ia_na),
                    None => unknown(),
                }
            }
            option_code::IA_ADDR if depth < MAX_OPTION_DEPTH => {
                match parse_ia_addr(data, depth + 1) {
                    Some(ia_addr) => Dhcpv6Option::IaAddr(ia_addr),
                    None => unknown(),
                }
            }
            option_code::ORO if len % 2 == 0 => {
                Dhcpv6Option::Oro(data.chunks_exact(2).map(read_u16).collect())
            }
            option_code::PREFERENCE if len == 1 => Dhcpv6Option::Preference(data[0]),
            option_code::ELAPSED_TIME if len == 2 => Dhcpv6Option::ElapsedTime(read_u16(data)),
            option_code::STATUS_CODE if len >= 2 => Dhcpv6Option::StatusCode {
                code: read_u16(data),
                message: String::from_utf8_lossy(&data[2..]).into_owned(),
            },
            option_code::RAPID_COMMIT if len == 0 => Dhcpv6Option::RapidCommit,
            option_code::DNS_SERVERS if len % 16 == 0 => {
                Dhcpv6Option::DnsServers(data.chunks_exact(16).map(read_ipv6).collect())
            }
            option_code::DOMAIN_LIST => Dhcpv6Option::DomainList(data.to_vec()),
            option_code::FQDN if len >= 1 => {
                Dhcpv6Option::Fqdn { flags: data[0], name: data[1..].to_vec() }
            }
            _ => unknown(),
        };
        options.push(option);
    }
    Ok(options)
}

/// Parses one message from `bytes`.
pub fn parse(bytes: &[u8]) -> Result<Message, ParseError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ParseError::Truncated(bytes.len()));
    }
    let msg_type =
        MessageType::from_wire(bytes[0]).ok_or(ParseError::UnknownMessageType(bytes[0]))?;
    let transaction_id = u32::from(bytes[1]) << 16 | u32::from(bytes[2]) << 8 | u32::from(bytes[3]);
    Ok(Message { msg_type, transaction_id, options: parse_options(&bytes[HEADER_SIZE..], 0)? })
}

fn serialize_option_into(option: &Dhcpv6Option, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&option.code().to_be_bytes());
    let len_at = buf.len();
    buf.extend_from_slice(&[0, 0]);
    match option {
        Dhcpv6Option::ClientId(duid) | Dhcpv6Option::ServerId(duid) => {
            buf.extend_from_slice(duid);
        }
        Dhcpv6Option::IaNa(IaNa { iaid, t1, t2, options }) => {
            buf.extend_from_slice(&iaid.to_be_bytes());
            buf.extend_from_slice(&t1.to_be_bytes());
            buf.extend_from_slice(&t2.to_be_bytes());
            for sub in options {
                serialize_option_into(sub, buf);
            }
        }
        Dhcpv6Option::IaAddr(IaAddr { addr, preferred_lifetime, valid_lifetime, options }) => {
            buf.extend_from_slice(&addr.octets());
            buf.extend_from_slice(&preferred_lifetime.to_be_bytes());
            buf.extend_from_slice(&valid_lifetime.to_be_bytes());
            for sub in options {
                serialize_option_into(sub, buf);
            }
        }
        Dhcpv6Option::Oro(codes) => {
            for code in codes {
                buf.extend_from_slice(&code.to_be_bytes());
            }
        }
        Dhcpv6Option::Preference(preference) => buf.push(*preference),
        Dhcpv6Option::ElapsedTime(hundredths) => {
            buf.extend_from_slice(&hundredths.to_be_bytes());
        }
        Dhcpv6Option::StatusCode { code, message } => {
            buf.extend_from_slice(&code.to_be_bytes());
            buf.extend_from_slice(message.as_bytes());
        }
        Dhcpv6Option::RapidCommit => {}
        Dhcpv6Option::DnsServers(servers) => {
            for server in servers {
                buf.extend_from_slice(&server.octets());
            }
        }
        Dhcpv6Option::DomainList(data) => buf.extend_from_slice(data),
        Dhcpv6Option::Fqdn { flags, name } => {
            buf.push(*flags);
            buf.extend_from_slice(name);
        }
        Dhcpv6Option::Unknown { code: _, data } => buf.extend_from_slice(data),
    }
    let len = buf.len() - len_at - 2;
    debug_assert!(len <= usize::from(u16::MAX));
    buf[len_at..len_at + 2].copy_from_slice(&(len as u16).to_be_bytes());
}

/// Serializes `message` into its wire form.
pub fn serialize(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.push(message.msg_type as u8);
    let xid = message.transaction_id & 0x00ff_ffff;
    buf.push((xid >> 16) as u8);
    buf.push((xid >> 8) as u8);
    buf.push(xid as u8);
    for option in &message.options {
        serialize_option_into(option, &mut buf);
    }
    buf
}

/// Encodes `name` as DNS labels (length-prefixed, root-terminated) for the
/// Client FQDN option.
pub fn encode_dns_name(name: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|label| !label.is_empty()) {
        let bytes = label.as_bytes();
        let len = bytes.len().min(63);
        encoded.push(len as u8);
        encoded.extend_from_slice(&bytes[..len]);
    }
    encoded.push(0);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    const ADDR: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0xdead);

    fn full_message() -> Message {
        Message {
            msg_type: MessageType::Reply,
            transaction_id: 0x00ab_cdef,
            options: vec![
                Dhcpv6Option::ClientId(vec![0, 3, 0, 1, 2, 0, 0, 0, 0, 1]),
                Dhcpv6Option::ServerId(vec![0, 1, 0, 1, 9, 9, 9, 9, 1, 2, 3, 4, 5, 6]),
                Dhcpv6Option::IaNa(IaNa {
                    iaid: 1,
                    t1: 1800,
                    t2: 2880,
                    options: vec![
                        Dhcpv6Option::IaAddr(IaAddr {
                            addr: ADDR,
                            preferred_lifetime: 3600,
                            valid_lifetime: 7200,
                            options: vec![Dhcpv6Option::StatusCode {
                                code: status_code::SUCCESS,
                                message: "ok".to_owned(),
                            }],
                        }),
                        Dhcpv6Option::StatusCode {
                            code: status_code::SUCCESS,
                            message: String::new(),
                        },
                    ],
                }),
                Dhcpv6Option::Oro(vec![
                    option_code::DNS_SERVERS,
                    option_code::DOMAIN_LIST,
                    option_code::FQDN,
                ]),
                Dhcpv6Option::ElapsedTime(120),
                Dhcpv6Option::RapidCommit,
                Dhcpv6Option::Fqdn { flags: 0, name: encode_dns_name("camera-7") },
                Dhcpv6Option::DnsServers(vec![Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 53)]),
            ],
        }
    }

    #[test]
    fn serialize_parse_roundtrip_is_byte_exact() {
        let message = full_message();
        let bytes = serialize(&message);
        let reparsed = parse(&bytes).expect("parse back");
        assert_eq!(reparsed, message);
        // Byte-for-byte identity after a second serialization.
        assert_eq!(serialize(&reparsed), bytes);
    }

    #[test]
    fn transaction_id_is_24_bit() {
        let message = Message::new(MessageType::Solicit, 0xdead_beef);
        assert_eq!(message.transaction_id, 0x00ad_beef);
        let bytes = serialize(&message);
        assert_eq!(&bytes[..4], &[1, 0xad, 0xbe, 0xef]);
        assert_eq!(parse(&bytes).unwrap().transaction_id, 0x00ad_beef);
    }

    #[test_case(0; "empty buffer")]
    #[test_case(3; "three bytes")]
    fn short_header_is_rejected(len: usize) {
        assert_matches!(parse(&vec![1u8; len]), Err(ParseError::Truncated(_)));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert_matches!(parse(&[0xee, 0, 0, 1]), Err(ParseError::UnknownMessageType(0xee)));
    }

    #[test]
    fn truncated_option_is_rejected() {
        let mut bytes = serialize(&Message::new(MessageType::Reply, 1));
        bytes.extend_from_slice(&[0, 1, 0, 10, 0xff]);
        assert_matches!(parse(&bytes), Err(ParseError::TruncatedOption));
    }

    #[test]
    fn undersized_ia_na_degrades_to_unknown() {
        // An IA_NA whose payload cannot hold IAID/T1/T2 is kept as raw
        // bytes instead of failing the message.
        let mut bytes = serialize(&Message::new(MessageType::Reply, 1));
        bytes.extend_from_slice(&[0, 3, 0, 4, 1, 2, 3, 4]);
        let message = parse(&bytes).expect("message still parses");
        assert_matches!(
            &message.options[..],
            [Dhcpv6Option::Unknown { code: option_code::IA_NA, data }] => {
                assert_eq!(data, &[1, 2, 3, 4]);
            }
        );
        assert_eq!(message.ia_na_options().count(), 0);
    }

    #[test]
    fn ia_na_with_truncated_sub_option_degrades_to_unknown() {
        let mut bytes = serialize(&Message::new(MessageType::Reply, 1));
        // IA_NA with 12 header bytes plus a 3-byte fragment of a TLV.
        bytes.extend_from_slice(&[0, 3, 0, 15]);
        bytes.extend_from_slice(&[0; 12]);
        bytes.extend_from_slice(&[0, 5, 0]);
        let message = parse(&bytes).expect("message still parses");
        assert_matches!(&message.options[..], [Dhcpv6Option::Unknown { code: option_code::IA_NA, .. }]);
    }

    #[test]
    fn wrong_length_preference_degrades_to_unknown() {
        let mut bytes = serialize(&Message::new(MessageType::Advertise, 1));
        bytes.extend_from_slice(&[0, 7, 0, 2, 0, 200]);
        let message = parse(&bytes).expect("parses");
        assert_matches!(&message.options[..], [Dhcpv6Option::Unknown { code: option_code::PREFERENCE, .. }]);
    }

    #[test]
    fn nesting_bomb_is_defused() {
        // IA_NA options nested past the structural depth of real messages
        // parse as opaque payloads rather than recursing.
        let mut innermost = vec![0u8; 12];
        for _ in 0..16 {
            let mut wrapper = vec![0u8; 12];
            wrapper.extend_from_slice(&(option_code::IA_NA).to_be_bytes());
            wrapper.extend_from_slice(&(innermost.len() as u16).to_be_bytes());
            wrapper.extend_from_slice(&innermost);
            innermost = wrapper;
        }
        let mut bytes = serialize(&Message::new(MessageType::Reply, 1));
        bytes.extend_from_slice(&(option_code::IA_NA).to_be_bytes());
        bytes.extend_from_slice(&(innermost.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&innermost);
        let message = parse(&bytes).expect("parses without unbounded recursion");
        assert_eq!(message.options.len(), 1);
    }

    #[test]
    fn dns_name_encoding() {
        assert_eq!(encode_dns_name("camera-7"), [&[8u8][..], b"camera-7", &[0]].concat());
        assert_eq!(
            encode_dns_name("host.example.com"),
            [&[4u8][..], b"host", &[7], b"example", &[3], b"com", &[0]].concat()
        );
        assert_eq!(encode_dns_name(""), vec![0]);
    }
}
