// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing and serialization of DHCP messages in their BOOTP framing
//! (RFC 2131 section 2, options per RFC 2132).

use std::net::Ipv4Addr;

use crate::iface::MacAddr;

/// Value of the 4-byte magic cookie preceding the options field.
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

/// BOOTP fixed header (236 bytes) plus the magic cookie.
pub const FIXED_HEADER_SIZE: usize = 240;

/// Smallest parseable message: fixed header, cookie and an End option.
pub const MIN_PARSE_SIZE: usize = FIXED_HEADER_SIZE + 1;

/// Minimum size of a transmitted message; shorter messages are zero-padded
/// up to this bound (RFC 2131 requires 300-byte BOOTP compatibility).
pub const MIN_MESSAGE_SIZE: usize = 300;

/// Upper bound accepted for incoming messages.
pub const MAX_MESSAGE_SIZE: usize = 548;

/// Broadcast bit of the BOOTP `flags` field.
pub const FLAG_BROADCAST: u16 = 0x8000;

const HARDWARE_TYPE_ETHERNET: u8 = 1;

/// BOOTP opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    /// Client-to-server.
    BootRequest = 1,
    /// Server-to-client.
    BootReply = 2,
}

/// DHCP message type carried in option 53.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// DHCPDISCOVER
    Discover = 1,
    /// DHCPOFFER
    Offer = 2,
    /// DHCPREQUEST
    Request = 3,
    /// DHCPDECLINE
    Decline = 4,
    /// DHCPACK
    Ack = 5,
    /// DHCPNAK
    Nak = 6,
    /// DHCPRELEASE
    Release = 7,
    /// DHCPINFORM
    Inform = 8,
}

impl MessageType {
    fn from_wire(value: u8) -> Option<MessageType> {
        match value {
            1 => Some(MessageType::Discover),
            2 => Some(MessageType::Offer),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Decline),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Nak),
            7 => Some(MessageType::Release),
            8 => Some(MessageType::Inform),
            _ => None,
        }
    }
}

/// Option codes used by the client (RFC 2132 numbering).
pub mod option_code {
    /// Padding.
    pub const PAD: u8 = 0;
    /// Subnet Mask.
    pub const SUBNET_MASK: u8 = 1;
    /// Router.
    pub const ROUTER: u8 = 3;
    /// Domain Name Server.
    pub const DNS_SERVER: u8 = 6;
    /// Host Name.
    pub const HOST_NAME: u8 = 12;
    /// Interface MTU.
    pub const INTERFACE_MTU: u8 = 26;
    /// Requested IP Address.
    pub const REQUESTED_IP_ADDRESS: u8 = 50;
    /// IP Address Lease Time.
    pub const LEASE_TIME: u8 = 51;
    /// DHCP Message Type.
    pub const MESSAGE_TYPE: u8 = 53;
    /// Server Identifier.
    pub const SERVER_IDENTIFIER: u8 = 54;
    /// Parameter Request List.
    pub const PARAM_REQUEST_LIST: u8 = 55;
    /// Renewal (T1) Time Value.
    pub const RENEWAL_T1: u8 = 58;
    /// Rebinding (T2) Time Value.
    pub const REBINDING_T2: u8 = 59;
    /// Rapid Commit (RFC 4039).
    pub const RAPID_COMMIT: u8 = 80;
    /// End of options.
    pub const END: u8 = 255;
}

/// A single DHCP option.
///
/// Pad and End never appear here; the parser swallows them and the
/// serializer terminates the options field itself.
#[derive(Clone, Debug, PartialEq)]
pub enum DhcpOption {
    /// Option 1.
    SubnetMask(Ipv4Addr),
    /// Option 3. The full list is retained even though the client only
    /// consumes the first entry.
    Router(Vec<Ipv4Addr>),
    /// Option 6.
    DomainNameServer(Vec<Ipv4Addr>),
    /// Option 12.
    HostName(String),
    /// Option 26.
    InterfaceMtu(u16),
    /// Option 50.
    RequestedIpAddress(Ipv4Addr),
    /// Option 51, in seconds.
    LeaseTime(u32),
    /// Option 53.
    MessageType(MessageType),
    /// Option 54.
    ServerIdentifier(Ipv4Addr),
    /// Option 55.
    ParameterRequestList(Vec<u8>),
    /// Option 58, in seconds.
    RenewalT1(u32),
    /// Option 59, in seconds.
    RebindingT2(u32),
    /// Option 80, zero length.
    RapidCommit,
    /// Any option this client does not interpret, carried verbatim.
    Unknown {
        /// Option code.
        code: u8,
        /// Raw option payload.
        data: Vec<u8>,
    },
}

impl DhcpOption {
    /// The wire code of this option.
    pub fn code(&self) -> u8 {
        match self {
            DhcpOption::SubnetMask(_) => option_code::SUBNET_MASK,
            DhcpOption::Router(_) => option_code::ROUTER,
            DhcpOption::DomainNameServer(_) => option_code::DNS_SERVER,
            DhcpOption::HostName(_) => option_code::HOST_NAME,
            DhcpOption::InterfaceMtu(_) => option_code::INTERFACE_MTU,
            DhcpOption::RequestedIpAddress(_) => option_code::REQUESTED_IP_ADDRESS,
            DhcpOption::LeaseTime(_) => option_code::LEASE_TIME,
            DhcpOption::MessageType(_) => option_code::MESSAGE_TYPE,
            DhcpOption::ServerIdentifier(_) => option_code::SERVER_IDENTIFIER,
            DhcpOption::ParameterRequestList(_) => option_code::PARAM_REQUEST_LIST,
            DhcpOption::RenewalT1(_) => option_code::RENEWAL_T1,
            DhcpOption::RebindingT2(_) => option_code::REBINDING_T2,
            DhcpOption::RapidCommit => option_code::RAPID_COMMIT,
            DhcpOption::Unknown { code, data: _ } => *code,
        }
    }
}

/// A DHCP message with its BOOTP fixed fields and parsed options.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// BOOTP opcode.
    pub op: OpCode,
    /// Hardware address type; 1 for Ethernet.
    pub htype: u8,
    /// Hardware address length; 6 for Ethernet.
    pub hlen: u8,
    /// Relay hop count, always 0 from this client.
    pub hops: u8,
    /// Transaction identifier.
    pub xid: u32,
    /// Seconds elapsed since the acquisition attempt started.
    pub secs: u16,
    /// BOOTP broadcast flag.
    pub broadcast: bool,
    /// Client address, filled when renewing or rebinding.
    pub ciaddr: Ipv4Addr,
    /// Address offered or assigned by the server.
    pub yiaddr: Ipv4Addr,
    /// Next-server address.
    pub siaddr: Ipv4Addr,
    /// Relay agent address.
    pub giaddr: Ipv4Addr,
    /// Client hardware address.
    pub chaddr: MacAddr,
    /// Server host name.
    pub sname: String,
    /// Boot file name.
    pub file: String,
    /// Options, in wire order, End excluded.
    pub options: Vec<DhcpOption>,
}

impl Message {
    /// A zeroed BOOTREQUEST skeleton for the given transaction.
    pub fn new_request(xid: u32, chaddr: MacAddr) -> Message {
        Message {
            op: OpCode::BootRequest,
            htype: HARDWARE_TYPE_ETHERNET,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: String::new(),
            file: String::new(),
            options: Vec::new(),
        }
    }

    /// Returns the first option matching `code`, if any.
    pub fn find_option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|option| option.code() == code)
    }

    /// Returns the message type option, if present.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::MessageType(message_type) => Some(*message_type),
            _ => None,
        })
    }
}

/// Reasons an incoming buffer failed to parse as a DHCP message.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    /// Shorter than the fixed header plus End.
    #[error("message truncated ({0} bytes)")]
    Truncated(usize),
    /// `op` was neither BOOTREQUEST nor BOOTREPLY.
    #[error("bad BOOTP opcode {0}")]
    BadOpCode(u8),
    /// The magic cookie did not match 0x63825363.
    #[error("bad magic cookie {0:#010x}")]
    BadMagicCookie(u32),
    /// The options field ran out before an End option.
    #[error("missing End option")]
    MissingEnd,
    /// An option header or body extended past the buffer.
    #[error("truncated option {code}")]
    TruncatedOption {
        /// Offending option code.
        code: u8,
    },
    /// A recognized option carried an impossible length.
    #[error("option {code} has bad length {len}")]
    BadOptionLength {
        /// Offending option code.
        code: u8,
        /// Length carried on the wire.
        len: usize,
    },
    /// Option 53 carried a value outside the defined message types.
    #[error("unknown DHCP message type {0}")]
    UnknownMessageType(u8),
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_addr(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

fn read_addr_list(code: u8, data: &[u8]) -> Result<Vec<Ipv4Addr>, ParseError> {
    if data.is_empty() || data.len() % 4 != 0 {
        return Err(ParseError::BadOptionLength { code, len: data.len() });
    }
    Ok(data.chunks_exact(4).map(read_addr).collect())
}

fn read_fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Parses one message from `bytes`.
///
/// Trailing padding after the End option is ignored. Unrecognized option
/// codes are preserved as [`DhcpOption::Unknown`]; a recognized option with
/// an impossible length fails the whole message.
pub fn parse(bytes: &[u8]) -> Result<Message, ParseError> {
    if bytes.len() < MIN_PARSE_SIZE {
        return Err(ParseError::Truncated(bytes.len()));
    }

    let op = match bytes[0] {
        1 => OpCode::BootRequest,
        2 => OpCode::BootReply,
        other => return Err(ParseError::BadOpCode(other)),
    };
    let cookie = read_u32(&bytes[236..240]);
    if cookie != MAGIC_COOKIE {
        return Err(ParseError::BadMagicCookie(cookie));
    }

    let mut chaddr = [0u8; 6];
    chaddr.copy_from_slice(&bytes[28..34]);

    let mut message = Message {
        op,
        htype: bytes[1],
        hlen: bytes[2],
        hops: bytes[3],
        xid: read_u32(&bytes[4..8]),
        secs: u16::from_be_bytes([bytes[8], bytes[9]]),
        broadcast: u16::from_be_bytes([bytes[10], bytes[11]]) & FLAG_BROADCAST != 0,
        ciaddr: read_addr(&bytes[12..16]),
        yiaddr: read_addr(&bytes[16..20]),
        siaddr: read_addr(&bytes[20..24]),
        giaddr: read_addr(&bytes[24..28]),
        chaddr: MacAddr(chaddr),
        sname: read_fixed_string(&bytes[44..108]),
        file: read_fixed_string(&bytes[108..236]),
        options: Vec::new(),
    };

    let mut rest = &bytes[FIXED_HEADER_SIZE..];
    loop {
        let (&code, after_code) = match rest.split_first() {
            Some(split) => split,
            None => return Err(ParseError::MissingEnd),
        };
        match code {
            option_code::PAD => {
                rest = after_code;
                continue;
            }
            option_code::END => break,
            _ => {}
        }
        let (&len, after_len) = match after_code.split_first() {
            Some(split) => split,
            None => return Err(ParseError::TruncatedOption { code }),
        };
        let len = usize::from(len);
        if after_len.len() < len {
            return Err(ParseError::TruncatedOption { code });
        }
        let (data, after_data) = after_len.split_at(len);
        rest = after_data;

        let option = match code {
            option_code::SUBNET_MASK
            | option_code::REQUESTED_IP_ADDRESS
            | option_code::SERVER_IDENTIFIER => {
                if len != 4 {
                    return Err(ParseError::BadOptionLength { code, len });
                }
                let addr = read_addr(data);
                match code {
                    option_code::SUBNET_MASK => DhcpOption::SubnetMask(addr),
                    option_code::REQUESTED_IP_ADDRESS => DhcpOption::RequestedIpAddress(addr),
                    _ => DhcpOption::ServerIdentifier(addr),
                }
            }
            option_code::ROUTER => DhcpOption::Router(read_addr_list(code, data)?),
            option_code::DNS_SERVER => DhcpOption::DomainNameServer(read_addr_list(code, data)?),
            option_code::HOST_NAME => {
                DhcpOption::HostName(String::from_utf8_lossy(data).into_owned())
            }
            option_code::INTERFACE_MTU => {
                if len != 2 {
                    return Err(ParseError::BadOptionLength { code, len });
                }
                DhcpOption::InterfaceMtu(u16::from_be_bytes([data[0], data[1]]))
            }
            option_code::LEASE_TIME | option_code::RENEWAL_T1 | option_code::REBINDING_T2 => {
                if len != 4 {
                    return Err(ParseError::BadOptionLength { code, len });
                }
                let secs = read_u32(data);
                match code {
                    option_code::LEASE_TIME => DhcpOption::LeaseTime(secs),
                    option_code::RENEWAL_T1 => DhcpOption::RenewalT1(secs),
                    _ => DhcpOption::RebindingT2(secs),
                }
            }
            option_code::MESSAGE_TYPE => {
                if len != 1 {
                    return Err(ParseError::BadOptionLength { code, len });
                }
                DhcpOption::MessageType(
                    MessageType::from_wire(data[0])
                        .ok_or(ParseError::UnknownMessageType(data[0]))?,
                )
            }
            option_code::PARAM_REQUEST_LIST => DhcpOption::ParameterRequestList(data.to_vec()),
            option_code::RAPID_COMMIT => {
                if len != 0 {
                    return Err(ParseError::BadOptionLength { code, len });
                }
                DhcpOption::RapidCommit
            }
            _ => DhcpOption::Unknown { code, data: data.to_vec() },
        };
        message.options.push(option);
    }

    Ok(message)
}

fn write_fixed_string(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len().saturating_sub(1));
    buf[..n].copy_from_slice(&bytes[..n]);
}

/// Serializes `message`, End-terminating the options field and zero-padding
/// the result to [`MIN_MESSAGE_SIZE`].
pub fn serialize(message: &Message) -> Vec<u8> {
    let mut buf = vec![0u8; FIXED_HEADER_SIZE];
    buf[0] = message.op as u8;
    buf[1] = message.htype;
    buf[2] = message.hlen;
    buf[3] = message.hops;
    buf[4..8].copy_from_slice(&message.xid.to_be_bytes());
    buf[8..10].copy_from_slice(&message.secs.to_be_bytes());
    let flags: u16 = if message.broadcast { FLAG_BROADCAST } else { 0 };
    buf[10..12].copy_from_slice(&flags.to_be_bytes());
    buf[12..16].copy_from_slice(&message.ciaddr.octets());
    buf[16..20].copy_from_slice(&message.yiaddr.octets());
    buf[20..24].copy_from_slice(&message.siaddr.octets());
    buf[24..28].copy_from_slice(&message.giaddr.octets());
    buf[28..34].copy_from_slice(&message.chaddr.octets());
    write_fixed_string(&mut buf[44..108], &message.sname);
    write_fixed_string(&mut buf[108..236], &message.file);
    buf[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());

    for option in &message.options {
        let mut push = |code: u8, data: &[u8]| {
            debug_assert!(data.len() <= usize::from(u8::MAX));
            buf.push(code);
            buf.push(data.len() as u8);
            buf.extend_from_slice(data);
        };
        match option {
            DhcpOption::SubnetMask(addr)
            | DhcpOption::RequestedIpAddress(addr)
            | DhcpOption::ServerIdentifier(addr) => push(option.code(), &addr.octets()),
            DhcpOption::Router(addrs) | DhcpOption::DomainNameServer(addrs) => {
                let data: Vec<u8> =
                    addrs.iter().flat_map(|addr| addr.octets().into_iter()).collect();
                push(option.code(), &data);
            }
            DhcpOption::HostName(name) => push(option.code(), name.as_bytes()),
            DhcpOption::InterfaceMtu(mtu) => push(option.code(), &mtu.to_be_bytes()),
            DhcpOption::LeaseTime(secs)
            | DhcpOption::RenewalT1(secs)
            | DhcpOption::RebindingT2(secs) => push(option.code(), &secs.to_be_bytes()),
            DhcpOption::MessageType(message_type) => {
                push(option.code(), &[*message_type as u8]);
            }
            DhcpOption::ParameterRequestList(codes) => push(option.code(), codes),
            DhcpOption::RapidCommit => push(option.code(), &[]),
            DhcpOption::Unknown { code, data } => push(*code, data),
        }
    }
    buf.push(option_code::END);
    if buf.len() < MIN_MESSAGE_SIZE {
        buf.resize(MIN_MESSAGE_SIZE, 0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    fn full_message() -> Message {
        Message {
            secs: 99,
            broadcast: true,
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            options: vec![
                DhcpOption::MessageType(MessageType::Ack),
                DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 0, 2, 1)),
                DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)),
                DhcpOption::Router(vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)]),
                DhcpOption::DomainNameServer(vec![
                    Ipv4Addr::new(192, 0, 2, 53),
                    Ipv4Addr::new(192, 0, 2, 54),
                ]),
                DhcpOption::InterfaceMtu(1500),
                DhcpOption::LeaseTime(600),
                DhcpOption::RenewalT1(300),
                DhcpOption::RebindingT2(525),
                DhcpOption::HostName("camera-7".to_owned()),
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 0, 2, 10)),
                DhcpOption::ParameterRequestList(vec![1, 3, 6, 26, 51, 58, 59]),
                DhcpOption::RapidCommit,
                DhcpOption::Unknown { code: 43, data: vec![0xde, 0xad] },
            ],
            ..Message::new_request(0x3903_f326, MacAddr([0x02, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]))
        }
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let message = full_message();
        let bytes = serialize(&message);
        assert!(bytes.len() >= MIN_MESSAGE_SIZE);
        assert_eq!(parse(&bytes).expect("parse back"), message);
    }

    #[test]
    fn short_message_is_padded_to_minimum() {
        let message = Message::new_request(1, MacAddr([2, 0, 0, 0, 0, 1]));
        let bytes = serialize(&message);
        assert_eq!(bytes.len(), MIN_MESSAGE_SIZE);
        // Padding after End must not confuse the parser.
        assert_eq!(parse(&bytes).expect("parse back").options, vec![]);
    }

    #[test]
    fn minimal_end_only_message_parses() {
        let mut bytes = serialize(&Message::new_request(7, MacAddr([2, 0, 0, 0, 0, 1])));
        bytes.truncate(MIN_PARSE_SIZE);
        bytes[240] = option_code::END;
        let message = parse(&bytes).expect("header + End parses");
        assert_eq!(message.options, vec![]);
        assert_eq!(message.xid, 7);
    }

    #[test]
    fn one_byte_short_is_dropped() {
        let mut bytes = serialize(&Message::new_request(7, MacAddr([2, 0, 0, 0, 0, 1])));
        bytes.truncate(MIN_PARSE_SIZE - 1);
        assert_matches!(parse(&bytes), Err(ParseError::Truncated(n)) => assert_eq!(n, 240));
    }

    #[test]
    fn missing_end_is_a_parse_error() {
        let mut bytes = serialize(&full_message());
        // Overwrite the terminator and everything after it with padding.
        let end = bytes.iter().position(|&b| b == option_code::END).unwrap();
        for b in &mut bytes[end..] {
            *b = option_code::PAD;
        }
        assert_matches!(parse(&bytes), Err(ParseError::MissingEnd));
    }

    #[test]
    fn bad_magic_cookie_is_rejected() {
        let mut bytes = serialize(&full_message());
        bytes[236] = 0;
        assert_matches!(parse(&bytes), Err(ParseError::BadMagicCookie(_)));
    }

    #[test_case(option_code::SUBNET_MASK, 3; "subnet mask wants 4 bytes")]
    #[test_case(option_code::MESSAGE_TYPE, 2; "message type wants 1 byte")]
    #[test_case(option_code::LEASE_TIME, 2; "lease time wants 4 bytes")]
    #[test_case(option_code::INTERFACE_MTU, 1; "mtu wants 2 bytes")]
    #[test_case(option_code::ROUTER, 3; "router wants a multiple of 4")]
    fn bad_option_length_is_rejected(code: u8, len: u8) {
        let mut bytes = serialize(&Message::new_request(1, MacAddr([2, 0, 0, 0, 0, 1])));
        bytes.truncate(FIXED_HEADER_SIZE);
        bytes.push(code);
        bytes.push(len);
        bytes.extend(std::iter::repeat(0).take(usize::from(len)));
        bytes.push(option_code::END);
        assert_matches!(parse(&bytes), Err(ParseError::BadOptionLength { code: c, len: l }) => {
            assert_eq!((c, usize::from(len)), (code, l));
        });
    }

    #[test]
    fn truncated_option_is_rejected() {
        let mut bytes = serialize(&Message::new_request(1, MacAddr([2, 0, 0, 0, 0, 1])));
        bytes.truncate(FIXED_HEADER_SIZE);
        bytes.push(option_code::HOST_NAME);
        bytes.push(10);
        bytes.extend_from_slice(b"abc");
        assert_matches!(
            parse(&bytes),
            Err(ParseError::TruncatedOption { code: option_code::HOST_NAME })
        );
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut bytes = serialize(&Message::new_request(1, MacAddr([2, 0, 0, 0, 0, 1])));
        bytes.truncate(FIXED_HEADER_SIZE);
        bytes.extend_from_slice(&[option_code::MESSAGE_TYPE, 1, 200, option_code::END]);
        assert_matches!(parse(&bytes), Err(ParseError::UnknownMessageType(200)));
    }
}
