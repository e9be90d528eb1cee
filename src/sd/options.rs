//! SD options: auxiliary records referenced by index from entries.
//!
//! Common framing is `length: u16, type: u8, payload: length bytes` where
//! `length` counts every byte of the option after the length field itself
//! (i.e. it includes the type byte). Known types are IPv4/IPv6 endpoint,
//! multicast, and SD-endpoint options (four axes — family × role —
//! represented here as a flat sum type per `SPEC_FULL.md` §14 rather than
//! the multiple-inheritance hierarchy the original implementation used),
//! plus config and load-balancing options. Anything else round-trips as
//! [`SdOption::Unknown`].

use crate::error::ParseError;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Proto {
    Tcp,
    Udp,
}

impl L4Proto {
    pub fn to_byte(self) -> u8 {
        match self {
            L4Proto::Tcp => 0x06,
            L4Proto::Udp => 0x11,
        }
    }
}

impl TryFrom<u8> for L4Proto {
    type Error = ParseError;

    fn try_from(b: u8) -> Result<Self, ParseError> {
        match b {
            0x06 => Ok(L4Proto::Tcp),
            0x11 => Ok(L4Proto::Udp),
            other => Err(ParseError::UnknownL4Proto(other)),
        }
    }
}

impl std::fmt::Display for L4Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            L4Proto::Tcp => write!(f, "tcp"),
            L4Proto::Udp => write!(f, "udp"),
        }
    }
}

const TYPE_CONFIG: u8 = 0x01;
const TYPE_LOAD_BALANCING: u8 = 0x02;
const TYPE_IPV4_ENDPOINT: u8 = 0x04;
const TYPE_IPV6_ENDPOINT: u8 = 0x06;
const TYPE_IPV4_MULTICAST: u8 = 0x14;
const TYPE_IPV6_MULTICAST: u8 = 0x16;
const TYPE_IPV4_SD_ENDPOINT: u8 = 0x24;
const TYPE_IPV6_SD_ENDPOINT: u8 = 0x26;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SdOption {
    Ipv4Endpoint { address: Ipv4Addr, l4proto: L4Proto, port: u16 },
    Ipv6Endpoint { address: Ipv6Addr, l4proto: L4Proto, port: u16 },
    Ipv4Multicast { address: Ipv4Addr, l4proto: L4Proto, port: u16 },
    Ipv6Multicast { address: Ipv6Addr, l4proto: L4Proto, port: u16 },
    Ipv4SdEndpoint { address: Ipv4Addr, l4proto: L4Proto, port: u16 },
    Ipv6SdEndpoint { address: Ipv6Addr, l4proto: L4Proto, port: u16 },
    /// `key` or `key=value` entries, ASCII.
    Config(Vec<String>),
    LoadBalancing { priority: u16, weight: u16 },
    Unknown { type_id: u8, data: Vec<u8> },
}

impl SdOption {
    /// Endpoint and SD-endpoint options describe a socket a client can
    /// connect to; multicast/config/load-balancing/unknown options do not.
    pub fn is_endpoint(&self) -> bool {
        matches!(
            self,
            SdOption::Ipv4Endpoint { .. }
                | SdOption::Ipv6Endpoint { .. }
                | SdOption::Ipv4SdEndpoint { .. }
                | SdOption::Ipv6SdEndpoint { .. }
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            SdOption::Ipv4Endpoint { address, l4proto, port } => {
                push_ipv4(&mut out, TYPE_IPV4_ENDPOINT, *address, *l4proto, *port)
            }
            SdOption::Ipv4Multicast { address, l4proto, port } => {
                push_ipv4(&mut out, TYPE_IPV4_MULTICAST, *address, *l4proto, *port)
            }
            SdOption::Ipv4SdEndpoint { address, l4proto, port } => {
                push_ipv4(&mut out, TYPE_IPV4_SD_ENDPOINT, *address, *l4proto, *port)
            }
            SdOption::Ipv6Endpoint { address, l4proto, port } => {
                push_ipv6(&mut out, TYPE_IPV6_ENDPOINT, *address, *l4proto, *port)
            }
            SdOption::Ipv6Multicast { address, l4proto, port } => {
                push_ipv6(&mut out, TYPE_IPV6_MULTICAST, *address, *l4proto, *port)
            }
            SdOption::Ipv6SdEndpoint { address, l4proto, port } => {
                push_ipv6(&mut out, TYPE_IPV6_SD_ENDPOINT, *address, *l4proto, *port)
            }
            SdOption::Config(entries) => {
                let mut payload = vec![0u8]; // reserved
                for entry in entries {
                    let bytes = entry.as_bytes();
                    payload.push(bytes.len() as u8);
                    payload.extend_from_slice(bytes);
                }
                payload.push(0); // terminator
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.push(TYPE_CONFIG);
                out.extend_from_slice(&payload);
            }
            SdOption::LoadBalancing { priority, weight } => {
                out.extend_from_slice(&5u16.to_be_bytes());
                out.push(TYPE_LOAD_BALANCING);
                out.push(0); // reserved
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
            }
            SdOption::Unknown { type_id, data } => {
                out.extend_from_slice(&((data.len() + 1) as u16).to_be_bytes());
                out.push(*type_id);
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Parses one option starting at `buf[0]`. Returns the option and the
    /// number of bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < 3 {
            return Err(ParseError::InvalidEnvelope("option shorter than framing"));
        }
        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let total = 2 + length;
        if buf.len() < total {
            return Err(ParseError::InvalidEnvelope("option payload truncated"));
        }
        let type_id = buf[2];
        let payload = &buf[3..total];

        let opt = match type_id {
            TYPE_IPV4_ENDPOINT => parse_ipv4(payload, type_id, SdOption::Ipv4Endpoint)?,
            TYPE_IPV4_MULTICAST => parse_ipv4(payload, type_id, SdOption::Ipv4Multicast)?,
            TYPE_IPV4_SD_ENDPOINT => parse_ipv4(payload, type_id, SdOption::Ipv4SdEndpoint)?,
            TYPE_IPV6_ENDPOINT => parse_ipv6(payload, type_id, SdOption::Ipv6Endpoint)?,
            TYPE_IPV6_MULTICAST => parse_ipv6(payload, type_id, SdOption::Ipv6Multicast)?,
            TYPE_IPV6_SD_ENDPOINT => parse_ipv6(payload, type_id, SdOption::Ipv6SdEndpoint)?,
            TYPE_CONFIG => parse_config(payload, type_id),
            TYPE_LOAD_BALANCING => {
                if payload.len() < 5 {
                    SdOption::Unknown { type_id, data: payload.to_vec() }
                } else {
                    SdOption::LoadBalancing {
                        priority: u16::from_be_bytes([payload[1], payload[2]]),
                        weight: u16::from_be_bytes([payload[3], payload[4]]),
                    }
                }
            }
            other => SdOption::Unknown { type_id: other, data: payload.to_vec() },
        };
        Ok((opt, total))
    }
}

fn push_ipv4(out: &mut Vec<u8>, type_id: u8, address: Ipv4Addr, l4proto: L4Proto, port: u16) {
    out.extend_from_slice(&9u16.to_be_bytes());
    out.push(type_id);
    out.push(0); // reserved
    out.extend_from_slice(&address.octets());
    out.push(0); // reserved
    out.push(l4proto.to_byte());
    out.extend_from_slice(&port.to_be_bytes());
}

fn push_ipv6(out: &mut Vec<u8>, type_id: u8, address: Ipv6Addr, l4proto: L4Proto, port: u16) {
    out.extend_from_slice(&21u16.to_be_bytes());
    out.push(type_id);
    out.push(0);
    out.extend_from_slice(&address.octets());
    out.push(0);
    out.push(l4proto.to_byte());
    out.extend_from_slice(&port.to_be_bytes());
}

fn parse_ipv4(
    payload: &[u8],
    type_id: u8,
    ctor: fn(Ipv4Addr, L4Proto, u16) -> SdOption,
) -> Result<SdOption, ParseError> {
    if payload.len() < 9 {
        return Ok(SdOption::Unknown { type_id, data: payload.to_vec() });
    }
    let address = Ipv4Addr::new(payload[1], payload[2], payload[3], payload[4]);
    let l4proto = match L4Proto::try_from(payload[6]) {
        Ok(p) => p,
        Err(_) => return Ok(SdOption::Unknown { type_id, data: payload.to_vec() }),
    };
    let port = u16::from_be_bytes([payload[7], payload[8]]);
    Ok(ctor(address, l4proto, port))
}

fn parse_ipv6(
    payload: &[u8],
    type_id: u8,
    ctor: fn(Ipv6Addr, L4Proto, u16) -> SdOption,
) -> Result<SdOption, ParseError> {
    if payload.len() < 21 {
        return Ok(SdOption::Unknown { type_id, data: payload.to_vec() });
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&payload[1..17]);
    let address = Ipv6Addr::from(octets);
    let l4proto = match L4Proto::try_from(payload[18]) {
        Ok(p) => p,
        Err(_) => return Ok(SdOption::Unknown { type_id, data: payload.to_vec() }),
    };
    let port = u16::from_be_bytes([payload[19], payload[20]]);
    Ok(ctor(address, l4proto, port))
}

fn parse_config(payload: &[u8], type_id: u8) -> SdOption {
    if payload.is_empty() {
        return SdOption::Unknown { type_id, data: payload.to_vec() };
    }
    let mut entries = Vec::new();
    let mut i = 1; // skip reserved byte
    while i < payload.len() {
        let len = payload[i] as usize;
        if len == 0 {
            return SdOption::Config(entries);
        }
        i += 1;
        if i + len > payload.len() {
            return SdOption::Unknown { type_id, data: payload.to_vec() };
        }
        match std::str::from_utf8(&payload[i..i + len]) {
            Ok(s) => entries.push(s.to_string()),
            Err(_) => return SdOption::Unknown { type_id, data: payload.to_vec() },
        }
        i += len;
    }
    // missing terminator: still round-trips as opaque data
    SdOption::Unknown { type_id, data: payload.to_vec() }
}

impl std::fmt::Display for SdOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdOption::Ipv4Endpoint { address, l4proto, port } => {
                write!(f, "{address}:{port}/{l4proto}")
            }
            SdOption::Ipv6Endpoint { address, l4proto, port } => {
                write!(f, "[{address}]:{port}/{l4proto}")
            }
            SdOption::Ipv4Multicast { address, l4proto, port } => {
                write!(f, "multicast {address}:{port}/{l4proto}")
            }
            SdOption::Ipv6Multicast { address, l4proto, port } => {
                write!(f, "multicast [{address}]:{port}/{l4proto}")
            }
            SdOption::Ipv4SdEndpoint { address, l4proto, port } => {
                write!(f, "sd-endpoint {address}:{port}/{l4proto}")
            }
            SdOption::Ipv6SdEndpoint { address, l4proto, port } => {
                write!(f, "sd-endpoint [{address}]:{port}/{l4proto}")
            }
            SdOption::Config(entries) => write!(f, "config({})", entries.join(",")),
            SdOption::LoadBalancing { priority, weight } => {
                write!(f, "lb(priority={priority},weight={weight})")
            }
            SdOption::Unknown { type_id, data } => {
                write!(f, "unknown(type={type_id:#x},len={})", data.len())
            }
        }
    }
}
