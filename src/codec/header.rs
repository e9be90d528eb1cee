//! The 16-byte SOME/IP header and its envelope enums.
//!
//! Wire layout (`!HHIHHBBBB`): service(16) method(16) length(32) client(16)
//! session(16) protocol(8)=1 interface(8) message_type(8) return_code(8),
//! followed by `length - 8` payload bytes. `length` counts every byte after
//! the length field itself.

use crate::error::{DecodeError, ParseError};
use std::convert::TryInto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    RequestNoReturn,
    Notification,
    Response,
    Error,
    TpRequest,
    TpRequestNoReturn,
    TpNotification,
    TpResponse,
    TpError,
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Request => 0x00,
            MessageType::RequestNoReturn => 0x01,
            MessageType::Notification => 0x02,
            MessageType::Response => 0x80,
            MessageType::Error => 0x81,
            MessageType::TpRequest => 0x20,
            MessageType::TpRequestNoReturn => 0x21,
            MessageType::TpNotification => 0x22,
            MessageType::TpResponse => 0xa0,
            MessageType::TpError => 0xa1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, ParseError> {
        Ok(match b {
            0x00 => MessageType::Request,
            0x01 => MessageType::RequestNoReturn,
            0x02 => MessageType::Notification,
            0x80 => MessageType::Response,
            0x81 => MessageType::Error,
            0x20 => MessageType::TpRequest,
            0x21 => MessageType::TpRequestNoReturn,
            0x22 => MessageType::TpNotification,
            0xa0 => MessageType::TpResponse,
            0xa1 => MessageType::TpError,
            other => return Err(ParseError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Ok,
    NotOk,
    UnknownService,
    UnknownMethod,
    NotReady,
    NotReachable,
    Timeout,
    WrongProtocolVersion,
    WrongInterfaceVersion,
    MalformedMessage,
    WrongMessageType,
    Other(u8),
}

impl ReturnCode {
    pub fn to_byte(self) -> u8 {
        match self {
            ReturnCode::Ok => 0x00,
            ReturnCode::NotOk => 0x01,
            ReturnCode::UnknownService => 0x02,
            ReturnCode::UnknownMethod => 0x03,
            ReturnCode::NotReady => 0x04,
            ReturnCode::NotReachable => 0x05,
            ReturnCode::Timeout => 0x06,
            ReturnCode::WrongProtocolVersion => 0x07,
            ReturnCode::WrongInterfaceVersion => 0x08,
            ReturnCode::MalformedMessage => 0x09,
            ReturnCode::WrongMessageType => 0x0a,
            ReturnCode::Other(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => ReturnCode::Ok,
            0x01 => ReturnCode::NotOk,
            0x02 => ReturnCode::UnknownService,
            0x03 => ReturnCode::UnknownMethod,
            0x04 => ReturnCode::NotReady,
            0x05 => ReturnCode::NotReachable,
            0x06 => ReturnCode::Timeout,
            0x07 => ReturnCode::WrongProtocolVersion,
            0x08 => ReturnCode::WrongInterfaceVersion,
            0x09 => ReturnCode::MalformedMessage,
            0x0a => ReturnCode::WrongMessageType,
            other => ReturnCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SomeIpHeader {
    pub service_id: u16,
    pub method_id: u16,
    pub length: u32,
    pub client_id: u16,
    pub session_id: u16,
    pub protocol_version: u8,
    pub interface_version: u8,
    pub message_type: MessageType,
    pub return_code: ReturnCode,
    pub payload: Vec<u8>,
}

impl SomeIpHeader {
    pub const HEADER_LENGTH: usize = 16;
    pub const SOMEIP_PROTOCOL_VERSION: u8 = 0x01;

    /// Service id reserved for SD traffic.
    pub const SD_SERVICE_ID: u16 = 0xFFFF;
    /// Method id reserved for SD traffic.
    pub const SD_METHOD_ID: u16 = 0x8100;
    pub const SD_INTERFACE_VERSION: u8 = 0x01;

    pub fn new(
        service_id: u16,
        method_id: u16,
        client_id: u16,
        session_id: u16,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Self {
        SomeIpHeader {
            service_id,
            method_id,
            length: payload.len() as u32 + 8,
            client_id,
            session_id,
            protocol_version: Self::SOMEIP_PROTOCOL_VERSION,
            interface_version: Self::SD_INTERFACE_VERSION,
            message_type,
            return_code: ReturnCode::Ok,
            payload,
        }
    }

    /// Builds an SD envelope with the fields `spec.md` §6 requires for
    /// the SD service/method pair.
    pub fn new_sd(client_id: u16, session_id: u16, payload: Vec<u8>) -> Self {
        SomeIpHeader::new(
            Self::SD_SERVICE_ID,
            Self::SD_METHOD_ID,
            client_id,
            session_id,
            MessageType::Notification,
            payload,
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LENGTH + self.payload.len());
        buf.extend_from_slice(&self.service_id.to_be_bytes());
        buf.extend_from_slice(&self.method_id.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.client_id.to_be_bytes());
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.push(self.protocol_version);
        buf.push(self.interface_version);
        buf.push(self.message_type.to_byte());
        buf.push(self.return_code.to_byte());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::HEADER_LENGTH {
            return Err(DecodeError::incomplete(Self::HEADER_LENGTH, buf.len()));
        }
        let length = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let total = 8 + length as usize;
        if buf.len() < total {
            return Err(DecodeError::incomplete(total, buf.len()));
        }
        if (length as usize) < 8 {
            return Err(ParseError::LengthMismatch {
                declared: length,
                actual: buf.len(),
            }
            .into());
        }
        let payload = buf[16..total].to_vec();
        Ok(SomeIpHeader {
            service_id: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            method_id: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            length,
            client_id: u16::from_be_bytes(buf[8..10].try_into().unwrap()),
            session_id: u16::from_be_bytes(buf[10..12].try_into().unwrap()),
            protocol_version: buf[12],
            interface_version: buf[13],
            message_type: MessageType::from_byte(buf[14])?,
            return_code: ReturnCode::from_byte(buf[15]),
            payload,
        })
    }

    /// True when the header carries the service/method/interface/return-code
    /// combination reserved for SD traffic. Message type is checked
    /// separately by the caller (it discriminates notification vs. other).
    pub fn is_sd_envelope(&self) -> bool {
        self.service_id == Self::SD_SERVICE_ID
            && self.method_id == Self::SD_METHOD_ID
            && self.interface_version == Self::SD_INTERFACE_VERSION
            && self.return_code == ReturnCode::Ok
    }
}
