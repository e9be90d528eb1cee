//! The SOME/IP header codec.
//!
//! [`header::SomeIpHeader`] is the only wire structure this crate's codec
//! covers: the 16-byte SOME/IP header that every SD datagram is wrapped
//! in. Payload (de)serialization for application methods/events is out of
//! scope (see `DESIGN.md`); `sd::packet`/`sd::entries`/`sd::options` cover
//! the SD-specific payload this crate actually sends and receives.

pub mod header;

pub use header::{MessageType, ReturnCode, SomeIpHeader};
