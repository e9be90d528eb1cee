//! The SD header: flags, an entries array, and an options array.
//!
//! Wire layout: `flags:u8, reserved:u24, entries_len:u32, entries:[N],
//! options_len:u32, options:[M]`. Flag bits: `0x80` reboot, `0x40`
//! unicast, the remaining six bits of the first byte are preserved
//! verbatim as `flags_unknown` so an unrecognised flag round-trips.

use crate::error::{DecodeError, ParseError};
use crate::sd::entries::{OptionRun, SdEntry};
use crate::sd::options::SdOption;

const FLAG_REBOOT: u8 = 0x80;
const FLAG_UNICAST: u8 = 0x40;
const FLAG_UNKNOWN_MASK: u8 = 0x3F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdHeader {
    pub flag_reboot: bool,
    pub flag_unicast: bool,
    pub flags_unknown: u8,
    pub entries: Vec<SdEntry>,
    pub options: Vec<SdOption>,
}

impl SdHeader {
    pub fn new(flag_reboot: bool, flag_unicast: bool, entries: Vec<SdEntry>) -> Self {
        SdHeader {
            flag_reboot,
            flag_unicast,
            flags_unknown: 0,
            entries,
            options: Vec::new(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let flags = (self.flag_reboot as u8 * FLAG_REBOOT)
            | (self.flag_unicast as u8 * FLAG_UNICAST)
            | (self.flags_unknown & FLAG_UNKNOWN_MASK);
        buf.push(flags);
        buf.extend_from_slice(&[0u8; 3]);

        let mut entries_buf = Vec::new();
        for entry in &self.entries {
            entries_buf.extend_from_slice(&entry.build());
        }
        buf.extend_from_slice(&(entries_buf.len() as u32).to_be_bytes());
        buf.extend_from_slice(&entries_buf);

        let mut options_buf = Vec::new();
        for option in &self.options {
            options_buf.extend_from_slice(&option.build());
        }
        buf.extend_from_slice(&(options_buf.len() as u32).to_be_bytes());
        buf.extend_from_slice(&options_buf);

        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < 8 {
            return Err(DecodeError::incomplete(8, buf.len()));
        }
        let flags = buf[0];
        let entries_len = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let mut offset = 8;
        if buf.len() < offset + entries_len {
            return Err(DecodeError::incomplete(offset + entries_len, buf.len()));
        }
        if entries_len % SdEntry::FIXED_LENGTH != 0 {
            return Err(ParseError::InvalidEnvelope("entries array not a multiple of entry size").into());
        }
        let mut entries = Vec::with_capacity(entries_len / SdEntry::FIXED_LENGTH);
        let entries_end = offset + entries_len;
        while offset < entries_end {
            let (entry, consumed) = SdEntry::parse(&buf[offset..entries_end])?;
            entries.push(entry);
            offset += consumed;
        }

        if buf.len() < offset + 4 {
            return Err(DecodeError::incomplete(offset + 4, buf.len()));
        }
        let options_len = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if buf.len() < offset + options_len {
            return Err(DecodeError::incomplete(offset + options_len, buf.len()));
        }
        let options_end = offset + options_len;
        let mut options = Vec::new();
        while offset < options_end {
            let (option, consumed) = SdOption::parse(&buf[offset..options_end])
                .map_err(DecodeError::from)?;
            options.push(option);
            offset += consumed;
        }

        Ok(SdHeader {
            flag_reboot: flags & FLAG_REBOOT != 0,
            flag_unicast: flags & FLAG_UNICAST != 0,
            flags_unknown: flags & FLAG_UNKNOWN_MASK,
            entries,
            options,
        })
    }

    /// Resolves every entry's option runs against `self.options`. Must be
    /// called once after [`SdHeader::parse`] before entries are inspected
    /// by anything but the wire codec.
    pub fn resolve_all_options(&mut self) -> Result<(), ParseError> {
        for entry in &mut self.entries {
            entry.resolve_options(&self.options)?;
        }
        Ok(())
    }

    /// Rewrites `entries` (which must all have fully resolved option runs)
    /// into wire form, building a deduplicated option table: each entry's
    /// run becomes an index/count pair into the returned header's
    /// `options`, reusing an existing contiguous slice when one already
    /// matches (first-fit: an existing slice wins over appending a new
    /// one), so identical option runs across entries share indexes.
    pub fn assign_option_indexes(&self) -> SdHeader {
        let mut table: Vec<SdOption> = Vec::new();
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut e = entry.clone();
            e.run_1 = assign_run(&entry.run_1, &mut table);
            e.run_2 = assign_run(&entry.run_2, &mut table);
            entries.push(e);
        }
        SdHeader {
            flag_reboot: self.flag_reboot,
            flag_unicast: self.flag_unicast,
            flags_unknown: self.flags_unknown,
            entries,
            options: table,
        }
    }
}

fn assign_run(run: &OptionRun, table: &mut Vec<SdOption>) -> OptionRun {
    let options = run
        .resolved()
        .expect("assign_option_indexes requires every entry's option runs to be resolved");
    if options.is_empty() {
        return OptionRun::Unresolved { index: 0, count: 0 };
    }
    let index = find_subslice(table, options).unwrap_or_else(|| {
        let start = table.len();
        table.extend_from_slice(options);
        start
    });
    OptionRun::Unresolved {
        index: index as u8,
        count: options.len() as u8,
    }
}

/// Finds the first index at which `needle` occurs as a contiguous slice of
/// `haystack`, scanning left to right (Horspool-style skip search over
/// equality-comparable elements rather than raw bytes).
fn find_subslice(haystack: &[SdOption], needle: &[SdOption]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::options::L4Proto;
    use std::net::Ipv4Addr;

    fn endpoint(port: u16) -> SdOption {
        SdOption::Ipv4Endpoint {
            address: Ipv4Addr::new(10, 0, 0, 1),
            l4proto: L4Proto::Udp,
            port,
        }
    }

    #[test]
    fn round_trips_empty_header() {
        let header = SdHeader::new(true, true, vec![]);
        let bytes = header.build();
        let parsed = SdHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn round_trips_with_entries_and_options() {
        let mut header = SdHeader::new(
            false,
            true,
            vec![
                SdEntry::offer_service(0x1234, 1, 1, 0, 3, vec![endpoint(30490)]),
                SdEntry::find_service(0xBEEF, 0xFFFF, 0xFF, 0xFFFFFFFF, 3),
            ],
        );
        header = header.assign_option_indexes();
        let bytes = header.build();
        let mut parsed = SdHeader::parse(&bytes).unwrap();
        parsed.resolve_all_options().unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn identical_option_runs_share_indexes() {
        let header = SdHeader::new(
            false,
            true,
            vec![
                SdEntry::offer_service(1, 1, 1, 0, 3, vec![endpoint(1)]),
                SdEntry::offer_service(2, 1, 1, 0, 3, vec![endpoint(1)]),
            ],
        );
        let assigned = header.assign_option_indexes();
        assert_eq!(assigned.options.len(), 1);
        assert_eq!(assigned.entries[0].run_1, assigned.entries[1].run_1);
    }

    #[test]
    fn unknown_flag_bits_round_trip() {
        let mut header = SdHeader::new(true, false, vec![]);
        header.flags_unknown = 0x05;
        let bytes = header.build();
        let parsed = SdHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.flags_unknown, 0x05);
    }

    #[test]
    fn rejects_misaligned_entries_array() {
        let mut bytes = SdHeader::new(false, false, vec![]).build();
        bytes[4..8].copy_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 5]);
        let err = SdHeader::parse(&bytes);
        assert!(matches!(
            err,
            Err(DecodeError::ParseError(ParseError::InvalidEnvelope(_)))
        ));
    }
}
