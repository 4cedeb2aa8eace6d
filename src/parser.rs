//! Parser for delegation statistics lines.
//!
//! Lines are `|`-delimited and come in four flavours, told apart in this order:
//!
//! ```text
//! # comment, or a blank line                     -> ignored
//! 2.3|apnic|20110113|23486|19850701|20110112|+1000 -> version line
//! apnic|*|ipv4|*|17947|summary                    -> summary line
//! apnic|MM|ipv4|203.81.160.0|4096|20100122|assigned -> record line
//! ```
//!
//! Record lines have 7 fields, or 8 in the extended format where the last
//! one is an opaque id. Record lines whose type is neither `ipv*` nor `asn*`
//! are dropped without error. The start address of an `ipv4` or `ipv6`
//! record must belong to the family its type names.

use nom::{
    IResult, Parser,
    character::complete::{char, digit0, digit1},
    combinator::{all_consuming, map_res, opt, recognize},
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::record::{
    AsnRecord, Entity, IpRecord, Record, ResourceType, SummaryLine, VersionLine,
};

/// Field count of a legacy record line.
pub const LEGACY_FIELDS: usize = 7;

/// Field count of an extended record line.
pub const EXTENDED_FIELDS: usize = 8;

const VERSION_FIELDS: usize = 7;
const SUMMARY_FIELDS: usize = 6;

/// Malformed input. Every variant carries the 1-based input line number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: &'static str,
        found: usize,
    },

    #[error("line {line}: invalid {field}: {value:?}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: invalid address: {value:?}")]
    InvalidAddress { line: usize, value: String },

    #[error("line {line}: {reason}")]
    OutOfRange { line: usize, reason: String },

    #[error("line {line}: no address family for record type {kind:?}")]
    UnknownFamily { line: usize, kind: String },

    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 { line: usize },
}

impl ParseError {
    /// The 1-based line number the error was found on.
    pub fn line(&self) -> usize {
        match self {
            ParseError::FieldCount { line, .. }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::InvalidAddress { line, .. }
            | ParseError::OutOfRange { line, .. }
            | ParseError::UnknownFamily { line, .. }
            | ParseError::InvalidUtf8 { line } => *line,
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// What a single line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Blank or comment line.
    Ignored,
    /// Record line of an unknown resource type.
    Dropped,
    Entity(Entity),
}

/// Recognize the leading numeric token of a version line (`2`, `2.3`, `2.`).
fn version_token(input: &str) -> IResult<&str, &str> {
    recognize((digit1, opt((char('.'), digit0)))).parse(input)
}

fn decimal(input: &str) -> IResult<&str, f64> {
    map_res(version_token, |s: &str| s.parse::<f64>()).parse(input)
}

fn integer(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>()).parse(input)
}

fn parse_decimal(value: &str, field: &'static str, line: usize) -> ParseResult<f64> {
    all_consuming(decimal)
        .parse(value)
        .map(|(_, v)| v)
        .map_err(|_| ParseError::InvalidNumber {
            line,
            field,
            value: value.to_string(),
        })
}

fn parse_integer(value: &str, field: &'static str, line: usize) -> ParseResult<u64> {
    all_consuming(integer)
        .parse(value)
        .map(|(_, v)| v)
        .map_err(|_| ParseError::InvalidNumber {
            line,
            field,
            value: value.to_string(),
        })
}

#[inline]
fn is_ignored(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

#[inline]
fn is_version(line: &str) -> bool {
    version_token(line).is_ok()
}

#[inline]
fn is_summary(line: &str) -> bool {
    line.ends_with("summary")
}

/// Classify and parse one line.
///
/// `fields` is a scratch buffer that is cleared and refilled with the
/// line's `|`-delimited fields.
pub fn parse_line<'a>(
    line: &'a str,
    line_no: usize,
    fields: &mut Vec<&'a str>,
) -> ParseResult<LineOutcome> {
    let line = line.trim_end();
    if is_ignored(line) {
        return Ok(LineOutcome::Ignored);
    }

    fields.clear();
    fields.extend(line.split('|'));

    let entity = if is_version(line) {
        Entity::Version(parse_version(fields, line_no)?)
    } else if is_summary(line) {
        Entity::Summary(parse_summary(fields, line_no)?)
    } else {
        if fields.len() != LEGACY_FIELDS && fields.len() != EXTENDED_FIELDS {
            return Err(ParseError::FieldCount {
                line: line_no,
                expected: "7 or 8",
                found: fields.len(),
            });
        }
        let kind = fields[2];
        if kind.starts_with("ipv") {
            Entity::Ip(parse_ip_record(fields, line_no)?)
        } else if kind.starts_with("asn") {
            Entity::Asn(parse_asn_record(fields, line_no)?)
        } else {
            return Ok(LineOutcome::Dropped);
        }
    };

    Ok(LineOutcome::Entity(entity))
}

fn parse_version(fields: &[&str], line: usize) -> ParseResult<VersionLine> {
    if fields.len() < VERSION_FIELDS {
        return Err(ParseError::FieldCount {
            line,
            expected: "7",
            found: fields.len(),
        });
    }

    Ok(VersionLine {
        version: parse_decimal(fields[0], "version", line)?,
        registry: fields[1].to_string(),
        serial: fields[2].to_string(),
        record_count: parse_integer(fields[3], "record count", line)?,
        start_date: fields[4].to_string(),
        end_date: fields[5].to_string(),
        utc_offset: fields[6].to_string(),
    })
}

fn parse_summary(fields: &[&str], line: usize) -> ParseResult<SummaryLine> {
    if fields.len() < SUMMARY_FIELDS {
        return Err(ParseError::FieldCount {
            line,
            expected: "6",
            found: fields.len(),
        });
    }

    Ok(SummaryLine {
        registry: fields[0].to_string(),
        kind: fields[2].to_string(),
        count: parse_integer(fields[4], "summary count", line)?,
    })
}

/// Build the shared part of a record line. `fields` has 7 or 8 entries.
fn parse_record(fields: &[&str], line: usize) -> ParseResult<Record> {
    Ok(Record {
        registry: fields[0].to_string(),
        country_code: fields[1].to_string(),
        kind: fields[2].to_string(),
        value: parse_integer(fields[4], "value", line)?,
        date: fields[5].to_string(),
        status: fields[6].to_string(),
        opaque_id: fields.get(7).map(|s| s.to_string()),
    })
}

fn parse_ip_record(fields: &[&str], line: usize) -> ParseResult<IpRecord> {
    let record = parse_record(fields, line)?;
    let invalid_address = || ParseError::InvalidAddress {
        line,
        value: fields[3].to_string(),
    };

    // The type field decides the family; the start address must agree with it.
    let start = match record.kind.parse::<ResourceType>().ok() {
        Some(ResourceType::Ipv4) => {
            let addr: Ipv4Addr = fields[3].parse().map_err(|_| invalid_address())?;
            let room = (1u64 << 32) - u64::from(u32::from(addr));
            if record.value > room {
                return Err(ParseError::OutOfRange {
                    line,
                    reason: format!("{} hosts from {} overflow IPv4 space", record.value, addr),
                });
            }
            IpAddr::V4(addr)
        }
        Some(ResourceType::Ipv6) => {
            let addr: Ipv6Addr = fields[3].parse().map_err(|_| invalid_address())?;
            if record.value > 128 {
                return Err(ParseError::OutOfRange {
                    line,
                    reason: format!("IPv6 prefix length {} exceeds 128", record.value),
                });
            }
            IpAddr::V6(addr)
        }
        _ => {
            return Err(ParseError::UnknownFamily {
                line,
                kind: record.kind,
            });
        }
    };

    Ok(IpRecord { record, start })
}

fn parse_asn_record(fields: &[&str], line: usize) -> ParseResult<AsnRecord> {
    let record = parse_record(fields, line)?;
    let start = parse_integer(fields[3], "AS number", line)?;
    let start = u32::try_from(start).map_err(|_| ParseError::InvalidNumber {
        line,
        field: "AS number",
        value: fields[3].to_string(),
    })?;

    Ok(AsnRecord { record, start })
}

/// Line-by-line scanner over one section of a delegation file.
///
/// Yields the line number and outcome of every line, including ignored and
/// dropped ones. Each scanner owns its field buffer, so independent scanners
/// can run concurrently over different sections of the same buffer.
pub struct SectionScanner<'a> {
    rest: &'a [u8],
    next_line: usize,
    fields: Vec<&'a str>,
}

impl<'a> SectionScanner<'a> {
    /// Create a scanner for `section`, whose first line is `first_line` (1-based).
    pub fn new(section: &'a [u8], first_line: usize) -> Self {
        Self {
            rest: section,
            next_line: first_line,
            fields: Vec::with_capacity(EXTENDED_FIELDS),
        }
    }

    fn next_raw_line(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let rest = self.rest;
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.rest = &rest[pos + 1..];
                Some(&rest[..pos])
            }
            None => {
                self.rest = &[];
                Some(rest)
            }
        }
    }
}

impl<'a> Iterator for SectionScanner<'a> {
    type Item = ParseResult<(usize, LineOutcome)>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.next_raw_line()?;
        let line_no = self.next_line;
        self.next_line += 1;

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => return Some(Err(ParseError::InvalidUtf8 { line: line_no })),
        };

        Some(parse_line(line, line_no, &mut self.fields).map(|outcome| (line_no, outcome)))
    }
}
