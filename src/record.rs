//! Data structures representing delegation statistics.
//!
//! A delegation file is made of one version line, a handful of per-type
//! summary lines and one record line per delegated block of address space or
//! AS numbers. All of these are produced once by the reader and are read-only
//! afterwards.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// The number resource a summary or record line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Autonomous system numbers
    Asn,
    /// IPv4 address space
    Ipv4,
    /// IPv6 address space
    Ipv6,
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asn" => Ok(ResourceType::Asn),
            "ipv4" => Ok(ResourceType::Ipv4),
            "ipv6" => Ok(ResourceType::Ipv6),
            other => Err(format!("unknown resource type: {}", other)),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Asn => write!(f, "asn"),
            ResourceType::Ipv4 => write!(f, "ipv4"),
            ResourceType::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// The header line of a delegation file.
///
/// ```text
/// 2.3|apnic|20110113|23486|19850701|20110112|+1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionLine {
    /// Format version of the file.
    pub version: f64,
    pub registry: String,
    pub serial: String,
    /// Total number of records the file declares, summary lines excluded.
    pub record_count: u64,
    pub start_date: String,
    pub end_date: String,
    pub utc_offset: String,
}

/// A per-type record count declared by the file itself.
///
/// ```text
/// apnic|*|ipv4|*|17947|summary
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryLine {
    pub registry: String,
    /// Resource type as written in the file (`asn`, `ipv4`, `ipv6`).
    pub kind: String,
    pub count: u64,
}

impl SummaryLine {
    /// The resource type this summary counts, if it is one we know.
    pub fn resource_type(&self) -> Option<ResourceType> {
        self.kind.parse().ok()
    }
}

/// Fields shared by every delegation record line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Record {
    pub registry: String,
    /// ISO 3166 two-letter code.
    pub country_code: String,
    /// Resource type as written in the file.
    pub kind: String,
    /// Host count for IPv4, prefix length for IPv6, number of AS numbers for ASN.
    pub value: u64,
    /// Allocation date as `YYYYMMDD`.
    pub date: String,
    pub status: String,
    /// Only present in the extended format.
    pub opaque_id: Option<String>,
}

impl Record {
    /// Parse the allocation date.
    ///
    /// Returns `None` for the placeholder dates some registries publish
    /// for reserved or available space.
    pub fn allocation_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y%m%d").ok()
    }
}

/// A record of delegated IPv4 or IPv6 address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IpRecord {
    #[serde(flatten)]
    pub record: Record,
    /// First address of the delegation.
    pub start: IpAddr,
}

impl IpRecord {
    /// The address family of this record. The parser only accepts a start
    /// address of the family named by the record's type.
    pub fn resource_type(&self) -> ResourceType {
        match self.start {
            IpAddr::V4(_) => ResourceType::Ipv4,
            IpAddr::V6(_) => ResourceType::Ipv6,
        }
    }
}

/// A record of delegated AS numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AsnRecord {
    #[serde(flatten)]
    pub record: Record,
    /// First AS number of the delegation.
    pub start: u32,
}

/// A single meaningful line of a delegation file.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Version(VersionLine),
    Summary(SummaryLine),
    Ip(IpRecord),
    Asn(AsnRecord),
}

/// The parsed content of one delegation file.
///
/// The declared counts are copied from the file as-is. In particular the
/// per-type counts are whatever the summary lines say and are never checked
/// against the number of records actually found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSet {
    pub version: VersionLine,
    /// Record count from the version line.
    pub declared_total_count: u64,
    pub declared_asn_count: u64,
    pub declared_ipv4_count: u64,
    pub declared_ipv6_count: u64,
    pub asns: Vec<AsnRecord>,
    pub ips: Vec<IpRecord>,
}

impl RecordSet {
    /// Registry named on the version line.
    pub fn registry(&self) -> &str {
        &self.version.registry
    }

    /// Declared count for a resource type.
    pub fn declared_count(&self, kind: ResourceType) -> u64 {
        match kind {
            ResourceType::Asn => self.declared_asn_count,
            ResourceType::Ipv4 => self.declared_ipv4_count,
            ResourceType::Ipv6 => self.declared_ipv6_count,
        }
    }
}
