//! RIR Stats - A Rust library for parsing delegation statistics published by
//! regional internet registries.
//!
//! This crate provides:
//! - A concurrent reader that splits a delegation file into sections and
//!   parses them in parallel
//! - Conversion of IPv4 host counts into exact CIDR blocks
//! - Country and address queries over the parsed records
//! - HTTP and on-disk cached providers for the registries' files
//!
//! # Example
//!
//! ```rust,no_run
//! use rir_stats::{Query, QueryEngine, ReadOptions, Reader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("delegated-apnic-extended-latest")?;
//! let records = Reader::new(data, ReadOptions::default()).read().await?;
//!
//! let sets = vec![records];
//! let query = Query::from_inputs(None, Some("203.81.160.5"), false)?;
//! for line in QueryEngine::new(&sets).run(&query).lines() {
//!     println!("{}", line);
//! }
//! # Ok(())
//! # }
//! ```

pub mod blocks;
pub mod config;
pub mod parser;
pub mod provider;
pub mod query;
pub mod reader;
pub mod record;
pub mod split;
pub mod stats;

#[cfg(test)]
mod testdata;

pub use blocks::{derive_blocks, ipv4_blocks, usable_hosts};
pub use config::{Config, ProviderConfig};
pub use parser::{LineOutcome, ParseError, SectionScanner, parse_line};
pub use provider::{
    CachedProvider, FileProvider, HttpProvider, Provider, ProviderError, load_all,
};
pub use query::{AddressMatch, Query, QueryEngine, QueryError, QueryResult};
pub use reader::{Aggregator, ReadError, ReadOptions, Reader};
pub use record::{
    AsnRecord, Entity, IpRecord, Record, RecordSet, ResourceType, SummaryLine, VersionLine,
};
pub use split::{SplitError, split};
pub use stats::{ParseStats, StatsSummary};
