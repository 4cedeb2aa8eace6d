//! Queries over parsed delegation data.
//!
//! Two kinds of question are answered: which IPv4 blocks were delegated to a
//! country, and which country a given address was delegated to.

use chrono::NaiveDate;
use ipnet::{IpNet, Ipv4Net};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

use crate::blocks::{derive_blocks, usable_hosts};
use crate::record::RecordSet;

/// Errors building a query from user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid country code: {0:?} (expected two letters)")]
    InvalidCountry(String),

    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("give either a country code or an IP address, not both")]
    Ambiguous,

    #[error("give a country code or an IP address")]
    Missing,
}

/// A question asked of the delegation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// All IPv4 blocks delegated to a country, or their usable host count.
    Country { code: String, host_count: bool },
    /// Every delegation containing an address.
    Address(IpAddr),
}

impl Query {
    /// Build a query from the two mutually exclusive user inputs.
    ///
    /// Country codes are upper-cased since registries publish them that way.
    pub fn from_inputs(
        country: Option<&str>,
        address: Option<&str>,
        host_count: bool,
    ) -> Result<Self, QueryError> {
        match (country, address) {
            (Some(_), Some(_)) => Err(QueryError::Ambiguous),
            (None, None) => Err(QueryError::Missing),
            (Some(code), None) => {
                let code = code.trim();
                if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(QueryError::InvalidCountry(code.to_string()));
                }
                Ok(Query::Country {
                    code: code.to_ascii_uppercase(),
                    host_count,
                })
            }
            (None, Some(addr)) => addr
                .trim()
                .parse()
                .map(Query::Address)
                .map_err(|_| QueryError::InvalidAddress(addr.to_string())),
        }
    }
}

/// A delegation containing a queried address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressMatch {
    pub registry: String,
    pub country_code: String,
    pub block: IpNet,
    /// Allocation date, when the registry published a real one.
    pub allocated: Option<NaiveDate>,
}

impl fmt::Display for AddressMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.country_code, self.block)
    }
}

/// The answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    Blocks(Vec<Ipv4Net>),
    HostCount(u64),
    Matches(Vec<AddressMatch>),
}

impl QueryResult {
    /// One line of output per result item.
    pub fn lines(&self) -> Vec<String> {
        match self {
            QueryResult::Blocks(blocks) => blocks.iter().map(|b| b.to_string()).collect(),
            QueryResult::HostCount(count) => vec![count.to_string()],
            QueryResult::Matches(matches) => matches.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Answers queries over the record sets of any number of registries.
pub struct QueryEngine<'a> {
    sets: &'a [RecordSet],
}

impl<'a> QueryEngine<'a> {
    pub fn new(sets: &'a [RecordSet]) -> Self {
        Self { sets }
    }

    /// Run a query.
    pub fn run(&self, query: &Query) -> QueryResult {
        match query {
            Query::Country { code, host_count } => {
                let blocks = self.country_blocks(code);
                if *host_count {
                    QueryResult::HostCount(host_count_of(&blocks))
                } else {
                    QueryResult::Blocks(blocks)
                }
            }
            Query::Address(addr) => QueryResult::Matches(self.address_matches(*addr)),
        }
    }

    /// IPv4 blocks delegated to `country`, record by record.
    pub fn country_blocks(&self, country: &str) -> Vec<Ipv4Net> {
        self.sets
            .iter()
            .flat_map(|set| &set.ips)
            .filter(|record| record.start.is_ipv4() && record.record.country_code == country)
            .flat_map(derive_blocks)
            .filter_map(|block| match block {
                IpNet::V4(net) => Some(net),
                IpNet::V6(_) => None,
            })
            .collect()
    }

    /// Every delegated block containing `addr`.
    ///
    /// Overlapping source data yields several matches; all of them are kept.
    pub fn address_matches(&self, addr: IpAddr) -> Vec<AddressMatch> {
        self.sets
            .iter()
            .flat_map(|set| &set.ips)
            .filter(|record| record.start.is_ipv4() == addr.is_ipv4())
            .flat_map(|record| {
                derive_blocks(record)
                    .into_iter()
                    .filter(move |block| block.contains(&addr))
                    .map(move |block| AddressMatch {
                        registry: record.record.registry.clone(),
                        country_code: record.record.country_code.clone(),
                        block,
                        allocated: record.record.allocation_date(),
                    })
            })
            .collect()
    }
}

/// Total usable hosts across `blocks`.
pub fn host_count_of(blocks: &[Ipv4Net]) -> u64 {
    blocks.iter().map(usable_hosts).sum()
}
