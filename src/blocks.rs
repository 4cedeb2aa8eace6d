//! Conversion of IP records into CIDR network blocks.
//!
//! IPv6 records already carry a prefix length. IPv4 records carry a host
//! count that is neither necessarily a power of two nor aligned on a
//! power-of-two boundary, so it is covered by the minimal sequence of
//! maximal aligned blocks.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr};

use crate::record::IpRecord;

/// Size of the IPv4 address space.
const IPV4_SPACE: u64 = 1 << 32;

/// Derive the network blocks covered by an IP record, in address order.
pub fn derive_blocks(record: &IpRecord) -> Vec<IpNet> {
    match record.start {
        IpAddr::V4(start) => ipv4_blocks(start, record.record.value)
            .into_iter()
            .map(IpNet::V4)
            .collect(),
        IpAddr::V6(start) => {
            // Parsed records never exceed 128.
            let prefix = record.record.value.min(128) as u8;
            match Ipv6Net::new(start, prefix) {
                Ok(net) => vec![IpNet::V6(net)],
                Err(_) => Vec::new(),
            }
        }
    }
}

/// Cover `hosts` addresses starting at `start` with CIDR blocks.
///
/// Each block is the largest one that both starts aligned at the current
/// address and does not exceed the remaining host count. Stops at the end of
/// the address space.
///
/// # Example
///
/// ```
/// use rir_stats::blocks::ipv4_blocks;
/// use std::net::Ipv4Addr;
///
/// let blocks = ipv4_blocks(Ipv4Addr::new(193, 9, 25, 0), 768);
/// let shown: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
/// assert_eq!(shown, ["193.9.25.0/24", "193.9.26.0/23"]);
/// ```
pub fn ipv4_blocks(start: Ipv4Addr, hosts: u64) -> Vec<Ipv4Net> {
    let mut blocks = Vec::new();
    let mut addr = u64::from(u32::from(start));
    let mut remaining = hosts;

    while remaining > 0 && addr < IPV4_SPACE {
        let alignment_bits = if addr == 0 { 32 } else { addr.trailing_zeros().min(32) };
        let size_bits = 63 - remaining.leading_zeros();
        let block_bits = alignment_bits.min(size_bits);

        let prefix = (32 - block_bits) as u8;
        let network = Ipv4Addr::from(addr as u32);
        let Ok(net) = Ipv4Net::new(network, prefix) else {
            break;
        };
        blocks.push(net);

        let block_size = 1u64 << block_bits;
        remaining -= block_size;
        addr += block_size;
    }

    blocks
}

/// Number of usable host addresses in a block.
///
/// Network and broadcast addresses are excluded, so /31 and /32 count as zero.
pub fn usable_hosts(net: &Ipv4Net) -> u64 {
    let prefix = net.prefix_len();
    if prefix < 31 {
        (1u64 << (32 - prefix)) - 2
    } else {
        0
    }
}
