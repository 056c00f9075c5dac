//! Family-aware address comparison and CIDR containment.
//!
//! All functions are pure. Cross-family comparisons never panic: `equals`
//! and `within_network` return false, and `compare` orders every v4
//! address before every v6 address regardless of value.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::types::Family;

/// Exact equality; false across families.
pub fn equals(a: &IpAddr, b: &IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(x), IpAddr::V4(y)) => x == y,
        (IpAddr::V6(x), IpAddr::V6(y)) => x == y,
        _ => false,
    }
}

/// True when the top `prefix_bits` bits of `addr` match `network`.
/// A zero-length prefix matches everything; this also sidesteps the
/// undefined shift-by-width on the v4 word.
pub fn within_network(addr: &IpAddr, network: &IpAddr, prefix_bits: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            if prefix_bits == 0 {
                return true;
            }
            let bits = prefix_bits.min(32);
            let mask: u32 = u32::MAX << (32 - u32::from(bits));
            (u32::from(*a) & mask) == (u32::from(*n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let bits = u32::from(prefix_bits.min(128));
            let aw = a.octets();
            let nw = n.octets();
            let whole = (bits / 32) as usize;
            for i in 0..whole {
                if word(&aw, i) != word(&nw, i) {
                    return false;
                }
            }
            let rem = bits % 32;
            if rem == 0 || whole >= 4 {
                return true;
            }
            let mask: u32 = u32::MAX << (32 - rem);
            (word(&aw, whole) & mask) == (word(&nw, whole) & mask)
        }
        _ => false,
    }
}

fn word(octets: &[u8; 16], i: usize) -> u32 {
    u32::from_be_bytes([
        octets[i * 4],
        octets[i * 4 + 1],
        octets[i * 4 + 2],
        octets[i * 4 + 3],
    ])
}

/// Raw-byte ordering for the address sort keys: family first (v4 sorts
/// before v6), then network byte order within the family.
pub fn compare(a: &IpAddr, b: &IpAddr) -> Ordering {
    match Family::of(a).cmp(&Family::of(b)) {
        Ordering::Equal => match (a, b) {
            (IpAddr::V4(x), IpAddr::V4(y)) => x.octets().cmp(&y.octets()),
            (IpAddr::V6(x), IpAddr::V6(y)) => x.octets().cmp(&y.octets()),
            _ => unreachable!("families already equal"),
        },
        ord => ord,
    }
}
