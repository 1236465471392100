//! Radix prefix trie answering IP-in-prefix queries for the session.
//!
//! Each inserted prefix carries the announcing ASN and the source that
//! observed the announcement. Re-inserting an existing prefix is
//! idempotent. One binary trie per address family; lookups walk from the
//! most significant bit.

use std::net::IpAddr;

use parking_lot::RwLock;
use surveyor_core::Cidr;

/// What the ranger stores per prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangerEntry {
    pub cidr: Cidr,
    pub asn: u32,
    pub source: String,
}

#[derive(Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    entry: Option<RangerEntry>,
}

#[derive(Default)]
struct Roots {
    v4: Node,
    v6: Node,
}

/// Thread-safe prefix trie mapping IP addresses to announcements.
pub struct CidrRanger {
    roots: RwLock<Roots>,
}

fn addr_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

/// The `depth`-th bit of `bits` counting from the most significant bit of
/// a `width`-bit address.
fn bit_at(bits: u128, width: u8, depth: u8) -> usize {
    usize::from((bits >> (width - 1 - depth)) & 1 == 1)
}

impl CidrRanger {
    /// Creates an empty ranger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(Roots::default()),
        }
    }

    /// Inserts a prefix with its announcement data. Idempotent: inserting
    /// an existing prefix replaces its entry.
    pub fn insert(&self, entry: RangerEntry) {
        let (bits, width) = addr_bits(entry.cidr.network());
        let prefix_len = entry.cidr.prefix_len();
        let mut roots = self.roots.write();
        let mut node = if entry.cidr.is_ipv4() {
            &mut roots.v4
        } else {
            &mut roots.v6
        };
        for depth in 0..prefix_len {
            let idx = bit_at(bits, width, depth);
            node = node.children[idx].get_or_insert_with(Box::default);
        }
        node.entry = Some(entry);
    }

    /// Whether any inserted prefix contains `addr`.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        !self.containing_networks(addr).is_empty()
    }

    /// All inserted prefixes containing `addr`, widest first.
    #[must_use]
    pub fn containing_networks(&self, addr: IpAddr) -> Vec<RangerEntry> {
        let (bits, width) = addr_bits(addr);
        let roots = self.roots.read();
        let mut node = if addr.is_ipv4() { &roots.v4 } else { &roots.v6 };
        let mut found = Vec::new();
        if let Some(entry) = &node.entry {
            found.push(entry.clone());
        }
        for depth in 0..width {
            let idx = bit_at(bits, width, depth);
            match &node.children[idx] {
                Some(child) => {
                    node = child;
                    if let Some(entry) = &node.entry {
                        found.push(entry.clone());
                    }
                }
                None => break,
            }
        }
        found
    }

    /// The most specific announcement containing `addr`, if any.
    #[must_use]
    pub fn longest_match(&self, addr: IpAddr) -> Option<RangerEntry> {
        self.containing_networks(addr).into_iter().last()
    }

    /// All inserted prefixes fully covered by `cidr`, including an exact
    /// match.
    #[must_use]
    pub fn covered_networks(&self, cidr: &Cidr) -> Vec<RangerEntry> {
        let (bits, width) = addr_bits(cidr.network());
        let roots = self.roots.read();
        let mut node = if cidr.is_ipv4() { &roots.v4 } else { &roots.v6 };
        for depth in 0..cidr.prefix_len() {
            let idx = bit_at(bits, width, depth);
            match &node.children[idx] {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut found = Vec::new();
        collect_subtree(node, &mut found);
        found
    }
}

fn collect_subtree(node: &Node, out: &mut Vec<RangerEntry>) {
    if let Some(entry) = &node.entry {
        out.push(entry.clone());
    }
    for child in node.children.iter().flatten() {
        collect_subtree(child, out);
    }
}

impl Default for CidrRanger {
    fn default() -> Self {
        Self::new()
    }
}
