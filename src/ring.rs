//! Static ring topology of a single node
//!
//! Every node owns a slice of a circular 16-bit key space.
//! Resource paths are mapped into that space by [`hash_path`],
//! and a node is responsible for all keys between its predecessor (exclusive) and itself (inclusive).
//!
//! Unlike a full [Chord](https://en.wikipedia.org/wiki/Chord_(peer-to-peer)) ring,
//! the topology is fixed at startup:
//! - Each node knows exactly two neighbors, its predecessor and its successor
//! - There is no join, leave, stabilization or finger table
//! - Neighbors are plain copies of id and address, never live links to other nodes
//!
//! Keys that are neither ours nor our successor's are resolved hop by hop with the
//! [lookup protocol](crate::lookup).

use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddrV4;

use sha2::{Digest, Sha256};

pub mod lookup_messages;

/// Position of a resource or a node on the ring
pub type Key = u16;

/// Maps a resource path onto the ring
///
/// The key consists of the first two bytes of the SHA-256 digest of the path, read big-endian.
/// All nodes of a ring must agree on this function, otherwise their ownership decisions diverge.
pub fn hash_path(path: &str) -> Key {
    let digest = Sha256::digest(path.as_bytes());
    u16::from_be_bytes([digest[0], digest[1]])
}

/// Checks whether `value` lies in the half-open ring interval `(lower, upper]`
///
/// The interval wraps through zero if `upper < lower`.
/// If both bounds are equal a single node spans the entire ring, so every key is contained.
pub fn is_between_on_ring(value: Key, lower: Key, upper: Key) -> bool {
    match lower.cmp(&upper) {
        Ordering::Equal => true,
        Ordering::Less => value > lower && value <= upper,
        Ordering::Greater => value > lower || value <= upper, // Wrap-around
    }
}

/// Uniquely identifies a node of the ring
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    /// Position of the node on the ring
    pub id: Key,
    /// Address under which the node serves HTTP (TCP) and lookups (UDP)
    pub address: SocketAddrV4,
}

impl NodeIdentity {
    pub fn new(id: Key, address: SocketAddrV4) -> Self {
        NodeIdentity { id, address }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {:#06x}", self.address, self.id)
    }
}

/// Where a key has to be served from, seen from the local node
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route {
    /// We own the key and answer from the local store
    Local,
    /// Our direct successor owns the key
    Successor(NodeIdentity),
    /// The key is owned further around the ring and needs a lookup round-trip
    Lookup,
}

/// Immutable view of the local node and its two neighbors
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingView {
    own: NodeIdentity,
    predecessor: NodeIdentity,
    successor: NodeIdentity,
}

impl RingView {
    pub fn new(own: NodeIdentity, predecessor: NodeIdentity, successor: NodeIdentity) -> Self {
        RingView {
            own,
            predecessor,
            successor,
        }
    }

    pub fn own(&self) -> NodeIdentity {
        self.own
    }

    pub fn predecessor(&self) -> NodeIdentity {
        self.predecessor
    }

    pub fn successor(&self) -> NodeIdentity {
        self.successor
    }

    /// Returns true if `key` falls into `(predecessor, self]`
    pub fn owns_locally(&self, key: Key) -> bool {
        is_between_on_ring(key, self.predecessor.id, self.own.id)
    }

    /// Returns true if `key` falls into `(self, successor]`
    pub fn owned_by_successor(&self, key: Key) -> bool {
        is_between_on_ring(key, self.own.id, self.successor.id)
    }

    /// A ring of two members, where predecessor and successor are the same peer
    pub fn is_degenerate(&self) -> bool {
        self.predecessor.id == self.successor.id
    }

    /// Decides who is responsible for `key`
    ///
    /// A degenerate ring never yields [`Route::Lookup`],
    /// since every key belongs either to us or to our only peer.
    pub fn route(&self, key: Key) -> Route {
        if self.owns_locally(key) {
            Route::Local
        } else if self.owned_by_successor(key) {
            Route::Successor(self.successor)
        } else if self.is_degenerate() {
            // Both intervals together span the whole ring, this only happens with inconsistent ids
            Route::Local
        } else {
            Route::Lookup
        }
    }
}
