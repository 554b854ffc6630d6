use std::net::{Ipv4Addr, SocketAddrV4};

use bincode::config::{BigEndian, FixintEncoding, WithOtherEndian, WithOtherIntEncoding};
use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ring::{Key, NodeIdentity};

/// Size of every lookup datagram on the wire
pub const LOOKUP_MESSAGE_SIZE: usize = 11;

const KIND_QUERY: u8 = 0;
const KIND_FOUND: u8 = 1;

/// Fixed-width, big-endian bincode options, so a frame maps byte for byte onto the wire layout
pub(crate) fn with_big_endian(
) -> WithOtherEndian<WithOtherIntEncoding<DefaultOptions, FixintEncoding>, BigEndian> {
    DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

/// Raw datagram layout: `kind:u8, key:u16, id:u16, ip:u32, port:u16`
#[derive(Serialize, Deserialize, Debug)]
struct LookupFrame {
    kind: u8,
    key: u16,
    id: u16,
    ip: u32,
    port: u16,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("lookup datagram has {0} bytes, expected {expected}", expected = LOOKUP_MESSAGE_SIZE)]
    InvalidSize(usize),
    #[error("unknown lookup message kind {0}")]
    UnknownKind(u8),
    #[error("malformed lookup datagram: {0}")]
    Bincode(#[from] bincode::Error),
}

/// All messages exchanged between nodes while resolving the owner of a key
///
/// Both variants share the same 11 byte record.
/// For a query the node fields describe the node that started the lookup,
/// for an answer they describe the node that owns the key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LookupMessage {
    /// Who owns `key`? Answer directly to `origin`.
    Query { key: Key, origin: NodeIdentity },
    /// `owner` is responsible for the key that was asked for
    Found { owner: NodeIdentity },
}

impl LookupMessage {
    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        let frame = match *self {
            LookupMessage::Query { key, origin } => LookupFrame {
                kind: KIND_QUERY,
                key,
                id: origin.id,
                ip: u32::from(*origin.address.ip()),
                port: origin.address.port(),
            },
            // The key field carries the owner id as well
            LookupMessage::Found { owner } => LookupFrame {
                kind: KIND_FOUND,
                key: owner.id,
                id: owner.id,
                ip: u32::from(*owner.address.ip()),
                port: owner.address.port(),
            },
        };
        let buf = with_big_endian().serialize(&frame)?;
        debug_assert_eq!(buf.len(), LOOKUP_MESSAGE_SIZE);
        Ok(buf)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        if datagram.len() != LOOKUP_MESSAGE_SIZE {
            return Err(DecodeError::InvalidSize(datagram.len()));
        }
        let frame: LookupFrame = with_big_endian().deserialize(datagram)?;
        let node = NodeIdentity::new(
            frame.id,
            SocketAddrV4::new(Ipv4Addr::from(frame.ip), frame.port),
        );
        match frame.kind {
            KIND_QUERY => Ok(LookupMessage::Query {
                key: frame.key,
                origin: node,
            }),
            KIND_FOUND => Ok(LookupMessage::Found { owner: node }),
            kind => Err(DecodeError::UnknownKind(kind)),
        }
    }
}
