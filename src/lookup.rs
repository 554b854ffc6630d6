//! UDP lookup protocol
//!
//! Resolves the owner of keys that belong neither to us nor to our direct successor.
//! A query walks the ring hop by hop, every node forwarding it unmodified to its own successor,
//! until a node finds that its successor is responsible.
//! That node answers directly to the address embedded in the query, not back through the chain.
//!
//! Every node binds its lookup socket on the same address and port as its HTTP listener,
//! so the addresses neighbors know for redirects also reach their lookup service.
//!
//! There is no hop count and no retransmission.
//! A lost or unanswerable query is only detected through the mandatory timeout of
//! [`LookupService::resolve_owner`].

use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::ring::lookup_messages::{DecodeError, LookupMessage, LOOKUP_MESSAGE_SIZE};
use crate::ring::{is_between_on_ring, Key, NodeIdentity, RingView};

/// Default upper bound for a single lookup round-trip
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("no answer for key {key:#06x} within {timeout:?}")]
    Timeout { key: Key, timeout: Duration },
    #[error("lookup socket failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("could not encode lookup message: {0}")]
    Encode(#[from] bincode::Error),
}

/// Anything able to tell who owns a key further around the ring
///
/// The routing engine only depends on this trait,
/// so the blocking round-trip can be swapped for a concurrent implementation without touching it.
#[async_trait]
pub trait OwnerResolver: Send {
    /// Resolves the node responsible for `key`, giving up after a bounded time
    async fn resolve_owner(&mut self, key: Key) -> Result<NodeIdentity, LookupError>;
}

/// The lookup endpoint of the local node
pub struct LookupService {
    socket: UdpSocket,
    ring: RingView,
    timeout: Duration,
}

impl LookupService {
    /// Binds the lookup socket on the address of the local node
    pub async fn bind(ring: RingView, timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(ring.own().address).await?;
        debug!(
            "{}: Lookup service listening on {}",
            ring.own().address,
            socket.local_addr()?
        );
        Ok(LookupService {
            socket,
            ring,
            timeout,
        })
    }

    /// Waits for the next datagram
    ///
    /// Datagrams of the wrong size or kind are reported as [`LookupError::Decode`],
    /// the socket itself stays usable.
    pub async fn recv(&self) -> Result<LookupMessage, LookupError> {
        // One spare byte so oversized datagrams are detected instead of silently truncated
        let mut buf = [0u8; LOOKUP_MESSAGE_SIZE + 1];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        trace!("{}: Received {} bytes from {}", self.own(), n, from);
        Ok(LookupMessage::decode(&buf[..n])?)
    }

    /// Serves a message that arrived while no lookup of our own is waiting for it
    ///
    /// Queries are answered if our successor (or we ourselves) own the key, and forwarded otherwise.
    /// Answers are stale leftovers of a lookup that already timed out.
    pub async fn handle(&self, message: LookupMessage) -> Result<(), LookupError> {
        match message {
            LookupMessage::Query { key, origin } => {
                if origin == self.ring.own() {
                    // Our own query went all the way around without an answer
                    warn!(
                        "{}: Query for {:#06x} returned unanswered, dropping it",
                        self.own(),
                        key
                    );
                    return Ok(());
                }
                if self.ring.owned_by_successor(key) {
                    let owner = self.ring.successor();
                    debug!(
                        "{}: Successor {} owns {:#06x}, answering {}",
                        self.own(),
                        owner,
                        key,
                        origin
                    );
                    self.send(LookupMessage::Found { owner }, origin).await
                } else if self.ring.owns_locally(key) {
                    debug!(
                        "{}: We own {:#06x}, answering {}",
                        self.own(),
                        key,
                        origin
                    );
                    let owner = self.ring.own();
                    self.send(LookupMessage::Found { owner }, origin).await
                } else {
                    let successor = self.ring.successor();
                    debug!(
                        "{}: Forwarding query for {:#06x} to {}",
                        self.own(),
                        key,
                        successor
                    );
                    self.send(message, successor).await
                }
            }
            LookupMessage::Found { owner } => {
                debug!("{}: Ignoring stale answer {}", self.own(), owner);
                Ok(())
            }
        }
    }

    async fn send(&self, message: LookupMessage, to: NodeIdentity) -> Result<(), LookupError> {
        let buf = message.encode()?;
        self.socket.send_to(&buf, to.address).await?;
        Ok(())
    }

    /// Serves everything already queued on the socket, without waiting for more
    async fn drain(&self) -> Result<(), LookupError> {
        let mut buf = [0u8; LOOKUP_MESSAGE_SIZE + 1];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((n, from)) => match LookupMessage::decode(&buf[..n]) {
                    Ok(message) => self.handle(message).await?,
                    Err(e) => warn!("{}: Invalid datagram from {}: {}", self.own(), from, e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Whether `owner` can be responsible for `key`, given that neither we nor our successor are
    ///
    /// The owner has to lie beyond our successor, before us, and at or past the key.
    fn is_plausible_owner(&self, key: Key, owner: NodeIdentity) -> bool {
        let successor = self.ring.successor().id;
        is_between_on_ring(key, successor, owner.id)
            && is_between_on_ring(owner.id, successor, self.ring.predecessor().id)
    }

    fn own(&self) -> SocketAddrV4 {
        self.ring.own().address
    }
}

#[async_trait]
impl OwnerResolver for LookupService {
    /// Sends a query to our successor and waits for the answer on the same socket
    ///
    /// Queries of other nodes arriving in the meantime are still served.
    async fn resolve_owner(&mut self, key: Key) -> Result<NodeIdentity, LookupError> {
        // Answers to earlier lookups may still arrive after this point.
        // Answers carry no key, so only owners that cannot hold `key` are told apart.
        self.drain().await?;
        let query = LookupMessage::Query {
            key,
            origin: self.ring.own(),
        };
        debug!(
            "{}: Looking up {:#06x} via {}",
            self.own(),
            key,
            self.ring.successor()
        );
        self.send(query, self.ring.successor()).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let message = match timeout_at(deadline, self.recv()).await {
                Err(_) => {
                    return Err(LookupError::Timeout {
                        key,
                        timeout: self.timeout,
                    })
                }
                Ok(Err(LookupError::Decode(e))) => {
                    warn!("{}: Invalid datagram: {}", self.own(), e);
                    continue;
                }
                Ok(result) => result?,
            };
            match message {
                LookupMessage::Found { owner } if self.is_plausible_owner(key, owner) => {
                    debug!("{}: {:#06x} is owned by {}", self.own(), key, owner);
                    return Ok(owner);
                }
                LookupMessage::Found { owner } => {
                    debug!(
                        "{}: Ignoring stale answer {} while looking up {:#06x}",
                        self.own(),
                        owner,
                        key
                    );
                }
                query => self.handle(query).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn peer(id: Key, port: u16) -> NodeIdentity {
        NodeIdentity::new(id, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    /// Binds a plain socket standing in for a node, returning what it receives
    async fn recv_message(socket: &UdpSocket) -> LookupMessage {
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("Nothing received")
            .unwrap();
        LookupMessage::decode(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_answer_when_successor_owns_key() {
        let origin_socket = UdpSocket::bind("127.0.0.1:42101").await.unwrap();
        let origin = peer(10, 42101);
        let successor = peer(90, 42103);
        let service = LookupService::bind(
            RingView::new(peer(50, 42102), origin, successor),
            DEFAULT_LOOKUP_TIMEOUT,
        )
        .await
        .unwrap();

        service
            .handle(LookupMessage::Query { key: 70, origin })
            .await
            .unwrap();
        assert_eq!(
            recv_message(&origin_socket).await,
            LookupMessage::Found { owner: successor }
        );
    }

    #[tokio::test]
    async fn test_forward_unmodified_query() {
        let successor_socket = UdpSocket::bind("127.0.0.1:42113").await.unwrap();
        let origin = peer(10, 42111);
        let service = LookupService::bind(
            RingView::new(peer(50, 42112), origin, peer(90, 42113)),
            DEFAULT_LOOKUP_TIMEOUT,
        )
        .await
        .unwrap();

        let query = LookupMessage::Query { key: 200, origin };
        service.handle(query).await.unwrap();
        assert_eq!(recv_message(&successor_socket).await, query);
    }

    #[tokio::test]
    async fn test_resolve_owner() {
        let successor_socket = UdpSocket::bind("127.0.0.1:42122").await.unwrap();
        let own = peer(10, 42121);
        let owner = peer(90, 42123);
        let mut service = LookupService::bind(
            RingView::new(own, owner, peer(50, 42122)),
            DEFAULT_LOOKUP_TIMEOUT,
        )
        .await
        .unwrap();

        // Plays the successor, answering the query directly
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, _) = successor_socket.recv_from(&mut buf).await.unwrap();
            match LookupMessage::decode(&buf[..n]).unwrap() {
                LookupMessage::Query { key, origin } => {
                    assert_eq!(key, 70);
                    // A late answer to some earlier lookup, 60 cannot own 70
                    let stale = LookupMessage::Found {
                        owner: peer(60, 42124),
                    };
                    for answer in [stale, LookupMessage::Found { owner }] {
                        successor_socket
                            .send_to(&answer.encode().unwrap(), origin.address)
                            .await
                            .unwrap();
                    }
                }
                message => panic!("Unexpected message {:?}", message),
            }
        });

        assert_eq!(service.resolve_owner(70).await.unwrap(), owner);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_owner_times_out() {
        // Nobody listens on the successor's port
        let mut service = LookupService::bind(
            RingView::new(peer(10, 42131), peer(90, 42133), peer(50, 42132)),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        let started = std::time::Instant::now();
        let result = service.resolve_owner(70).await;
        assert!(matches!(result, Err(LookupError::Timeout { key: 70, .. })));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
