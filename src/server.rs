//! Connection and pipeline manager
//!
//! The node serves exactly one HTTP connection at a time.
//! While a client is connected the listener is not polled, so further clients queue in the backlog.
//! All requests that arrive on the connection are handled strictly in order,
//! including several pipelined requests delivered in a single read.
//!
//! A single task drives everything:
//! - the listening socket, while no client is connected
//! - the active connection, while there is one
//! - the lookup socket in ring mode, answering and forwarding queries of other nodes

use std::future;
use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use http::StatusCode;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::http::{parse_request, Parsed, Reply, HTTP_MAX_SIZE};
use crate::lookup::{LookupError, LookupService, OwnerResolver};
use crate::ring::lookup_messages::LookupMessage;
use crate::routing::Router;
use crate::store::ResourceStore;

/// Pending connections the kernel keeps for us while we are busy with a client
const LISTEN_BACKLOG: u32 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ConnectionStatus {
    Open,
    Closed,
}

/// The one active client connection and its receive buffer
struct ConnectionState {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Box<[u8]>,
    /// Number of occupied bytes at the front of `buffer`
    end: usize,
}

impl ConnectionState {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        ConnectionState {
            stream,
            peer,
            buffer: vec![0; HTTP_MAX_SIZE].into_boxed_slice(),
            end: 0,
        }
    }

    async fn read(&mut self) -> io::Result<usize> {
        self.stream.read(&mut self.buffer[self.end..]).await
    }

    /// Handles all complete requests in the buffer after `n` new bytes arrived
    ///
    /// Consumed requests are discarded and the remainder is moved to the front of the buffer.
    async fn process<R: OwnerResolver>(
        &mut self,
        n: usize,
        router: &mut Router<R>,
    ) -> ConnectionStatus {
        self.end += n;
        let mut start = 0;
        loop {
            match parse_request(&self.buffer[start..self.end]) {
                Ok(Parsed::Complete { request, consumed }) => {
                    let reply = router.route(&request).await;
                    if let Err(e) = self.send(&reply).await {
                        warn!("Error writing to {}: {}", self.peer, e);
                        return ConnectionStatus::Closed;
                    }
                    start += consumed;
                    if request.wants_close() {
                        debug!("{} asked to close the connection", self.peer);
                        return ConnectionStatus::Closed;
                    }
                }
                Ok(Parsed::Incomplete) => break,
                Err(e) => {
                    warn!(
                        "Received malformed request from {}, terminating connection: {}",
                        self.peer, e
                    );
                    self.reject().await;
                    return ConnectionStatus::Closed;
                }
            }
        }

        self.buffer.copy_within(start..self.end, 0);
        self.end -= start;
        if self.end == self.buffer.len() {
            warn!(
                "Request from {} does not fit into {} bytes, terminating connection",
                self.peer, HTTP_MAX_SIZE
            );
            self.reject().await;
            return ConnectionStatus::Closed;
        }
        ConnectionStatus::Open
    }

    async fn send(&mut self, reply: &Reply) -> io::Result<()> {
        self.stream.write_all(&reply.to_bytes()).await
    }

    /// Answers `400 Bad Request`, after which no more bytes of this connection are looked at
    async fn reject(&mut self) {
        if let Err(e) = self.send(&Reply::new(StatusCode::BAD_REQUEST)).await {
            debug!("Could not send bad request reply to {}: {}", self.peer, e);
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error shutting down connection to {}: {}", self.peer, e);
        }
    }
}

/// HTTP front end of a node
pub struct WebServer {
    address: SocketAddr,
    listener: TcpListener,
    router: Router<LookupService>,
    connection: Option<ConnectionState>,
}

impl WebServer {
    /// Binds the HTTP listener and, in ring mode, the lookup socket on the same address
    pub async fn bind(config: &NodeConfig) -> Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(config.address.into())
            .with_context(|| format!("Failed to bind HTTP socket on {}", config.address))?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let address = listener.local_addr()?;

        let store = ResourceStore::with_static_resources(config.capacity);
        let router = match config.ring {
            Some(view) => {
                let lookup = LookupService::bind(view, config.lookup_timeout)
                    .await
                    .with_context(|| format!("Failed to bind lookup socket on {}", config.address))?;
                info!(
                    "{}: Joining static ring as {:#06x}, predecessor {}, successor {}",
                    address,
                    view.own().id,
                    view.predecessor(),
                    view.successor()
                );
                Router::with_ring(view, lookup, store)
            }
            None => {
                info!("{}: Running without ring", address);
                Router::standalone(store)
            }
        };

        Ok(WebServer {
            address,
            listener,
            router,
            connection: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Serves clients and lookups until `cancellation_token` is cancelled
    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        info!("{}: Listening for HTTP requests", self.address);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("{}: Stopped serving requests.", self.address);
                    if let Some(connection) = self.connection.take() {
                        connection.close().await;
                    }
                    return Ok(());
                }
                result = self.listener.accept(), if self.connection.is_none() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("{}: Accepted connection from {}", self.address, peer);
                            self.connection = Some(ConnectionState::new(stream, peer));
                        }
                        Err(e) => warn!("{}: Failed to accept connection: {}", self.address, e),
                    }
                }
                result = read_connection(&mut self.connection) => {
                    let status = match (result, self.connection.as_mut()) {
                        (Ok(0), _) | (_, None) => ConnectionStatus::Closed,
                        (Ok(n), Some(connection)) => connection.process(n, &mut self.router).await,
                        (Err(e), Some(connection)) => {
                            warn!("{}: Error reading from {}: {}", self.address, connection.peer, e);
                            ConnectionStatus::Closed
                        }
                    };
                    if status == ConnectionStatus::Closed {
                        if let Some(connection) = self.connection.take() {
                            debug!("{}: Closing connection to {}", self.address, connection.peer);
                            connection.close().await;
                        }
                    }
                }
                result = recv_lookup(self.router.resolver()) => {
                    match result {
                        Ok(message) => {
                            if let Some(lookup) = self.router.resolver() {
                                if let Err(e) = lookup.handle(message).await {
                                    warn!("{}: Failed to serve lookup: {}", self.address, e);
                                }
                            }
                        }
                        Err(e) => warn!("{}: Invalid lookup datagram: {}", self.address, e),
                    }
                }
            }
        }
    }
}

/// Reads from the active connection, or never completes if there is none
async fn read_connection(connection: &mut Option<ConnectionState>) -> io::Result<usize> {
    match connection {
        Some(connection) => connection.read().await,
        None => future::pending().await,
    }
}

/// Receives the next lookup datagram, or never completes outside of ring mode
async fn recv_lookup(lookup: Option<&LookupService>) -> Result<LookupMessage, LookupError> {
    match lookup {
        Some(lookup) => lookup.recv().await,
        None => future::pending().await,
    }
}
