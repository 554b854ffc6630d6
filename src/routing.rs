//! Routing decision engine
//!
//! Decides for every request whether we answer it from our own store,
//! send the client to our successor, or first have to find the owner with a lookup round-trip.
//! Exactly one reply is produced per request.

use http::{Method, StatusCode};
use log::{debug, info, warn};

use crate::http::{Reply, Request};
use crate::lookup::OwnerResolver;
use crate::ring::{hash_path, RingView, Route};
use crate::store::ResourceStore;

/// Ring membership together with the means to resolve keys beyond our successor
struct Ring<R> {
    view: RingView,
    resolver: R,
}

pub struct Router<R> {
    /// Absent in single-node mode, where every request is served locally
    ring: Option<Ring<R>>,
    store: ResourceStore,
}

impl<R: OwnerResolver> Router<R> {
    /// A node without ring, responsible for all keys
    pub fn standalone(store: ResourceStore) -> Self {
        Router { ring: None, store }
    }

    pub fn with_ring(view: RingView, resolver: R, store: ResourceStore) -> Self {
        Router {
            ring: Some(Ring { view, resolver }),
            store,
        }
    }

    pub fn resolver(&self) -> Option<&R> {
        self.ring.as_ref().map(|ring| &ring.resolver)
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Produces the single reply for `request`
    ///
    /// A lookup round-trip suspends the caller until the owner answered or the lookup timed out.
    pub async fn route(&mut self, request: &Request) -> Reply {
        info!(
            "Handling {} request for {} ({} byte payload)",
            request.method,
            request.uri,
            request.payload.len()
        );
        let ring = match &mut self.ring {
            Some(ring) => ring,
            None => return serve_locally(&self.store, request),
        };
        let key = hash_path(&request.uri);
        match ring.view.route(key) {
            Route::Local => {
                debug!("{:#06x} is ours", key);
                serve_locally(&self.store, request)
            }
            Route::Successor(successor) => {
                debug!("{:#06x} is owned by our successor {}", key, successor);
                Reply::see_other(successor.address, &request.uri)
            }
            Route::Lookup => match ring.resolver.resolve_owner(key).await {
                Ok(owner) if owner == ring.view.own() => serve_locally(&self.store, request),
                Ok(owner) => Reply::see_other(owner.address, &request.uri),
                Err(e) => {
                    warn!("Could not resolve owner of {:#06x}: {}", key, e);
                    Reply::retry_later()
                }
            },
        }
    }
}

/// Maps the request method onto the local store
fn serve_locally(store: &ResourceStore, request: &Request) -> Reply {
    match request.method {
        Method::GET => match store.get(&request.uri) {
            Some(payload) => Reply::ok(payload),
            None => Reply::new(StatusCode::NOT_FOUND),
        },
        Method::PUT => match store.set(&request.uri, &request.payload) {
            Ok(true) => Reply::new(StatusCode::NO_CONTENT),
            Ok(false) => Reply::new(StatusCode::CREATED),
            Err(e) => {
                warn!("Cannot store {}: {}", request.uri, e);
                Reply::new(StatusCode::INSUFFICIENT_STORAGE)
            }
        },
        Method::DELETE => {
            if store.delete(&request.uri) {
                Reply::new(StatusCode::NO_CONTENT)
            } else {
                Reply::new(StatusCode::NOT_FOUND)
            }
        }
        _ => Reply::new(StatusCode::NOT_IMPLEMENTED),
    }
}
