//! This repository showcases a node of a static, ring-structured key/value store served over HTTP.
//!
//! # Architecture:
//! Every node owns a slice of a 16 bit key space, namely all keys in `(predecessor, self]`.
//! Resources are addressed by their path, whose [key](ring::hash_path) consists of the first two bytes
//! of its SHA-256 digest.
//! Predecessor and successor are configured statically, nodes never join or leave a running ring.
//!
//! For every HTTP request the node decides whether it
//! - serves the request from its own [store](store::ResourceStore),
//! - redirects the client to its successor with `303 See Other`, or
//! - first asks the ring who owns the key, using the [UDP lookup protocol](lookup),
//!   and then redirects the client there (or answers `503 Service Unavailable` if nobody replied in time).
//!
//! The [server](server) handles a single connection at a time, including pipelined requests.
//!
//! # Main executable:
//! The main executable `webserver` takes the address to listen on and, optionally, its id on the ring:
//! ```bash
//! webserver <HOST> <PORT> [ID]
//! ```
//! Without an id the node runs on its own and is responsible for every key.
//! With an id, its neighbors are read from the environment:
//! ```bash
//! PRED_ID=49152 PRED_IP=127.0.0.1 PRED_PORT=2003 \
//! SUCC_ID=32768 SUCC_IP=127.0.0.1 SUCC_PORT=2002 \
//! cargo run --release -- 127.0.0.1 2001 16384
//! ```
//! All values may also be provided through an INI file passed with `-c <config>`,
//! see [config] for its format.
//! The lookup timeout defaults to two seconds and can be changed with `LOOKUP_TIMEOUT_MS`.
//!
//! We support different levels of logging, with the default being `info`.
//! You can change the log level by setting the `RUST_LOG` environment variable to one of the following values:
//! - `error`
//! - `warn`
//! - `info`
//! - `debug`
//! - `trace`
//!
//! ## Compilation:
//! ```bash
//! cargo build --release
//! ```
//! This will create a binary in `target/release/webserver`.
//!
//! ## Testing:
//! Unit tests live next to the code, multi-node scenarios in `src/testing.rs`:
//! ```bash
//! cargo test --release
//! ```
//!
//! Below, you will find links to the modules of this crate:
pub mod config;
pub mod http;
pub mod lookup;
pub mod ring;
pub mod routing;
pub mod server;
pub mod store;
