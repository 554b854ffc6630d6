//! Node configuration
//!
//! Values are taken, in order of precedence, from the command line, the environment,
//! and an optional INI file:
//! ```ini
//! [node]
//! host = 127.0.0.1
//! port = 2001
//! id = 4096                ; Presence of an id enables ring mode
//! lookup_timeout_ms = 2000
//! capacity = 100
//!
//! [predecessor]
//! id = 61440
//! ip = 127.0.0.1
//! port = 2003
//!
//! [successor]
//! id = 24576
//! ip = 127.0.0.1
//! port = 2002
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use ini::ini;
use log::debug;
use thiserror::Error;

use crate::lookup::DEFAULT_LOOKUP_TIMEOUT;
use crate::ring::{Key, NodeIdentity, RingView};
use crate::store::DEFAULT_CAPACITY;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration value {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("cannot resolve {0:?} to an IPv4 address")]
    Unresolvable(String),
    #[error("cannot read configuration file {path:?}: {reason}")]
    File { path: PathBuf, reason: String },
    #[error("lookup timeout must be greater than zero")]
    ZeroTimeout,
}

/// A single node of a static ring, serving resources over HTTP
#[derive(Parser, Debug, Default)]
#[command(name = "webserver", version)]
pub struct Cli {
    /// Host name or IPv4 address to listen on
    pub host: Option<String>,
    /// Port shared by the HTTP listener and the lookup socket
    pub port: Option<u16>,
    /// Position of this node on the ring, omit to run a single node
    pub id: Option<Key>,

    /// INI file providing defaults for all other options
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PRED_ID")]
    pub pred_id: Option<Key>,
    #[arg(long, env = "PRED_IP")]
    pub pred_ip: Option<String>,
    #[arg(long, env = "PRED_PORT")]
    pub pred_port: Option<u16>,
    #[arg(long, env = "SUCC_ID")]
    pub succ_id: Option<Key>,
    #[arg(long, env = "SUCC_IP")]
    pub succ_ip: Option<String>,
    #[arg(long, env = "SUCC_PORT")]
    pub succ_port: Option<u16>,

    /// Upper bound for a single lookup round-trip [default: 2000]
    #[arg(long, env = "LOOKUP_TIMEOUT_MS")]
    pub lookup_timeout_ms: Option<u64>,
    /// Maximum number of stored resources [default: 100]
    #[arg(long)]
    pub capacity: Option<usize>,
}

/// Everything a [`WebServer`](crate::server::WebServer) needs to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub address: SocketAddrV4,
    /// `None` runs the node on its own, responsible for every key
    pub ring: Option<RingView>,
    pub lookup_timeout: Duration,
    pub capacity: usize,
}

impl NodeConfig {
    pub fn standalone(address: SocketAddrV4) -> Self {
        NodeConfig {
            address,
            ring: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Ring mode, listening on the address of `ring.own()`
    pub fn in_ring(ring: RingView) -> Self {
        NodeConfig {
            ring: Some(ring),
            ..NodeConfig::standalone(ring.own().address)
        }
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Merges command line, environment and configuration file
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let host = required("HOST", cli.host.or_else(|| file.get("node", "host")))?;
        let port = required("PORT", merge("PORT", cli.port, file.get("node", "port"))?)?;
        let address = resolve(&host, port)?;

        let lookup_timeout_ms = merge(
            "LOOKUP_TIMEOUT_MS",
            cli.lookup_timeout_ms,
            file.get("node", "lookup_timeout_ms"),
        )?;
        let lookup_timeout = match lookup_timeout_ms {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_LOOKUP_TIMEOUT,
        };
        let capacity = merge("CAPACITY", cli.capacity, file.get("node", "capacity"))?
            .unwrap_or(DEFAULT_CAPACITY);

        let ring = match merge("ID", cli.id, file.get("node", "id"))? {
            Some(id) => {
                let predecessor = Neighbor {
                    section: "predecessor",
                    keys: ["PRED_ID", "PRED_IP", "PRED_PORT"],
                    id: cli.pred_id,
                    ip: cli.pred_ip,
                    port: cli.pred_port,
                }
                .resolve(&file)?;
                let successor = Neighbor {
                    section: "successor",
                    keys: ["SUCC_ID", "SUCC_IP", "SUCC_PORT"],
                    id: cli.succ_id,
                    ip: cli.succ_ip,
                    port: cli.succ_port,
                }
                .resolve(&file)?;
                Some(RingView::new(
                    NodeIdentity::new(id, address),
                    predecessor,
                    successor,
                ))
            }
            None => None,
        };

        Ok(NodeConfig {
            address,
            ring,
            lookup_timeout,
            capacity,
        })
    }
}

/// Sections of an INI file, section and key names in lower case
#[derive(Debug, Default)]
struct ConfigFile(HashMap<String, HashMap<String, Option<String>>>);

impl ConfigFile {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.to_owned(),
            reason,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| file_error("path is not valid UTF-8".to_owned()))?;
        let sections = ini!(safe path_str).map_err(file_error)?;
        debug!("Loaded configuration file {}", path.display());
        Ok(ConfigFile(sections))
    }

    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.0.get(section)?.get(key)?.clone()
    }
}

/// One of the two statically configured neighbors
struct Neighbor {
    section: &'static str,
    /// Names of id, ip and port as they appear in the environment
    keys: [&'static str; 3],
    id: Option<Key>,
    ip: Option<String>,
    port: Option<u16>,
}

impl Neighbor {
    fn resolve(self, file: &ConfigFile) -> Result<NodeIdentity, ConfigError> {
        let [id_key, ip_key, port_key] = self.keys;
        let id = required(id_key, merge(id_key, self.id, file.get(self.section, "id"))?)?;
        let ip = required(ip_key, self.ip.or_else(|| file.get(self.section, "ip")))?;
        let port = required(
            port_key,
            merge(port_key, self.port, file.get(self.section, "port"))?,
        )?;
        Ok(NodeIdentity::new(id, resolve(&ip, port)?))
    }
}

fn required<T>(key: &'static str, value: Option<T>) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(key))
}

/// Prefers the already parsed command line value over the raw file value
fn merge<T: FromStr>(
    key: &'static str,
    cli: Option<T>,
    file: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match (cli, file) {
        (Some(value), _) => Ok(Some(value)),
        (None, Some(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: text }),
        (None, None) => Ok(None),
    }
}

/// Resolves `host` and picks its first IPv4 address
fn resolve(host: &str, port: u16) -> Result<SocketAddrV4, ConfigError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ConfigError::Unresolvable(host.to_owned()))?
        .find_map(|address| match address {
            SocketAddr::V4(address) => Some(address),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| ConfigError::Unresolvable(host.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::Ipv4Addr;

    use super::*;

    fn local(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    fn ring_cli() -> Cli {
        Cli {
            host: Some("127.0.0.1".to_owned()),
            port: Some(2001),
            id: Some(4096),
            pred_id: Some(61440),
            pred_ip: Some("127.0.0.1".to_owned()),
            pred_port: Some(2003),
            succ_id: Some(24576),
            succ_ip: Some("localhost".to_owned()),
            succ_port: Some(2002),
            ..Default::default()
        }
    }

    #[test]
    fn test_standalone_from_cli() {
        let config = NodeConfig::from_cli(Cli {
            host: Some("127.0.0.1".to_owned()),
            port: Some(2001),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config, NodeConfig::standalone(local(2001)));
    }

    #[test]
    fn test_ring_from_cli() {
        let config = NodeConfig::from_cli(Cli {
            lookup_timeout_ms: Some(500),
            capacity: Some(7),
            ..ring_cli()
        })
        .unwrap();
        let ring = config.ring.unwrap();
        assert_eq!(ring.own(), NodeIdentity::new(4096, local(2001)));
        assert_eq!(ring.predecessor(), NodeIdentity::new(61440, local(2003)));
        assert_eq!(ring.successor(), NodeIdentity::new(24576, local(2002)));
        assert_eq!(config.lookup_timeout, Duration::from_millis(500));
        assert_eq!(config.capacity, 7);
    }

    #[test]
    fn test_missing_values() {
        assert_eq!(
            NodeConfig::from_cli(Cli::default()),
            Err(ConfigError::Missing("HOST"))
        );
        assert_eq!(
            NodeConfig::from_cli(Cli {
                succ_port: None,
                ..ring_cli()
            }),
            Err(ConfigError::Missing("SUCC_PORT"))
        );
        // Neighbors are irrelevant without an id
        let config = NodeConfig::from_cli(Cli {
            id: None,
            succ_port: None,
            ..ring_cli()
        })
        .unwrap();
        assert_eq!(config.ring, None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert_eq!(
            NodeConfig::from_cli(Cli {
                lookup_timeout_ms: Some(0),
                ..ring_cli()
            }),
            Err(ConfigError::ZeroTimeout)
        );
    }

    #[test]
    fn test_config_file() {
        let path = std::env::temp_dir().join("dht_ring_test_config_file.ini");
        fs::write(
            &path,
            "[node]\nhost = 127.0.0.1\nport = 2001\nid = 4096\ncapacity = 5\n\n\
             [predecessor]\nid = 61440\nip = 127.0.0.1\nport = 2003\n\n\
             [successor]\nid = 24576\nip = 127.0.0.1\nport = 2002\n",
        )
        .unwrap();

        let config = NodeConfig::from_cli(Cli {
            config: Some(path.clone()),
            port: Some(2005),
            ..Default::default()
        })
        .unwrap();
        // The command line wins over the file
        assert_eq!(config.address, local(2005));
        assert_eq!(config.capacity, 5);
        assert_eq!(config.lookup_timeout, DEFAULT_LOOKUP_TIMEOUT);
        let ring = config.ring.unwrap();
        assert_eq!(ring.own().id, 4096);
        assert_eq!(ring.successor(), NodeIdentity::new(24576, local(2002)));

        fs::write(&path, "[node]\nhost = 127.0.0.1\nport = many\n").unwrap();
        assert_eq!(
            NodeConfig::from_cli(Cli {
                config: Some(path.clone()),
                ..Default::default()
            }),
            Err(ConfigError::Invalid {
                key: "PORT",
                value: "many".to_owned()
            })
        );
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_config_file() {
        let result = NodeConfig::from_cli(Cli {
            config: Some(PathBuf::from("/nonexistent/dht_ring.ini")),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::File { .. })));
    }

    #[test]
    fn test_command_line_syntax() {
        let cli = Cli::try_parse_from(["webserver", "127.0.0.1", "2001", "4096"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(2001));
        assert_eq!(cli.id, Some(4096));
        assert!(Cli::try_parse_from(["webserver", "127.0.0.1", "70000"]).is_err());
    }
}
