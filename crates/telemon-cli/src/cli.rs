//! Command-line interface definitions and parsing

use std::str::FromStr;

use clap::Parser;
use telemon_core::config::parse_interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port of the protocol listener
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Name announced to peers
    #[arg(short, long)]
    pub name: Option<String>,

    /// Seconds between persisted status snapshots
    #[arg(short, long, value_parser = parse_interval)]
    pub interval: Option<f64>,

    /// Accept inbound peer connections
    #[arg(short, long)]
    pub server: bool,

    /// Log protocol traffic
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// JSON-lines file receiving status snapshots and log records
    #[arg(long)]
    pub status_log: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Peers to dial, as name=host:port
    #[arg(value_name = "NAME=HOST:PORT")]
    pub peers: Vec<PeerAddress>,
}

// ----------------------------------------------------------------------------
// Peer Addresses
// ----------------------------------------------------------------------------

/// A `name=host:port` positional argument
///
/// The name may be omitted when the host is itself a valid peer name, in
/// which case the host doubles as the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub name: String,
    pub host: String,
    pub port: u16,
}

fn is_peer_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = match s.split_once('=') {
            Some((name, address)) => (Some(name), address),
            None => (None, s),
        };

        if let Some(name) = name.filter(|name| !is_peer_name(name)) {
            return Err(format!("invalid peer name '{name}'"));
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{address}'"))?;
        if host.is_empty() {
            return Err(format!("missing host in '{s}'"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port '{port}'"))?;

        let name = match name {
            Some(name) => name,
            None if is_peer_name(host) => host,
            None => return Err(format!("'{host}' cannot name a peer, use name={s}")),
        };

        Ok(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_parsing() {
        let peer: PeerAddress = "ccd1=localhost:5555".parse().unwrap();
        assert_eq!(peer.name, "ccd1");
        assert_eq!(peer.host, "localhost");
        assert_eq!(peer.port, 5555);

        let peer: PeerAddress = "weather-2=10.0.0.7:7100".parse().unwrap();
        assert_eq!(peer.name, "weather-2");
        assert_eq!(peer.host, "10.0.0.7");
    }

    #[test]
    fn test_peer_address_without_name() {
        let peer: PeerAddress = "mount:7001".parse().unwrap();
        assert_eq!(peer.name, "mount");
        assert_eq!(peer.host, "mount");
        assert_eq!(peer.port, 7001);

        let err = "10.0.0.7:7100".parse::<PeerAddress>().unwrap_err();
        assert!(err.contains("name=10.0.0.7:7100"), "{err}");
        assert!("weather.local:7002".parse::<PeerAddress>().is_err());
        assert!(Cli::try_parse_from(["telemon", "10.0.0.7:7100"]).is_err());
    }

    #[test]
    fn test_invalid_peer_addresses() {
        for raw in ["ccd1=localhost", "ccd1=localhost:port", "=host:1", "a.b=host:1", "ccd1=:1", "x=h:70000"] {
            assert!(raw.parse::<PeerAddress>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "telemon", "-s", "-p", "7200", "-n", "dome", "-i", "30", "-D", "ccd1=localhost:5555",
        ])
        .unwrap();

        assert!(cli.server);
        assert!(cli.debug);
        assert!(!cli.verbose);
        assert_eq!(cli.port, Some(7200));
        assert_eq!(cli.name.as_deref(), Some("dome"));
        assert_eq!(cli.interval, Some(30.0));
        assert_eq!(cli.peers.len(), 1);
        assert_eq!(cli.peers[0].name, "ccd1");
    }

    #[test]
    fn test_cli_rejects_out_of_range_interval() {
        assert!(Cli::try_parse_from(["telemon", "-i", "7200"]).is_err());
        assert!(Cli::try_parse_from(["telemon", "-i", "often"]).is_err());
    }
}
