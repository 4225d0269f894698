//! Configuration for rigpoll.
//!
//! Loaded from a TOML file holding poll settings, an optional Zabbix sink,
//! and the `[[miner]]` and `[[pool]]` task lists. Task entries are only
//! deserialized here; they are validated when registered with a
//! [`Dispatcher`](crate::dispatch::Dispatcher).

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::device::AddressPolicy;
use crate::error::{Error, Result};
use crate::miner::MinerSpec;
use crate::pool::PoolSpec;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,

    /// Metrics sink, required by `send`. Its address obeys the poll
    /// address policy.
    #[serde(default)]
    pub zabbix: Option<ZabbixConfig>,

    #[serde(default, rename = "miner")]
    pub miners: Vec<MinerSpec>,

    #[serde(default, rename = "pool")]
    pub pools: Vec<PoolSpec>,
}

/// Dispatch settings shared by all tasks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    /// Which miner addresses may be polled.
    #[serde(default)]
    pub address_policy: AddressPolicy,

    /// Cap on concurrent exchanges; unbounded when absent.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

fn default_zabbix_port() -> u16 {
    10051
}

fn default_zabbix_timeout() -> u64 {
    5
}

/// Zabbix server or proxy receiving metrics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZabbixConfig {
    pub server: IpAddr,

    #[serde(default = "default_zabbix_port")]
    pub port: u16,

    /// Seconds.
    #[serde(default = "default_zabbix_timeout")]
    pub timeout: u64,
}

impl ZabbixConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        if config.poll.max_in_flight == Some(0) {
            return Err(Error::Config("max_in_flight must be at least 1".into()));
        }
        if let Some(zabbix) = &config.zabbix {
            config
                .poll
                .address_policy
                .check(zabbix.server)
                .map_err(|e| Error::Config(format!("zabbix: {}", e)))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::RequestNames;

    const SAMPLE: &str = r#"
[poll]
address_policy = "any"
max_in_flight = 16

[zabbix]
server = "10.0.0.2"

[[miner]]
id = "s9-01"
host = "10.0.0.21"
miner = "CGMiner"
request = ["Summary", "Stats"]

[[miner]]
id = "eth-07"
host = "10.0.0.27"
port = 3334
miner = "Etherium"
timeout = 3
request = "Statistic"
description = "rack 2"

[[pool]]
id = "zec"
pool = "FlyPool"
account = "t1abc"
request = { name = "getWorkerAllStatistics" }
workers = ["Rig1", "Rig2"]

[[pool]]
id = "eth-avg"
pool = "NanoPool"
coin = "Etherium"
account = "0xabc"
request = { name = "getWorkerAverageHashrate", args = { worker = "rig1", hours = 6 } }
"#;

    #[test]
    fn sample() {
        let config: Config = SAMPLE.parse().unwrap();

        assert_eq!(config.poll.address_policy, AddressPolicy::Any);
        assert_eq!(config.poll.max_in_flight, Some(16));

        let zabbix = config.zabbix.unwrap();
        assert_eq!(zabbix.socket_addr(), "10.0.0.2:10051".parse().unwrap());
        assert_eq!(zabbix.timeout(), Duration::from_secs(5));

        assert_eq!(config.miners.len(), 2);
        assert_eq!(config.miners[0].port, None);
        assert_eq!(config.miners[0].timeout, 5);
        assert_eq!(
            config.miners[0].request,
            RequestNames::Many(vec!["Summary".into(), "Stats".into()])
        );
        assert_eq!(config.miners[1].port, Some(3334));
        assert_eq!(config.miners[1].description.as_deref(), Some("rack 2"));

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools[0].port, 443);
        assert!(config.pools[0].tls);
        assert_eq!(config.pools[0].workers, ["Rig1", "Rig2"]);
        assert_eq!(config.pools[1].request.args.hours, Some(6));
        assert_eq!(config.pools[1].request.args.worker.as_deref(), Some("rig1"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.poll.address_policy, AddressPolicy::Private);
        assert_eq!(config.poll.max_in_flight, None);
        assert!(config.zabbix.is_none());
        assert!(config.miners.is_empty());
        assert!(config.pools.is_empty());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = "[[miner]]\nid = \"a\"\nhost = \"10.0.0.1\"\nminer = \"ZCash\"\nrequest = \"Statistic\"\ncolor = \"red\"\n"
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn rejects_zero_in_flight() {
        let err = "[poll]\nmax_in_flight = 0\n".parse::<Config>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zabbix_server_follows_address_policy() {
        let err = "[zabbix]\nserver = \"93.184.216.34\"\n".parse::<Config>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: zabbix: address '93.184.216.34' does not appear to be in private network"
        );

        let config: Config = "[poll]\naddress_policy = \"any\"\n\n[zabbix]\nserver = \"93.184.216.34\"\n"
            .parse()
            .unwrap();
        assert_eq!(config.zabbix.unwrap().port, 10051);
    }

    #[test]
    fn missing_file() {
        let err = Config::load_from(Path::new("/nonexistent/rigpoll.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
