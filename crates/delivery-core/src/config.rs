//! Node configuration and its JSON envelope
//!
//! Configuration is decoded in two steps: `serde_json` produces a raw shape
//! with every field optional, then validation checks the field
//! combinations and yields the immutable typed config.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, DeliveryResult};
use crate::topic::{ContentTopic, MAX_SHARDS, PubsubTopic};

/// Default TCP port for peer-to-peer connections
pub const DEFAULT_P2P_TCP_PORT: u16 = 60000;
/// Default UDP port for discv5 discovery
pub const DEFAULT_DISCV5_UDP_PORT: u16 = 9000;

/// Node log verbosity as spelled in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Notice => "NOTICE",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Equivalent `tracing` filter directive
    ///
    /// `tracing` has no NOTICE or FATAL, so they collapse onto the nearest level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Notice => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(DeliveryError::invalid_field(
                "logLevel",
                format!("unknown level {other:?}"),
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = DeliveryError;

    fn try_from(value: String) -> Result<Self, DeliveryError> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Operating mode of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeMode {
    /// Full relay participant
    Core,
    /// Light client relying on service peers
    Edge,
}

impl FromStr for NodeMode {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Core" => Ok(NodeMode::Core),
            "Edge" => Ok(NodeMode::Edge),
            other => Err(DeliveryError::invalid_field(
                "mode",
                format!("expected \"Core\" or \"Edge\", got {other:?}"),
            )),
        }
    }
}

/// Which shards of the cluster this node serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSpec {
    /// Shards `0..n`
    Count(u16),
    /// An explicit list of shard indices
    List(Vec<u16>),
}

impl ShardSpec {
    /// Pick the shard a content topic is routed on
    ///
    /// An empty spec routes everything to shard 0.
    pub fn shard_for(&self, topic: &ContentTopic) -> u16 {
        let key = topic.shard_key();
        match self {
            ShardSpec::Count(n) => key.checked_rem(u64::from(*n)).map_or(0, |s| s as u16),
            ShardSpec::List(shards) => key
                .checked_rem(shards.len() as u64)
                .and_then(|i| shards.get(i as usize).copied())
                .unwrap_or(0),
        }
    }

    /// Number of shards served
    pub fn len(&self) -> usize {
        match self {
            ShardSpec::Count(n) => usize::from(*n),
            ShardSpec::List(shards) => shards.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Listening addresses and ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingConfig {
    pub listen_ipv4: Ipv4Addr,
    pub p2p_tcp_port: u16,
    pub discv5_udp_port: u16,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            listen_ipv4: Ipv4Addr::UNSPECIFIED,
            p2p_tcp_port: DEFAULT_P2P_TCP_PORT,
            discv5_udp_port: DEFAULT_DISCV5_UDP_PORT,
        }
    }
}

/// Validated, immutable node configuration
///
/// Only [`NodeConfig::from_json`] builds one. Optional fields the document
/// left out stay absent, so encoding reproduces the document; the accessors
/// fill in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    log_level: Option<LogLevel>,
    mode: NodeMode,
    cluster_id: u16,
    shards: ShardSpec,
    entry_nodes: Option<Vec<String>>,
    networking: Option<NetworkingOverrides>,
}

/// `networkingConfig` as written, each field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    listen_ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p2p_tcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discv5_udp_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeConfig {
    log_level: Option<String>,
    mode: Option<String>,
    cluster_id: Option<i64>,
    num_shards: Option<i64>,
    shards: Option<Vec<i64>>,
    entry_nodes: Option<Vec<String>>,
    networking_config: Option<RawNetworkingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNetworkingConfig {
    listen_ipv4: Option<String>,
    p2p_tcp_port: Option<i64>,
    discv5_udp_port: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireNodeConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<LogLevel>,
    mode: NodeMode,
    cluster_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_shards: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shards: Option<&'a [u16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry_nodes: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    networking_config: Option<&'a NetworkingOverrides>,
}

impl NodeConfig {
    /// Decode and validate a JSON configuration document
    pub fn from_json(json: &str) -> DeliveryResult<Self> {
        let raw: RawNodeConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Encode back to the JSON envelope
    pub fn to_json(&self) -> DeliveryResult<String> {
        let (num_shards, shards) = match &self.shards {
            ShardSpec::Count(n) => (Some(*n), None),
            ShardSpec::List(list) => (None, Some(list.as_slice())),
        };
        let wire = WireNodeConfig {
            log_level: self.log_level,
            mode: self.mode,
            cluster_id: self.cluster_id,
            num_shards,
            shards,
            entry_nodes: self.entry_nodes.as_deref(),
            networking_config: self.networking.as_ref(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Configured level, INFO when unset
    pub fn log_level(&self) -> LogLevel {
        self.log_level.unwrap_or_default()
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn cluster_id(&self) -> u16 {
        self.cluster_id
    }

    /// Never empty
    pub fn shards(&self) -> &ShardSpec {
        &self.shards
    }

    pub fn entry_nodes(&self) -> &[String] {
        self.entry_nodes.as_deref().unwrap_or_default()
    }

    /// Listening setup with defaults for anything left out
    pub fn networking(&self) -> NetworkingConfig {
        let defaults = NetworkingConfig::default();
        let Some(net) = &self.networking else {
            return defaults;
        };
        NetworkingConfig {
            listen_ipv4: net.listen_ipv4.unwrap_or(defaults.listen_ipv4),
            p2p_tcp_port: net.p2p_tcp_port.unwrap_or(defaults.p2p_tcp_port),
            discv5_udp_port: net.discv5_udp_port.unwrap_or(defaults.discv5_udp_port),
        }
    }

    /// Routing topic for a content topic under this config's sharding
    pub fn pubsub_topic_for(&self, topic: &ContentTopic) -> PubsubTopic {
        PubsubTopic::new(self.cluster_id, self.shards.shard_for(topic))
    }

    fn from_raw(raw: RawNodeConfig) -> DeliveryResult<Self> {
        let log_level = raw.log_level.map(|level| level.parse()).transpose()?;

        let mode: NodeMode = raw.mode.ok_or(DeliveryError::MissingField("mode"))?.parse()?;

        let cluster_id = raw.cluster_id.ok_or(DeliveryError::MissingField("clusterId"))?;
        let cluster_id = u16::try_from(cluster_id)
            .map_err(|_| DeliveryError::invalid_field("clusterId", "must be within 0..=65535"))?;

        let shards = match (raw.num_shards, raw.shards) {
            (Some(_), Some(_)) => {
                return Err(DeliveryError::invalid_field(
                    "numShards",
                    "numShards and shards are mutually exclusive",
                ));
            }
            (None, None) => return Err(DeliveryError::MissingField("numShards")),
            (Some(n), None) => {
                if n < 1 || n > i64::from(MAX_SHARDS) {
                    return Err(DeliveryError::invalid_field(
                        "numShards",
                        format!("must be within 1..={MAX_SHARDS}"),
                    ));
                }
                ShardSpec::Count(n as u16)
            }
            (None, Some(list)) => ShardSpec::List(validate_shard_list(list)?),
        };

        if let Some(nodes) = &raw.entry_nodes {
            for node in nodes {
                validate_entry_node(node)?;
            }
        }

        let networking = raw.networking_config.map(validate_networking).transpose()?;

        Ok(Self {
            log_level,
            mode,
            cluster_id,
            shards,
            entry_nodes: raw.entry_nodes,
            networking,
        })
    }
}

fn validate_shard_list(list: Vec<i64>) -> DeliveryResult<Vec<u16>> {
    if list.is_empty() {
        return Err(DeliveryError::invalid_field("shards", "list is empty"));
    }
    let mut shards = Vec::with_capacity(list.len());
    for shard in list {
        if shard < 0 || shard >= i64::from(MAX_SHARDS) {
            return Err(DeliveryError::invalid_field(
                "shards",
                format!("shard {shard} outside 0..{MAX_SHARDS}"),
            ));
        }
        let shard = shard as u16;
        if shards.contains(&shard) {
            return Err(DeliveryError::invalid_field(
                "shards",
                format!("duplicate shard {shard}"),
            ));
        }
        shards.push(shard);
    }
    Ok(shards)
}

fn validate_entry_node(node: &str) -> DeliveryResult<()> {
    let known = (node.len() > 1 && node.starts_with('/'))
        || node.starts_with("enr:")
        || node.starts_with("enrtree://");
    if !known || node.chars().any(char::is_whitespace) {
        return Err(DeliveryError::invalid_field(
            "entryNodes",
            format!("{node:?} is not a multiaddr, ENR or enrtree URL"),
        ));
    }
    Ok(())
}

fn validate_networking(raw: RawNetworkingConfig) -> DeliveryResult<NetworkingOverrides> {
    let listen_ipv4 = raw
        .listen_ipv4
        .map(|addr| {
            addr.parse::<Ipv4Addr>().map_err(|_| {
                DeliveryError::invalid_field("listenIpv4", format!("{addr:?} is not an IPv4 address"))
            })
        })
        .transpose()?;
    Ok(NetworkingOverrides {
        listen_ipv4,
        p2p_tcp_port: port("p2pTcpPort", raw.p2p_tcp_port)?,
        discv5_udp_port: port("discv5UdpPort", raw.discv5_udp_port)?,
    })
}

fn port(field: &'static str, value: Option<i64>) -> DeliveryResult<Option<u16>> {
    value
        .map(|p| {
            u16::try_from(p).map_err(|_| DeliveryError::invalid_field(field, "must be within 0..=65535"))
        })
        .transpose()
}
